//! Store persistence
//!
//! Features:
//! - Restore on start, then mirror every store change to storage
//! - Storage key namespacing (`<prefix>@<key>`)
//! - Optional AES-256-GCM payload encryption (see [`cipher`])
//! - Failures are logged, never surfaced to the app from background saves

pub mod cipher;

pub use cipher::{Cipher, CipherState};

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use futures::future::{FutureExt, LocalBoxFuture, Shared};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::{PersistConfig, StorageType};
use crate::error::PersistError;
use crate::platform::Spawner;
use crate::platform::storage::{StorageArea, StorageProvider};
use crate::store::{Store, Subscription};

/// State shared between the adapter and its background save tasks
struct Inner<S> {
    store: S,
    storage_key: String,
    storage_type: StorageType,
    area: Rc<dyn StorageArea>,
    cipher: Rc<Cipher>,
}

impl<S> Inner<S>
where
    S: Store,
    S::State: Serialize,
{
    fn write_snapshot(&self, state: &S::State) -> Result<(), PersistError> {
        let json = serde_json::to_string(state)?;
        let record = self.cipher.encrypt(&json)?;
        self.area.set_item(&self.storage_key, &record)?;
        log::debug!(
            "Saved '{}' to {} storage ({} bytes)",
            self.storage_key,
            self.storage_type,
            record.len()
        );
        Ok(())
    }
}

/// Keeps a store and a storage record in sync.
///
/// Construct it, then call [`Persistor::initialize`] once. Persistence stops
/// when the adapter is dropped or [`Persistor::dispose`] is called.
pub struct Persistor<S> {
    inner: Rc<Inner<S>>,
    spawner: Rc<dyn Spawner>,
    /// Resolves once key derivation has settled (immediately without a passphrase)
    key_setup: Shared<LocalBoxFuture<'static, ()>>,
    subscription: RefCell<Option<Subscription>>,
}

impl<S> Persistor<S>
where
    S: Store + 'static,
    S::State: Serialize + DeserializeOwned + PartialEq,
{
    /// Open the configured storage area and start key derivation if a
    /// passphrase is given. Nothing is read or written yet.
    pub fn new(
        store: S,
        key: &str,
        config: PersistConfig,
        storage: &dyn StorageProvider,
        spawner: Rc<dyn Spawner>,
    ) -> Result<Self, PersistError> {
        let area = storage.area(config.storage)?;
        let cipher = Rc::new(Cipher::unconfigured());

        let key_setup = match config.effective_passphrase() {
            Some(passphrase) => {
                let setup = cipher.configure(passphrase.to_string()).boxed_local().shared();
                spawner.spawn_local(setup.clone().boxed_local());
                setup
            }
            None => futures::future::ready(()).boxed_local().shared(),
        };

        let storage_key = crate::storage_key(&config.prefix, key);
        log::info!(
            "Persisting '{}' to {} storage ({})",
            storage_key,
            config.storage,
            if config.effective_passphrase().is_some() {
                "encrypted"
            } else {
                "plaintext"
            }
        );

        Ok(Self {
            inner: Rc::new(Inner {
                store,
                storage_key,
                storage_type: config.storage,
                area,
                cipher,
            }),
            spawner,
            key_setup,
            subscription: RefCell::new(None),
        })
    }

    /// Restore saved state into the store, then start saving on every change.
    ///
    /// Waits for key derivation first, so encrypted records are never read
    /// or written without the key. Returns the restored snapshot, or `None`
    /// when nothing usable was stored.
    pub async fn initialize(&self) -> Option<S::State> {
        self.unsubscribe();
        self.key_setup.clone().await;

        let restored = self.load_state();
        self.subscribe();
        restored
    }

    /// [`Persistor::initialize`], then hand the outcome to `on_restore`
    pub async fn initialize_with<F>(&self, on_restore: F)
    where
        F: FnOnce(Option<S::State>),
    {
        let restored = self.initialize().await;
        on_restore(restored);
    }

    /// Write the store's current state now
    pub async fn save(&self) -> Result<(), PersistError> {
        self.key_setup.clone().await;
        let state = self.inner.store.get_raw_state();
        self.inner.write_snapshot(&state)
    }

    /// Stop saving on store changes. Safe to call more than once.
    pub fn dispose(&self) {
        if self.unsubscribe() {
            log::debug!("Stopped persisting '{}'", self.inner.storage_key);
        }
    }

    /// Full key the record lives under
    pub fn storage_key(&self) -> &str {
        &self.inner.storage_key
    }

    pub fn storage_type(&self) -> StorageType {
        self.inner.storage_type
    }

    pub fn cipher_state(&self) -> CipherState {
        self.inner.cipher.state()
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    fn load_state(&self) -> Option<S::State> {
        let key = &self.inner.storage_key;
        let record = match self.inner.area.get_item(key) {
            Ok(Some(record)) if !record.is_empty() => record,
            Ok(_) => {
                log::info!("No saved state for '{}'", key);
                return None;
            }
            Err(e) => {
                log::error!("Load state failed: {}", e);
                return None;
            }
        };

        // Undecryptable records stay in storage untouched
        let plaintext = self.inner.cipher.decrypt(&record)?;

        match serde_json::from_str::<S::State>(&plaintext) {
            Ok(state) => {
                let restored = state.clone();
                self.inner.store.update(move || restored);
                log::info!("Restored state for '{}'", key);
                Some(state)
            }
            Err(e) => {
                log::error!("State parsing failed for '{}': {}", key, e);
                None
            }
        }
    }

    fn subscribe(&self) {
        let weak: Weak<Inner<S>> = Rc::downgrade(&self.inner);
        let spawner = Rc::clone(&self.spawner);

        let subscription = self.inner.store.subscribe(
            |state: &S::State| state.clone(),
            move |state: &S::State| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                // Snapshot now; writes land in completion order
                let snapshot = state.clone();
                spawner.spawn_local(
                    async move {
                        if let Err(e) = inner.write_snapshot(&snapshot) {
                            log::error!("Save state failed: {}", e);
                        }
                    }
                    .boxed_local(),
                );
            },
        );

        *self.subscription.borrow_mut() = Some(subscription);
    }

    fn unsubscribe(&self) -> bool {
        let taken = self.subscription.borrow_mut().take();
        match taken {
            Some(subscription) => {
                subscription.unsubscribe();
                true
            }
            None => false,
        }
    }
}

impl<S> Drop for Persistor<S> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.get_mut().take() {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::storage::MemoryStorage;
    use crate::store::LocalStore;
    use futures::executor::LocalPool;
    use proptest::prelude::*;
    use serde::Deserialize;
    use std::cell::Cell;

    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    struct Cart {
        items: Vec<String>,
    }

    fn cart(items: &[&str]) -> Cart {
        Cart {
            items: items.iter().map(|s| s.to_string()).collect(),
        }
    }

    struct Harness {
        pool: LocalPool,
        storage: MemoryStorage,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                pool: LocalPool::new(),
                storage: MemoryStorage::new(),
            }
        }

        fn persistor(
            &self,
            store: &LocalStore<Cart>,
            key: &str,
            config: PersistConfig,
        ) -> Persistor<LocalStore<Cart>> {
            Persistor::new(
                store.clone(),
                key,
                config,
                &self.storage,
                Rc::new(self.pool.spawner()),
            )
            .unwrap()
        }

        fn initialize(&mut self, persistor: &Persistor<LocalStore<Cart>>) -> Option<Cart> {
            self.pool.run_until(persistor.initialize())
        }

        fn record(&self, key: &str) -> Option<String> {
            self.storage.raw_item(StorageType::Local, key)
        }
    }

    #[test]
    fn test_cart_scenario_plaintext() {
        let mut h = Harness::new();
        let store = LocalStore::new(Cart::default());
        let persistor = h.persistor(&store, "cart", PersistConfig::default());
        assert_eq!(persistor.storage_key(), "pullstate@cart");

        let outcome = Rc::new(RefCell::new(Some(Cart::default())));
        let seen = Rc::clone(&outcome);
        h.pool
            .run_until(persistor.initialize_with(move |state| *seen.borrow_mut() = state));
        assert_eq!(*outcome.borrow(), None);

        store.replace(cart(&["a"]));
        h.pool.run_until_stalled();
        assert_eq!(
            h.record("pullstate@cart").as_deref(),
            Some("{\"items\":[\"a\"]}")
        );

        let fresh = LocalStore::new(Cart::default());
        let second = h.persistor(&fresh, "cart", PersistConfig::default());
        assert_eq!(h.initialize(&second), Some(cart(&["a"])));
        assert_eq!(fresh.get_raw_state(), cart(&["a"]));
    }

    #[test]
    fn test_cart_scenario_encrypted() {
        let mut h = Harness::new();
        let config = PersistConfig::default().with_passphrase("secret");

        let store = LocalStore::new(Cart::default());
        let persistor = h.persistor(&store, "cart", config.clone());
        assert_eq!(h.initialize(&persistor), None);
        assert_eq!(persistor.cipher_state(), CipherState::Ready);

        store.replace(cart(&["a"]));
        h.pool.run_until_stalled();
        let record = h.record("pullstate@cart").unwrap();
        assert!(!record.contains("items"));

        let fresh = LocalStore::new(Cart::default());
        let second = h.persistor(&fresh, "cart", config);
        assert_eq!(h.initialize(&second), Some(cart(&["a"])));
        assert_eq!(fresh.get_raw_state(), cart(&["a"]));
    }

    #[test]
    fn test_no_write_before_first_mutation() {
        let mut h = Harness::new();
        let store = LocalStore::new(cart(&["default"]));
        let persistor = h.persistor(&store, "cart", PersistConfig::default());

        // Mutations before initialize are not observed
        store.replace(cart(&["early"]));
        h.pool.run_until_stalled();
        assert!(h.storage.is_empty(StorageType::Local));

        assert_eq!(h.initialize(&persistor), None);
        h.pool.run_until_stalled();
        assert!(h.storage.is_empty(StorageType::Local));
        assert_eq!(store.get_raw_state(), cart(&["early"]));
    }

    #[test]
    fn test_restore_does_not_clobber_saved_record() {
        let mut h = Harness::new();
        h.storage
            .set_raw_item(StorageType::Local, "pullstate@cart", "{\"items\":[\"kept\"]}");

        let store = LocalStore::new(Cart::default());
        let persistor = h.persistor(&store, "cart", PersistConfig::default());
        assert_eq!(h.initialize(&persistor), Some(cart(&["kept"])));
        h.pool.run_until_stalled();
        assert_eq!(
            h.record("pullstate@cart").as_deref(),
            Some("{\"items\":[\"kept\"]}")
        );
    }

    #[test]
    fn test_last_write_wins() {
        let mut h = Harness::new();
        let store = LocalStore::new(Cart::default());
        let persistor = h.persistor(&store, "cart", PersistConfig::default());
        h.initialize(&persistor);

        store.replace(cart(&["a"]));
        store.replace(cart(&["a", "b"]));
        h.pool.run_until_stalled();
        assert_eq!(
            h.record("pullstate@cart").as_deref(),
            Some("{\"items\":[\"a\",\"b\"]}")
        );
    }

    #[test]
    fn test_keys_are_isolated() {
        let mut h = Harness::new();
        let cart_store = LocalStore::new(Cart::default());
        let wish_store = LocalStore::new(Cart::default());
        let carts = h.persistor(&cart_store, "cart", PersistConfig::default());
        let wishes = h.persistor(&wish_store, "wishlist", PersistConfig::default());
        h.initialize(&carts);
        h.initialize(&wishes);

        cart_store.replace(cart(&["a"]));
        wish_store.replace(cart(&["w"]));
        h.pool.run_until_stalled();

        let fresh = LocalStore::new(Cart::default());
        let reader = h.persistor(&fresh, "wishlist", PersistConfig::default());
        assert_eq!(h.initialize(&reader), Some(cart(&["w"])));
    }

    #[test]
    fn test_prefix_and_scope_are_isolated() {
        let mut h = Harness::new();
        let store = LocalStore::new(Cart::default());
        let session = PersistConfig::default()
            .with_storage(StorageType::Session)
            .with_prefix("app");
        let persistor = h.persistor(&store, "cart", session);
        h.initialize(&persistor);
        store.replace(cart(&["s"]));
        h.pool.run_until_stalled();

        assert_eq!(
            h.storage.raw_item(StorageType::Session, "app@cart").as_deref(),
            Some("{\"items\":[\"s\"]}")
        );
        assert!(h.storage.is_empty(StorageType::Local));

        let fresh = LocalStore::new(Cart::default());
        let local_reader = h.persistor(&fresh, "cart", PersistConfig::default().with_prefix("app"));
        assert_eq!(h.initialize(&local_reader), None);
    }

    #[test]
    fn test_wrong_passphrase_is_no_prior_state() {
        let mut h = Harness::new();
        let store = LocalStore::new(Cart::default());
        let writer = h.persistor(&store, "cart", PersistConfig::default().with_passphrase("secret"));
        h.initialize(&writer);
        store.replace(cart(&["a"]));
        h.pool.run_until_stalled();
        let record = h.record("pullstate@cart").unwrap();

        let fresh = LocalStore::new(cart(&["default"]));
        let reader = h.persistor(&fresh, "cart", PersistConfig::default().with_passphrase("guess"));
        assert_eq!(h.initialize(&reader), None);
        assert_eq!(fresh.get_raw_state(), cart(&["default"]));
        // Raw record left in place
        assert_eq!(h.record("pullstate@cart"), Some(record));
    }

    #[test]
    fn test_unparseable_record_is_no_prior_state() {
        let mut h = Harness::new();
        h.storage
            .set_raw_item(StorageType::Local, "pullstate@cart", "{\"items\":");
        let store = LocalStore::new(cart(&["default"]));
        let persistor = h.persistor(&store, "cart", PersistConfig::default());

        let called = Rc::new(Cell::new(false));
        let flag = Rc::clone(&called);
        h.pool.run_until(persistor.initialize_with(move |state| {
            assert!(state.is_none());
            flag.set(true);
        }));
        assert!(called.get());
        assert_eq!(store.get_raw_state(), cart(&["default"]));

        // Still subscribed afterwards
        store.replace(cart(&["b"]));
        h.pool.run_until_stalled();
        assert_eq!(
            h.record("pullstate@cart").as_deref(),
            Some("{\"items\":[\"b\"]}")
        );
    }

    #[test]
    fn test_key_derivation_settles_before_load() {
        let mut h = Harness::new();
        let config = PersistConfig::default().with_passphrase("secret");
        let writer_cipher = Cipher::with_key(cipher::tests::secret_key());
        let record = writer_cipher.encrypt("{\"items\":[\"x\"]}").unwrap();
        h.storage
            .set_raw_item(StorageType::Local, "pullstate@cart", &record);

        let store = LocalStore::new(Cart::default());
        let persistor = h.persistor(&store, "cart", config);
        assert_eq!(persistor.cipher_state(), CipherState::Configuring);

        assert_eq!(h.initialize(&persistor), Some(cart(&["x"])));
        assert_eq!(persistor.cipher_state(), CipherState::Ready);
    }

    #[test]
    fn test_save_failure_keeps_memory_state() {
        let mut h = Harness::new();
        let store = LocalStore::new(Cart::default());
        let persistor = h.persistor(&store, "cart", PersistConfig::default());
        h.initialize(&persistor);

        store.replace(cart(&["a"]));
        h.pool.run_until_stalled();

        h.storage.set_quota(StorageType::Local, Some(24));
        store.replace(cart(&["a", "much-too-long-for-the-quota"]));
        h.pool.run_until_stalled();

        assert_eq!(store.get_raw_state(), cart(&["a", "much-too-long-for-the-quota"]));
        assert_eq!(
            h.record("pullstate@cart").as_deref(),
            Some("{\"items\":[\"a\"]}")
        );
        assert!(matches!(
            h.pool.run_until(persistor.save()),
            Err(PersistError::Storage(_))
        ));
    }

    #[test]
    fn test_explicit_save() {
        let mut h = Harness::new();
        let store = LocalStore::new(cart(&["now"]));
        let persistor = h.persistor(&store, "cart", PersistConfig::default());
        h.pool.run_until(persistor.save()).unwrap();
        assert_eq!(
            h.record("pullstate@cart").as_deref(),
            Some("{\"items\":[\"now\"]}")
        );
    }

    #[test]
    fn test_dispose_stops_writes() {
        let mut h = Harness::new();
        let store = LocalStore::new(Cart::default());
        let persistor = h.persistor(&store, "cart", PersistConfig::default());
        h.initialize(&persistor);
        assert_eq!(store.listener_count(), 1);

        persistor.dispose();
        persistor.dispose();
        assert_eq!(store.listener_count(), 0);

        store.replace(cart(&["a"]));
        h.pool.run_until_stalled();
        assert!(h.storage.is_empty(StorageType::Local));
    }

    #[test]
    fn test_drop_stops_writes() {
        let mut h = Harness::new();
        let store = LocalStore::new(Cart::default());
        let persistor = h.persistor(&store, "cart", PersistConfig::default());
        h.initialize(&persistor);
        drop(persistor);
        assert_eq!(store.listener_count(), 0);

        store.replace(cart(&["a"]));
        h.pool.run_until_stalled();
        assert!(h.storage.is_empty(StorageType::Local));
    }

    #[test]
    fn test_reinitialize_keeps_one_observer() {
        let mut h = Harness::new();
        let store = LocalStore::new(Cart::default());
        let persistor = h.persistor(&store, "cart", PersistConfig::default());
        h.initialize(&persistor);
        store.replace(cart(&["a"]));
        h.pool.run_until_stalled();

        assert_eq!(h.initialize(&persistor), Some(cart(&["a"])));
        assert_eq!(store.listener_count(), 1);
    }

    #[test]
    fn test_unavailable_storage() {
        let h = Harness::new();
        h.storage.disable();
        let result = Persistor::new(
            LocalStore::new(Cart::default()),
            "cart",
            PersistConfig::default(),
            &h.storage,
            Rc::new(h.pool.spawner()),
        );
        assert!(matches!(
            result,
            Err(PersistError::Storage(crate::error::StorageError::Unavailable(
                StorageType::Local
            )))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_save_then_load_round_trips(items in proptest::collection::vec(".*", 0..8)) {
            let mut h = Harness::new();
            let snapshot = Cart { items };

            // Longer than any generated cart, so the replace is always a change
            let store = LocalStore::new(Cart { items: vec!["seed".to_string(); 8] });
            let writer = h.persistor(&store, "cart", PersistConfig::default());
            h.initialize(&writer);
            store.replace(snapshot.clone());
            h.pool.run_until_stalled();

            let fresh = LocalStore::new(Cart::default());
            let reader = h.persistor(&fresh, "cart", PersistConfig::default());
            prop_assert_eq!(h.initialize(&reader), Some(snapshot.clone()));
            prop_assert_eq!(fresh.get_raw_state(), snapshot);
        }
    }
}
