//! Pullstate Persist demo entry point
//!
//! Persists a small shopping cart store. On the web it uses real
//! localStorage; natively it runs the same flow against in-memory storage.

use serde::{Deserialize, Serialize};

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

/// Demo store state
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct Cart {
    items: Vec<String>,
}

impl Cart {
    fn with_item(&self, item: &str) -> Self {
        let mut items = self.items.clone();
        items.push(item.to_string());
        Self { items }
    }
}

#[cfg(target_arch = "wasm32")]
mod wasm_demo {
    use std::rc::Rc;

    use pullstate_persist::platform::WasmSpawner;
    use pullstate_persist::platform::storage::BrowserStorage;
    use pullstate_persist::{LocalStore, PersistConfig, Persistor, Store};

    use super::Cart;

    pub async fn run() {
        console_error_panic_hook::set_once();
        console_log::init_with_level(log::Level::Info).expect("Failed to init logger");

        log::info!("Pullstate Persist demo starting...");

        let store = LocalStore::new(Cart::default());
        let config = PersistConfig::default().with_passphrase("demo-passphrase");
        let persistor = match Persistor::new(
            store.clone(),
            "cart",
            config,
            &BrowserStorage,
            Rc::new(WasmSpawner),
        ) {
            Ok(persistor) => persistor,
            Err(e) => {
                log::error!("Persistence unavailable: {}", e);
                return;
            }
        };

        persistor
            .initialize_with(|state| match state {
                Some(cart) => log::info!("Restored cart with {} items", cart.items.len()),
                None => log::info!("Starting with an empty cart"),
            })
            .await;

        let visit = store.get_raw_state().items.len() + 1;
        store.update(|| store.get_raw_state().with_item(&format!("item-{}", visit)));

        // Keep saving for the lifetime of the page
        std::mem::forget(persistor);
    }
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub async fn wasm_main() {
    wasm_demo::run().await;
}

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    env_logger::init();
    log::info!("Pullstate Persist (native) starting...");
    log::info!("Native mode uses in-memory storage - build for wasm32 to use localStorage");

    println!("\nRunning plaintext cart demo...");
    run_cart_demo(None);

    println!("\nRunning encrypted cart demo...");
    run_cart_demo(Some("secret"));
}

#[cfg(target_arch = "wasm32")]
fn main() {
    // WASM entry point is wasm_main, this is just to satisfy the compiler
}

#[cfg(not(target_arch = "wasm32"))]
fn run_cart_demo(passphrase: Option<&str>) {
    use std::rc::Rc;

    use futures::executor::LocalPool;
    use pullstate_persist::{LocalStore, MemoryStorage, PersistConfig, Persistor, StorageType, Store};

    let mut pool = LocalPool::new();
    let storage = MemoryStorage::new();
    let config = match passphrase {
        Some(p) => PersistConfig::default().with_passphrase(p),
        None => PersistConfig::default(),
    };

    let store = LocalStore::new(Cart::default());
    let persistor = match Persistor::new(
        store.clone(),
        "cart",
        config.clone(),
        &storage,
        Rc::new(pool.spawner()),
    ) {
        Ok(persistor) => persistor,
        Err(e) => {
            log::error!("Persistence unavailable: {}", e);
            return;
        }
    };

    pool.run_until(persistor.initialize_with(|state| {
        println!("  first run restored: {:?}", state);
    }));

    store.update(|| store.get_raw_state().with_item("a"));
    pool.run_until_stalled();

    let record = storage
        .raw_item(StorageType::Local, persistor.storage_key())
        .unwrap_or_default();
    println!("  {} = {}", persistor.storage_key(), record);

    let fresh = LocalStore::new(Cart::default());
    let reader = match Persistor::new(fresh.clone(), "cart", config, &storage, Rc::new(pool.spawner())) {
        Ok(reader) => reader,
        Err(e) => {
            log::error!("Persistence unavailable: {}", e);
            return;
        }
    };
    let restored = pool.run_until(reader.initialize());
    println!("  second run restored: {:?}", restored);
    assert_eq!(fresh.get_raw_state(), store.get_raw_state());
    println!("✓ Cart round-trip passed!");
}
