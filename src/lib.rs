//! Pullstate Persist - durable reactive store state for browser apps
//!
//! Core modules:
//! - `persistence`: Load/subscribe/save lifecycle and the optional cipher
//! - `platform`: Browser/native abstraction (storage areas, task spawning)
//! - `store`: Reactive store contract plus a single-threaded implementation
//! - `config`: Storage scope, key prefix, passphrase
//! - `error`: Error types shared across modules

pub mod config;
pub mod error;
pub mod persistence;
pub mod platform;
pub mod store;

pub use config::{PersistConfig, StorageType};
pub use error::{CipherError, PersistError, StorageError};
pub use persistence::{Cipher, CipherState, Persistor};
pub use platform::Spawner;
pub use platform::storage::{MemoryStorage, StorageArea, StorageProvider};
pub use store::{LocalStore, Store, Subscription};

/// Persistence constants
pub mod consts {
    /// Key namespace used when the caller does not supply one
    pub const DEFAULT_PREFIX: &str = "pullstate";
    /// Joins prefix and key: `<prefix>@<key>`
    pub const KEY_SEPARATOR: char = '@';

    /// PBKDF2 salt. Fixed so the same passphrase always derives the same key.
    pub const KDF_SALT: &str = "pullstate-salt";
    /// PBKDF2-HMAC-SHA256 rounds
    pub const KDF_ITERATIONS: u32 = 100_000;

    /// AES-256 key length in bytes
    pub const KEY_LEN: usize = 32;
    /// AES-GCM nonce length (96 bits)
    pub const NONCE_LEN: usize = 12;
    /// AES-GCM authentication tag length (128 bits)
    pub const TAG_LEN: usize = 16;
}

/// Compose the storage key for a logical key under a prefix
#[inline]
pub fn storage_key(prefix: &str, key: &str) -> String {
    format!("{}{}{}", prefix, consts::KEY_SEPARATOR, key)
}
