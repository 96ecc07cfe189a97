//! Error types
//!
//! None of these reach the host app from the background save path; they are
//! logged there. They surface only from `Persistor::new` and `Persistor::save`.

use crate::config::StorageType;

/// Storage backend failures
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{0} storage is unavailable")]
    Unavailable(StorageType),
    #[error("failed to read '{key}': {reason}")]
    Read { key: String, reason: String },
    #[error("failed to write '{key}': {reason}")]
    Write { key: String, reason: String },
}

/// Cipher failures
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
    #[error("record is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("record too short: {len} bytes")]
    Truncated { len: usize },
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed (wrong key or tampered record)")]
    Decrypt,
    #[error("decrypted payload is not UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Persistence adapter failures
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error("state serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
