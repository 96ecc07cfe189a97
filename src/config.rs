//! Persistence configuration
//!
//! Everything a caller can tune besides the store handle and the logical key.

use serde::{Deserialize, Serialize};

use crate::consts::DEFAULT_PREFIX;

/// Which browser storage area backs the persisted record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum StorageType {
    /// Survives browser restarts (`localStorage`)
    #[default]
    Local,
    /// Cleared when the tab closes (`sessionStorage`)
    Session,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::Local => "LOCAL",
            StorageType::Session => "SESSION",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "local" => Some(StorageType::Local),
            "session" => Some(StorageType::Session),
            _ => None,
        }
    }
}

impl std::fmt::Display for StorageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adapter options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistConfig {
    /// Storage area selector
    pub storage: StorageType,
    /// Key namespace, joined to the logical key as `<prefix>@<key>`
    pub prefix: String,
    /// Passphrase for payload encryption. `None` stores plaintext JSON.
    pub passphrase: Option<String>,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            storage: StorageType::Local,
            prefix: DEFAULT_PREFIX.to_string(),
            passphrase: None,
        }
    }
}

impl PersistConfig {
    pub fn with_storage(mut self, storage: StorageType) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }

    /// Passphrase to derive a key from, if encryption is requested.
    /// An empty passphrase counts as none.
    pub fn effective_passphrase(&self) -> Option<&str> {
        self.passphrase.as_deref().filter(|p| !p.is_empty())
    }
}
