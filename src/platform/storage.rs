//! Key-value storage areas
//!
//! The adapter never touches `window.localStorage` directly; it asks a
//! [`StorageProvider`] for the area matching its [`StorageType`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::config::StorageType;
use crate::error::StorageError;

/// A single string-to-string storage area
pub trait StorageArea {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

/// Hands out storage areas by scope
pub trait StorageProvider {
    fn area(&self, scope: StorageType) -> Result<Rc<dyn StorageArea>, StorageError>;
}

/// Browser `localStorage` / `sessionStorage`
#[cfg(target_arch = "wasm32")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserStorage;

#[cfg(target_arch = "wasm32")]
impl StorageProvider for BrowserStorage {
    fn area(&self, scope: StorageType) -> Result<Rc<dyn StorageArea>, StorageError> {
        let window = web_sys::window().ok_or(StorageError::Unavailable(scope))?;
        let storage = match scope {
            StorageType::Local => window.local_storage(),
            StorageType::Session => window.session_storage(),
        }
        .ok()
        .flatten()
        .ok_or(StorageError::Unavailable(scope))?;

        Ok(Rc::new(WebStorageArea { storage }))
    }
}

#[cfg(target_arch = "wasm32")]
struct WebStorageArea {
    storage: web_sys::Storage,
}

#[cfg(target_arch = "wasm32")]
impl StorageArea for WebStorageArea {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.storage.get_item(key).map_err(|e| StorageError::Read {
            key: key.to_string(),
            reason: format!("{:?}", e),
        })
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        // Throws QuotaExceededError when full
        self.storage.set_item(key, value).map_err(|e| StorageError::Write {
            key: key.to_string(),
            reason: format!("{:?}", e),
        })
    }
}

/// In-memory storage with a local and a session area.
///
/// Clones share the same areas, so a test can hand one clone to an adapter
/// and inspect records through another.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    local: Rc<MemoryArea>,
    session: Rc<MemoryArea>,
    disabled: Rc<Cell<bool>>,
}

#[derive(Default)]
struct MemoryArea {
    items: RefCell<HashMap<String, String>>,
    /// Max total bytes of keys + values
    quota: Cell<Option<usize>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn area_ref(&self, scope: StorageType) -> &Rc<MemoryArea> {
        match scope {
            StorageType::Local => &self.local,
            StorageType::Session => &self.session,
        }
    }

    /// Limit an area to `bytes`; writes that would exceed it fail
    pub fn set_quota(&self, scope: StorageType, bytes: Option<usize>) {
        self.area_ref(scope).quota.set(bytes);
    }

    /// Make every later `area` call fail, as when the browser blocks storage
    pub fn disable(&self) {
        self.disabled.set(true);
    }

    /// Read a record without going through an adapter
    pub fn raw_item(&self, scope: StorageType, key: &str) -> Option<String> {
        self.area_ref(scope).items.borrow().get(key).cloned()
    }

    /// Write a record without going through an adapter
    pub fn set_raw_item(&self, scope: StorageType, key: &str, value: &str) {
        self.area_ref(scope)
            .items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }

    pub fn len(&self, scope: StorageType) -> usize {
        self.area_ref(scope).items.borrow().len()
    }

    pub fn is_empty(&self, scope: StorageType) -> bool {
        self.len(scope) == 0
    }
}

impl StorageProvider for MemoryStorage {
    fn area(&self, scope: StorageType) -> Result<Rc<dyn StorageArea>, StorageError> {
        if self.disabled.get() {
            return Err(StorageError::Unavailable(scope));
        }
        let area: Rc<dyn StorageArea> = self.area_ref(scope).clone();
        Ok(area)
    }
}

impl StorageArea for MemoryArea {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.borrow().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.items.borrow_mut();
        if let Some(quota) = self.quota.get() {
            let used: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > quota {
                return Err(StorageError::Write {
                    key: key.to_string(),
                    reason: format!("quota of {} bytes exceeded", quota),
                });
            }
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }
}
