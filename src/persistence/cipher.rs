//! Optional payload encryption
//!
//! Records are `base64(nonce || ciphertext || tag)` under AES-256-GCM with a
//! key derived from a passphrase via PBKDF2-HMAC-SHA256. Until a key is ready
//! the cipher passes data through untouched.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use sha2::Sha256;

use crate::consts::{KDF_ITERATIONS, KDF_SALT, KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::error::CipherError;

/// Observable cipher lifecycle.
///
/// `Unconfigured -> Configuring -> Ready`, or `Configuring -> Failed` when
/// derivation fails. Everything except `Ready` is pass-through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherState {
    Unconfigured,
    Configuring,
    Ready,
    Failed,
}

enum KeyState {
    Unconfigured,
    Configuring,
    Ready(Box<Aes256Gcm>),
    Failed,
}

/// Encrypts outgoing records and decrypts incoming ones
pub struct Cipher {
    key: RefCell<KeyState>,
}

impl Default for Cipher {
    fn default() -> Self {
        Self::unconfigured()
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").field("state", &self.state()).finish()
    }
}

impl Cipher {
    /// Pass-through cipher
    pub fn unconfigured() -> Self {
        Self {
            key: RefCell::new(KeyState::Unconfigured),
        }
    }

    /// Cipher with a key derived synchronously from `passphrase`
    pub fn from_passphrase(passphrase: &str) -> Result<Self, CipherError> {
        Ok(Self::with_key(derive_key(passphrase)?))
    }

    pub(crate) fn with_key(key: Aes256Gcm) -> Self {
        Self {
            key: RefCell::new(KeyState::Ready(Box::new(key))),
        }
    }

    pub fn state(&self) -> CipherState {
        match &*self.key.borrow() {
            KeyState::Unconfigured => CipherState::Unconfigured,
            KeyState::Configuring => CipherState::Configuring,
            KeyState::Ready(_) => CipherState::Ready,
            KeyState::Failed => CipherState::Failed,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == CipherState::Ready
    }

    /// Move to `Configuring` now and return the task that derives the key.
    ///
    /// The returned future settles the cipher in `Ready` or `Failed`.
    pub fn configure(self: &Rc<Self>, passphrase: String) -> impl Future<Output = ()> + use<> {
        *self.key.borrow_mut() = KeyState::Configuring;
        let cipher = Rc::clone(self);
        async move {
            match derive_key(&passphrase) {
                Ok(key) => {
                    *cipher.key.borrow_mut() = KeyState::Ready(Box::new(key));
                    log::debug!("Encryption key ready");
                }
                Err(e) => {
                    *cipher.key.borrow_mut() = KeyState::Failed;
                    log::error!("Encryption setup failed, storing plaintext: {}", e);
                }
            }
        }
    }

    /// Encrypt `plaintext` into a text record, or return it unchanged when no
    /// key is ready. Every call draws a fresh nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let guard = self.key.borrow();
        let KeyState::Ready(key) = &*guard else {
            return Ok(plaintext.to_string());
        };

        let mut nonce = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        let ciphertext = key
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;

        let mut envelope = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(&envelope))
    }

    /// Decrypt a record. `None` on any failure; the input unchanged when no
    /// key is ready.
    pub fn decrypt(&self, record: &str) -> Option<String> {
        if !self.is_ready() {
            return Some(record.to_string());
        }
        match self.try_decrypt(record) {
            Ok(plaintext) => Some(plaintext),
            Err(e) => {
                log::error!("Decryption failed: {}", e);
                None
            }
        }
    }

    /// Decrypt a record, reporting why it failed
    pub fn try_decrypt(&self, record: &str) -> Result<String, CipherError> {
        let guard = self.key.borrow();
        let KeyState::Ready(key) = &*guard else {
            return Ok(record.to_string());
        };

        let envelope = BASE64.decode(record.trim())?;
        if envelope.len() < NONCE_LEN + TAG_LEN {
            return Err(CipherError::Truncated {
                len: envelope.len(),
            });
        }

        let (nonce, ciphertext) = envelope.split_at(NONCE_LEN);
        let plaintext = key
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decrypt)?;
        Ok(String::from_utf8(plaintext)?)
    }
}

/// PBKDF2-HMAC-SHA256 over the fixed salt, feeding an AES-256-GCM key
pub(crate) fn derive_key(passphrase: &str) -> Result<Aes256Gcm, CipherError> {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        passphrase.as_bytes(),
        KDF_SALT.as_bytes(),
        KDF_ITERATIONS,
        &mut key,
    );
    Aes256Gcm::new_from_slice(&key).map_err(|e| CipherError::KeyDerivation(e.to_string()))
}
