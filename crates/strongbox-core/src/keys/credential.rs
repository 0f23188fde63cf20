//! Platform credential store abstraction.
//!
//! The database cipher key lives in the platform secure store (Keychain,
//! Secret Service, Credential Manager) behind the [`CredentialStore`] trait.
//! A locked store is a distinct, retryable condition and must never be
//! confused with corrupt or missing key material.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::{Engine as _, engine::general_purpose};
use keyring::Entry;

/// Credential store access error.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The store exists but cannot be read right now (e.g. the keychain is
    /// still locked after a device restart). Retryable by user action.
    #[error("credential store is locked")]
    Locked,
    /// The stored payload is present but not decodable.
    #[error("credential payload is malformed: {0}")]
    Malformed(String),
    /// Any other backend failure.
    #[error("credential store error: {0}")]
    Backend(String),
}

/// Byte-oriented secure credential storage.
///
/// `get` distinguishes "no such entry" (`Ok(None)`) from "store locked"
/// (`Err(Locked)`). `delete` of an absent entry succeeds.
pub trait CredentialStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, CredentialError>;
    fn set(&self, name: &str, value: &[u8]) -> Result<(), CredentialError>;
    fn delete(&self, name: &str) -> Result<(), CredentialError>;
}

/// Credential store backed by the OS keyring.
///
/// Payloads are base64-encoded since keyring entries are strings.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> Result<Entry, CredentialError> {
        Entry::new(&self.service, name).map_err(|e| CredentialError::Backend(e.to_string()))
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, CredentialError> {
        match self.entry(name)?.get_password() {
            Ok(encoded) => {
                let decoded = general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| CredentialError::Malformed(e.to_string()))?;
                Ok(Some(decoded))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::NoStorageAccess(_)) => Err(CredentialError::Locked),
            Err(e) => Err(CredentialError::Backend(e.to_string())),
        }
    }

    fn set(&self, name: &str, value: &[u8]) -> Result<(), CredentialError> {
        let encoded = general_purpose::STANDARD.encode(value);
        match self.entry(name)?.set_password(&encoded) {
            Ok(()) => Ok(()),
            Err(keyring::Error::NoStorageAccess(_)) => Err(CredentialError::Locked),
            Err(e) => Err(CredentialError::Backend(e.to_string())),
        }
    }

    fn delete(&self, name: &str) -> Result<(), CredentialError> {
        match self.entry(name)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(keyring::Error::NoStorageAccess(_)) => Err(CredentialError::Locked),
            Err(e) => Err(CredentialError::Backend(e.to_string())),
        }
    }
}

/// In-memory credential store with a toggleable lock, for tests and for
/// embedders that manage key material themselves.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    locked: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the platform store becoming locked/unlocked.
    pub fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    fn check_locked(&self) -> Result<(), CredentialError> {
        if self.locked.load(Ordering::SeqCst) {
            Err(CredentialError::Locked)
        } else {
            Ok(())
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, CredentialError> {
        self.check_locked()?;
        Ok(self.entries().get(name).cloned())
    }

    fn set(&self, name: &str, value: &[u8]) -> Result<(), CredentialError> {
        self.check_locked()?;
        self.entries().insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), CredentialError> {
        self.check_locked()?;
        self.entries().remove(name);
        Ok(())
    }
}
