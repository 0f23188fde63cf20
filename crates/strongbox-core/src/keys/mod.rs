//! Cipher key lifecycle.
//!
//! The database cipher key is a 32-byte secret held in the platform secure
//! store as a versioned key-spec record. [`KeyProvider`] retrieves it,
//! provisions a fresh key on first run, and migrates a legacy raw-passphrase
//! entry to the current representation.
//!
//! Two failure conditions are deliberately distinct:
//! - [`KeyError::Unavailable`]: the secure store is locked (e.g. right after
//!   a device restart). Transient; the caller retries after unlock.
//! - [`KeyError::Corrupt`]: key material is present but unreadable. Fatal for
//!   the instance. The provider never regenerates a key over an existing
//!   record, which would orphan all encrypted data on disk.

mod credential;

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub use credential::{CredentialError, CredentialStore, KeyringStore, MemoryStore};

/// Cipher key length in bytes (SQLCipher raw key).
pub const KEY_LEN: usize = 32;

/// Current on-store key-spec record version.
const KEY_SPEC_VERSION: u32 = 1;

/// Default credential entry holding the current key-spec record.
pub const KEY_SPEC_ENTRY: &str = "database_key_spec";

/// Default credential entry holding the legacy raw passphrase.
pub const LEGACY_KEY_ENTRY: &str = "database_passphrase";

/// The database cipher key. Zeroed on drop; never printed.
pub struct EncryptionKey(Zeroizing<[u8; KEY_LEN]>);

impl EncryptionKey {
    /// Generate a fresh random key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(Zeroizing::new(bytes))
    }

    /// Wrap existing key material, validating its length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| KeyError::Corrupt(format!("expected {KEY_LEN}-byte key, got {}", bytes.len())))?;
        Ok(Self(Zeroizing::new(bytes)))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

/// Key retrieval error.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The secure store is locked; retry after the user unlocks it.
    #[error("cipher key is unavailable: credential store is locked")]
    Unavailable,
    /// Key material exists but is unreadable. Fatal for this instance.
    #[error("stored cipher key is corrupt: {0}")]
    Corrupt(String),
    /// No key record exists under the requested entry.
    #[error("no cipher key present under entry '{0}'")]
    NotFound(String),
    /// Backend failure unrelated to lock state.
    #[error("credential store error: {0}")]
    Store(String),
}

/// Persisted representation of the cipher key.
#[derive(Serialize, Deserialize)]
struct KeySpecRecord {
    version: u32,
    key: String,
}

/// Retrieves, provisions, and migrates the database cipher key.
pub struct KeyProvider {
    store: Arc<dyn CredentialStore>,
    key_entry: String,
    legacy_entry: String,
}

impl KeyProvider {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self::with_entries(store, KEY_SPEC_ENTRY, LEGACY_KEY_ENTRY)
    }

    pub fn with_entries(
        store: Arc<dyn CredentialStore>,
        key_entry: impl Into<String>,
        legacy_entry: impl Into<String>,
    ) -> Self {
        Self {
            store,
            key_entry: key_entry.into(),
            legacy_entry: legacy_entry.into(),
        }
    }

    /// Whether the key could currently be read from the secure store.
    ///
    /// False when the store is locked, errors, or holds no key yet. A
    /// non-destructive probe; callers use it to decide whether to attempt
    /// setup or wait for an unlock.
    pub fn is_key_accessible(&self) -> bool {
        matches!(self.store.get(&self.key_entry), Ok(Some(_)))
    }

    /// Retrieve the cipher key, migrating or provisioning as needed.
    ///
    /// Resolution order: current key-spec record, then legacy passphrase
    /// (migrated to the current representation), then a freshly generated
    /// key persisted before being returned.
    pub fn get_or_create_key(&self) -> Result<EncryptionKey, KeyError> {
        match self.store.get(&self.key_entry) {
            Ok(Some(bytes)) => {
                let key = parse_key_spec(&bytes)?;
                // A leftover legacy entry means a prior migration was cut off
                // between the spec write and the legacy delete. Converge.
                if let Err(e) = self.remove_legacy_key() {
                    tracing::warn!("could not clear legacy key entry: {e}");
                }
                Ok(key)
            }
            Ok(None) => match self.load_legacy_key() {
                Ok(key) => {
                    tracing::info!("migrating legacy cipher key to key-spec record");
                    self.commit_new_key(&key)?;
                    Ok(key)
                }
                Err(KeyError::NotFound(_)) => {
                    let key = EncryptionKey::generate();
                    self.store_key_spec(&key)?;
                    tracing::info!("provisioned fresh database cipher key");
                    Ok(key)
                }
                Err(e) => Err(e),
            },
            Err(CredentialError::Locked) => Err(KeyError::Unavailable),
            Err(CredentialError::Malformed(m)) => Err(KeyError::Corrupt(m)),
            Err(CredentialError::Backend(m)) => Err(KeyError::Store(m)),
        }
    }

    /// Read the legacy raw-passphrase entry, if present.
    pub fn load_legacy_key(&self) -> Result<EncryptionKey, KeyError> {
        match self.store.get(&self.legacy_entry) {
            Ok(Some(bytes)) => EncryptionKey::from_bytes(&bytes),
            Ok(None) => Err(KeyError::NotFound(self.legacy_entry.clone())),
            Err(CredentialError::Locked) => Err(KeyError::Unavailable),
            Err(CredentialError::Malformed(m)) => Err(KeyError::Corrupt(m)),
            Err(CredentialError::Backend(m)) => Err(KeyError::Store(m)),
        }
    }

    /// Atomically adopt `key` as the current key and retire the legacy entry.
    ///
    /// Idempotent under retry: the spec record is written first, the legacy
    /// entry deleted second, and both steps tolerate re-execution. At no
    /// point is neither representation present.
    pub fn commit_new_key(&self, key: &EncryptionKey) -> Result<(), KeyError> {
        self.store_key_spec(key)?;
        self.remove_legacy_key()
    }

    /// Delete the legacy passphrase entry. Absent entries succeed.
    pub fn remove_legacy_key(&self) -> Result<(), KeyError> {
        match self.store.delete(&self.legacy_entry) {
            Ok(()) => Ok(()),
            Err(CredentialError::Locked) => Err(KeyError::Unavailable),
            Err(e) => Err(KeyError::Store(e.to_string())),
        }
    }

    /// Persist `key` as the current key-spec record.
    pub fn store_key_spec(&self, key: &EncryptionKey) -> Result<(), KeyError> {
        let record = KeySpecRecord {
            version: KEY_SPEC_VERSION,
            key: general_purpose::STANDARD.encode(key.as_bytes()),
        };
        let payload = serde_json::to_vec(&record).map_err(|e| KeyError::Store(e.to_string()))?;
        match self.store.set(&self.key_entry, &payload) {
            Ok(()) => Ok(()),
            Err(CredentialError::Locked) => Err(KeyError::Unavailable),
            Err(e) => Err(KeyError::Store(e.to_string())),
        }
    }
}

fn parse_key_spec(bytes: &[u8]) -> Result<EncryptionKey, KeyError> {
    let record: KeySpecRecord =
        serde_json::from_slice(bytes).map_err(|e| KeyError::Corrupt(format!("bad key-spec record: {e}")))?;
    if record.version != KEY_SPEC_VERSION {
        return Err(KeyError::Corrupt(format!(
            "unsupported key-spec version {}",
            record.version
        )));
    }
    let raw = general_purpose::STANDARD
        .decode(&record.key)
        .map_err(|e| KeyError::Corrupt(format!("bad key encoding: {e}")))?;
    EncryptionKey::from_bytes(&raw)
}
