//! # Strongbox Core
//!
//! Readiness-gated coordination layer over an encrypted embedded SQLite
//! store. Strongbox does not reimplement a storage engine; it coordinates
//! one:
//!
//! - **Cipher key lifecycle**: the 32-byte SQLCipher key lives in the
//!   platform secure store, is provisioned on first run, and migrates from a
//!   legacy passphrase representation. A locked keychain is a retryable
//!   condition, distinct from corrupt key material, which is fatal and never
//!   silently regenerated.
//! - **Readiness gate**: writes are held until every schema extension across
//!   every storage instance has finished registering. The flip to ready
//!   happens exactly once, is broadcast over a watch channel, and reverts
//!   only on explicit destructive reset.
//! - **Extension registration**: named secondary structures register either
//!   synchronously (blocking, for setup-critical schema) or on a background
//!   task, each walking `Pending → Registering → {Registered | Failed}`.
//! - **Diagnostics**: database, WAL, and SHM file sizes are non-blocking
//!   reads that degrade to zero for absent files and never fail.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strongbox_core::{
//!     ExtensionPlan, KeyProvider, KeyringStore, ReadinessGate, Storage, StorageConfig,
//! };
//!
//! let keys = KeyProvider::new(Arc::new(KeyringStore::new("com.example.app")));
//! let gate = ReadinessGate::new();
//!
//! let storage = Storage::setup(
//!     StorageConfig::default(),
//!     &keys,
//!     &gate,
//!     ExtensionPlan::new()
//!         .sync_extension("message_index", Arc::new(MessageIndex))
//!         .async_extension("fulltext", Arc::new(FulltextView)),
//! )?;
//!
//! // Block user-facing functionality until the gate flips.
//! assert!(gate.is_ready());
//! let mut conn = storage.connection()?;
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlcipher` (default): compile SQLCipher in via rusqlite; no
//!   system dependency.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod keys;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Key lifecycle
pub use keys::{
    CredentialError, CredentialStore, EncryptionKey, KeyError, KeyProvider, KeyringStore,
    MemoryStore,
};

// Storage layer
pub use storage::{
    Connection, ConnectionPool, Extension, ExtensionPlan, ExtensionRegistry, ExtensionState,
    ReadinessGate, ReadinessProbe, Result, Storage, StorageConfig, StorageError, reset_all,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
