//! Storage Module
//!
//! Coordination layer over the encrypted SQLite store:
//! - keyed database handle with WAL journaling
//! - readiness-gated connection pool
//! - sync/async schema extension registration
//! - per-instance facade with setup, diagnostics, and destructive reset

mod db;
mod facade;
mod migrations;
mod pool;
mod readiness;
mod registry;

pub use facade::{ExtensionPlan, Storage, StorageConfig, reset_all};
pub use migrations::{MIGRATIONS, Migration};
pub use pool::{Connection, ConnectionPool};
pub use readiness::{ReadinessGate, ReadinessProbe};
pub use registry::{Extension, ExtensionRegistry, ExtensionState};

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Cipher key retrieval error
    #[error("Key error: {0}")]
    Key(#[from] crate::keys::KeyError),
    /// The database could not be opened (disk, permissions, wrong key)
    #[error("Could not open database: {0}")]
    Open(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Write attempted on a gated connection before readiness
    #[error("Storage is not ready for writes")]
    NotReady,
    /// An extension's installation failed. Recorded on its record and never
    /// thrown across the async registration boundary; it surfaces by holding
    /// readiness at false.
    #[error("Extension registration failed: {0}")]
    Registration(String),
    /// Destructive reset did not complete
    #[error("Destructive reset did not complete: {0}")]
    ResetFailed(String),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;
