//! Per-instance storage facade.
//!
//! [`Storage::setup`] orchestrates the whole bring-up for one instance:
//! cipher key retrieval, keyed open, pool construction, then extension
//! registration (synchronous first, asynchronous enqueued) before sealing the
//! instance at the readiness gate. Key and open failures are fatal to the
//! instance and surface to the caller; registration failures are recorded on
//! their records and surface only by holding readiness at false.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use directories::ProjectDirs;

use crate::keys::KeyProvider;

use super::db::DatabaseHandle;
use super::pool::{Connection, ConnectionPool};
use super::readiness::ReadinessGate;
use super::registry::{Extension, ExtensionRegistry, ExtensionState};
use super::{Result, StorageError};

/// Configuration for one storage instance.
#[derive(Clone)]
pub struct StorageConfig {
    /// Database file path. `None` uses the platform data directory.
    pub path: Option<PathBuf>,
    /// Instance name, unique per readiness gate.
    pub instance: String,
    /// Whether writes on general connections are rejected before readiness.
    ///
    /// Runtime-configurable so tests can toggle it. The default is
    /// `cfg!(debug_assertions)`: debug builds enforce, release builds log
    /// the premature write and proceed.
    pub enforce_readiness_gate: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            instance: "primary".to_string(),
            enforce_readiness_gate: cfg!(debug_assertions),
        }
    }
}

/// Declarative extension set for setup: synchronous registrations run inline
/// and in order, asynchronous ones are enqueued after them.
#[derive(Default)]
pub struct ExtensionPlan {
    sync: Vec<(String, Arc<dyn Extension>)>,
    background: Vec<(String, Arc<dyn Extension>)>,
}

impl ExtensionPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an extension registered synchronously during setup.
    pub fn sync_extension(mut self, name: impl Into<String>, extension: Arc<dyn Extension>) -> Self {
        self.sync.push((name.into(), extension));
        self
    }

    /// Add an extension registered on the background execution context.
    pub fn async_extension(mut self, name: impl Into<String>, extension: Arc<dyn Extension>) -> Self {
        self.background.push((name.into(), extension));
        self
    }
}

/// One logical encrypted database: key lifecycle, pool, extensions,
/// diagnostics.
pub struct Storage {
    config: StorageConfig,
    db_path: PathBuf,
    handle: Arc<DatabaseHandle>,
    pool: ConnectionPool,
    registry: ExtensionRegistry,
    gate: ReadinessGate,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Bring up this instance end to end.
    ///
    /// Fails fast on key retrieval ([`KeyError`](crate::keys::KeyError)
    /// mapped through [`StorageError::Key`]) and on open; never falls back to
    /// an unencrypted or default-keyed database. Extension failures do not
    /// fail setup; they freeze readiness instead.
    pub fn setup(
        config: StorageConfig,
        keys: &KeyProvider,
        gate: &ReadinessGate,
        extensions: ExtensionPlan,
    ) -> Result<Self> {
        let db_path = resolve_db_path(config.path.clone())?;
        let key = keys.get_or_create_key()?;
        let handle = Arc::new(DatabaseHandle::open(&db_path, &key)?);

        let instance = gate.register_instance(&config.instance)?;
        let pool = ConnectionPool::new(
            Arc::clone(&handle),
            gate.probe(),
            config.enforce_readiness_gate,
        );
        let registry = ExtensionRegistry::new(pool.clone(), instance.clone());

        for (name, extension) in extensions.sync {
            registry.register(&name, extension);
        }
        for (name, extension) in extensions.background {
            registry.register_async(&name, extension);
        }
        instance.seal();

        tracing::info!(
            instance = %config.instance,
            path = %db_path.display(),
            "storage instance set up"
        );

        Ok(Self {
            config,
            db_path,
            handle,
            pool,
            registry,
            gate: gate.clone(),
        })
    }

    pub fn instance_name(&self) -> &str {
        &self.config.instance
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Whether the process-wide readiness gate has flipped.
    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    /// A new general-purpose connection.
    pub fn connection(&self) -> Result<Connection> {
        self.pool.connection()
    }

    /// The reserved schema-setup connection, exempt from the write-gate.
    pub fn registration_connection(&self) -> Result<Connection> {
        self.pool.registration_connection()
    }

    /// Register an extension synchronously. See [`ExtensionRegistry::register`].
    pub fn register_extension(&self, name: &str, extension: Arc<dyn Extension>) -> bool {
        self.registry.register(name, extension)
    }

    /// Register an extension in the background. See
    /// [`ExtensionRegistry::register_async`].
    pub fn register_extension_async(&self, name: &str, extension: Arc<dyn Extension>) {
        self.registry.register_async(name, extension);
    }

    /// The registered extension object, if available.
    pub fn registered_extension(&self, name: &str) -> Option<Arc<dyn Extension>> {
        self.registry.registered_extension(name)
    }

    /// Lifecycle state of an extension record.
    pub fn extension_state(&self, name: &str) -> Option<ExtensionState> {
        self.registry.extension_state(name)
    }

    /// Size of the primary database file in bytes, 0 if absent.
    pub fn db_file_size(&self) -> u64 {
        self.handle.db_file_size()
    }

    /// Size of the write-ahead log in bytes, 0 if absent.
    pub fn wal_file_size(&self) -> u64 {
        self.handle.wal_file_size()
    }

    /// Size of the shared-memory index file in bytes, 0 if absent.
    pub fn shm_file_size(&self) -> u64 {
        self.handle.shm_file_size()
    }

    /// Log the three on-disk artifact sizes.
    pub fn log_file_sizes(&self) {
        tracing::info!(
            instance = %self.config.instance,
            db = self.db_file_size(),
            wal = self.wal_file_size(),
            shm = self.shm_file_size(),
            "storage file sizes"
        );
    }

    /// Delete this instance's on-disk artifacts. Consumes the instance so no
    /// live facade can outlast its files.
    pub(crate) fn delete_files(self) -> Result<()> {
        let Storage {
            db_path,
            handle,
            pool,
            registry,
            ..
        } = self;
        let wal = handle.wal_path();
        let shm = handle.shm_path();
        drop(registry);
        drop(pool);
        drop(handle);

        for path in [db_path, wal, shm] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StorageError::ResetFailed(format!(
                        "{}: {e}",
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Tear down every given instance and revert the gate to unready.
///
/// Destructive and irreversible: database, WAL, and SHM files are deleted.
/// In-flight background registrations from before the reset are ignored when
/// they complete. If any deletion fails the gate is left in its loud
/// [`reset_failed`](ReadinessGate::reset_failed) state and
/// [`StorageError::ResetFailed`] is returned. A half-deleted database must
/// never pass for a healthy one.
pub fn reset_all<I>(gate: &ReadinessGate, storages: I) -> Result<()>
where
    I: IntoIterator<Item = Storage>,
{
    gate.begin_reset();

    let mut failures = Vec::new();
    for storage in storages {
        let shown = storage.path().display().to_string();
        if let Err(e) = storage.delete_files() {
            failures.push(format!("{shown}: {e}"));
        }
    }

    if failures.is_empty() {
        tracing::info!("all storage instances reset");
        Ok(())
    } else {
        gate.mark_reset_failed();
        Err(StorageError::ResetFailed(failures.join("; ")))
    }
}

fn resolve_db_path(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(p) => Ok(p),
        None => {
            let proj_dirs = ProjectDirs::from("com", "strongbox", "core").ok_or_else(|| {
                StorageError::Init("Could not determine project directories".to_string())
            })?;
            Ok(proj_dirs.data_dir().join("strongbox.db"))
        }
    }
}
