//! Test Storage Manager
//!
//! Provides isolated storage fixtures for end-to-end tests:
//! - Temporary encrypted databases cleaned up on drop
//! - An in-memory credential store with a toggleable lock
//! - Stub extensions: well-behaved, slow, and deliberately broken

use std::sync::Arc;
use std::time::Duration;

use strongbox_core::{
    Connection, CredentialStore, Extension, ExtensionPlan, KeyProvider, MemoryStore,
    ReadinessGate, Result, Storage, StorageConfig,
};
use tempfile::TempDir;

/// Manager for isolated test storage instances.
///
/// Each manager owns its own readiness gate and credential store, so tests
/// never interfere with one another. The temporary directory (and every
/// database file in it) is deleted when the manager is dropped.
pub struct TestStorageManager {
    pub gate: ReadinessGate,
    pub store: Arc<MemoryStore>,
    pub keys: KeyProvider,
    temp_dir: TempDir,
}

impl TestStorageManager {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Arc::new(MemoryStore::new());
        let keys = KeyProvider::new(store.clone() as Arc<dyn CredentialStore>);
        Self {
            gate: ReadinessGate::new(),
            store,
            keys,
            temp_dir,
        }
    }

    /// Configuration for an instance, with gate enforcement on.
    pub fn config(&self, instance: &str) -> StorageConfig {
        StorageConfig {
            path: Some(self.temp_dir.path().join(format!("{instance}.db"))),
            instance: instance.to_string(),
            enforce_readiness_gate: true,
        }
    }

    /// Bring up an instance against this manager's gate and key provider.
    pub fn setup(&self, instance: &str, plan: ExtensionPlan) -> Storage {
        Storage::setup(self.config(instance), &self.keys, &self.gate, plan)
            .expect("Failed to set up test storage")
    }

    /// Await the readiness broadcast.
    pub async fn wait_ready(&self) {
        let mut rx = self.gate.subscribe();
        while !*rx.borrow() {
            rx.changed().await.expect("readiness channel closed");
        }
    }
}

impl Default for TestStorageManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Extension that creates one table.
pub struct TableExtension {
    pub table: String,
}

impl TableExtension {
    pub fn new(table: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { table: table.into() })
    }
}

impl Extension for TableExtension {
    fn install(&self, conn: &mut Connection) -> Result<()> {
        conn.write_transaction(|tx| {
            tx.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY, body TEXT)",
                self.table
            ))?;
            Ok(())
        })
    }
}

/// Extension that sleeps before installing, to hold readiness open.
pub struct SlowExtension {
    pub table: String,
    pub delay: Duration,
}

impl SlowExtension {
    pub fn new(table: impl Into<String>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            table: table.into(),
            delay,
        })
    }
}

impl Extension for SlowExtension {
    fn install(&self, conn: &mut Connection) -> Result<()> {
        std::thread::sleep(self.delay);
        conn.write_transaction(|tx| {
            tx.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY)",
                self.table
            ))?;
            Ok(())
        })
    }
}

/// Extension whose installation always fails.
pub struct BrokenExtension;

impl BrokenExtension {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Extension for BrokenExtension {
    fn install(&self, _conn: &mut Connection) -> Result<()> {
        Err(strongbox_core::StorageError::Registration(
            "deliberately failing extension".into(),
        ))
    }
}
