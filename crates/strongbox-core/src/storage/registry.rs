//! Schema extension registration.
//!
//! An extension is a named secondary structure (index, view, derived table)
//! layered on the base store. Each registration walks a strict state machine,
//! `Pending → Registering → {Registered | Failed}`, mutated only under the
//! registry's single lock so near-simultaneous completions cannot lose
//! updates. `Failed` is terminal: there is no automatic retry, and a failed
//! record freezes readiness for its instance until a destructive reset.
//!
//! Registration comes in two explicit shapes rather than one flag-switched
//! method: [`ExtensionRegistry::register`] blocks the caller and returns the
//! outcome; [`ExtensionRegistry::register_async`] enqueues onto a background
//! blocking task and reports its outcome to the readiness gate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::params;

use super::Result;
use super::pool::{Connection, ConnectionPool};
use super::readiness::InstanceHandle;

/// A named schema extension. Implementations run their DDL against the
/// reserved registration connection handed to `install`.
pub trait Extension: Send + Sync + 'static {
    fn install(&self, conn: &mut Connection) -> Result<()>;
}

/// Registration lifecycle of one extension record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionState {
    Pending,
    Registering,
    Registered,
    Failed,
}

struct ExtensionRecord {
    state: ExtensionState,
    extension: Option<Arc<dyn Extension>>,
    registered_at: Option<DateTime<Utc>>,
}

struct RegistryInner {
    records: Mutex<HashMap<String, ExtensionRecord>>,
    pool: ConnectionPool,
    instance: InstanceHandle,
}

/// Tracks extension records for one storage instance.
#[derive(Clone)]
pub struct ExtensionRegistry {
    inner: Arc<RegistryInner>,
}

impl ExtensionRegistry {
    pub(crate) fn new(pool: ConnectionPool, instance: InstanceHandle) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                records: Mutex::new(HashMap::new()),
                pool,
                instance,
            }),
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, ExtensionRecord>> {
        match self.inner.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register `extension` synchronously, blocking until it reaches a
    /// terminal state. Returns whether it registered. Intended for
    /// extensions that must exist before any other access.
    pub fn register(&self, name: &str, extension: Arc<dyn Extension>) -> bool {
        if !self.begin(name) {
            return false;
        }
        self.run(name, extension)
    }

    /// Enqueue `extension` for background registration. Does not block; the
    /// outcome is reported to the readiness gate. Requires an ambient tokio
    /// runtime; without one the registration runs inline as a logged
    /// degradation.
    pub fn register_async(&self, name: &str, extension: Arc<dyn Extension>) {
        if !self.begin(name) {
            return;
        }
        let registry = self.clone();
        let name = name.to_string();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || {
                    registry.run(&name, extension);
                });
            }
            Err(_) => {
                tracing::warn!(
                    extension = %name,
                    "no tokio runtime; running async registration inline"
                );
                registry.run(&name, extension);
            }
        }
    }

    /// The registered extension object, if registration has completed
    /// successfully. Non-blocking; absence is the normal answer for a
    /// pending, in-flight, or failed extension.
    pub fn registered_extension(&self, name: &str) -> Option<Arc<dyn Extension>> {
        let records = self.records();
        let record = records.get(name)?;
        match record.state {
            ExtensionState::Registered => record.extension.clone(),
            _ => None,
        }
    }

    /// Current lifecycle state of an extension record, if one exists.
    pub fn extension_state(&self, name: &str) -> Option<ExtensionState> {
        self.records().get(name).map(|r| r.state)
    }

    /// Create the Pending record and account for it at the gate. Returns
    /// false (and touches nothing) for a duplicate name.
    fn begin(&self, name: &str) -> bool {
        let mut records = self.records();
        if records.contains_key(name) {
            tracing::warn!(extension = name, "duplicate extension registration ignored");
            return false;
        }
        records.insert(
            name.to_string(),
            ExtensionRecord {
                state: ExtensionState::Pending,
                extension: None,
                registered_at: None,
            },
        );
        drop(records);
        self.inner.instance.note_enqueued();
        true
    }

    /// Drive one record from Pending to its terminal state.
    fn run(&self, name: &str, extension: Arc<dyn Extension>) -> bool {
        self.set_state(name, ExtensionState::Registering);

        let outcome = self
            .inner
            .pool
            .registration_connection()
            .and_then(|mut conn| {
                extension.install(&mut conn)?;
                Ok(conn)
            });

        match outcome {
            Ok(mut conn) => {
                let now = Utc::now();
                if let Err(e) = record_in_ledger(&mut conn, name, now) {
                    // Ledger is diagnostics only; the extension itself is live.
                    tracing::warn!(extension = name, "could not record extension in ledger: {e}");
                }
                let mut records = self.records();
                if let Some(record) = records.get_mut(name) {
                    record.state = ExtensionState::Registered;
                    record.extension = Some(extension);
                    record.registered_at = Some(now);
                }
                drop(records);
                tracing::info!(extension = name, "extension registered");
                self.inner.instance.note_result(true);
                true
            }
            Err(e) => {
                tracing::warn!(extension = name, "extension registration failed: {e}");
                self.set_state(name, ExtensionState::Failed);
                self.inner.instance.note_result(false);
                false
            }
        }
    }

    fn set_state(&self, name: &str, state: ExtensionState) {
        if let Some(record) = self.records().get_mut(name) {
            record.state = state;
        }
    }
}

fn record_in_ledger(conn: &mut Connection, name: &str, at: DateTime<Utc>) -> Result<()> {
    let stamp = at.to_rfc3339();
    conn.write_transaction(|tx| {
        tx.execute(
            "INSERT INTO registered_extensions (name, first_registered_at, last_registered_at)
             VALUES (?1, ?2, ?2)
             ON CONFLICT(name) DO UPDATE SET last_registered_at = excluded.last_registered_at",
            params![name, stamp],
        )?;
        Ok(())
    })
}
