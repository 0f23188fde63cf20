//! Connection pool and transactional connections.
//!
//! The pool hands out independently-transactable connections bound to one
//! keyed [`DatabaseHandle`]. It imposes no cap; every connection must be
//! dropped by its caller when done; a leaked connection is a caller bug,
//! not a pool-detected error. Each connection is single-threaded-use.
//!
//! Before permitting a write, a connection consults the injected
//! [`ReadinessProbe`]. Writes issued before all extension registrations
//! complete fail with [`StorageError::NotReady`] when enforcement is on;
//! otherwise they are logged and allowed through. The reserved registration
//! connection is exempt, since schema setup has to write before readiness by
//! definition.

use std::sync::Arc;

use rusqlite::TransactionBehavior;

use super::db::DatabaseHandle;
use super::readiness::ReadinessProbe;
use super::{Result, StorageError};

#[derive(Clone, Copy, PartialEq, Eq)]
enum ConnectionKind {
    Regular,
    Registration,
}

/// Factory for [`Connection`]s against one storage instance.
#[derive(Clone)]
pub struct ConnectionPool {
    handle: Arc<DatabaseHandle>,
    probe: ReadinessProbe,
    enforce_gate: bool,
}

impl ConnectionPool {
    pub(crate) fn new(handle: Arc<DatabaseHandle>, probe: ReadinessProbe, enforce_gate: bool) -> Self {
        Self {
            handle,
            probe,
            enforce_gate,
        }
    }

    /// A new general-purpose connection, subject to the readiness write-gate.
    pub fn connection(&self) -> Result<Connection> {
        self.open(ConnectionKind::Regular)
    }

    /// The reserved schema-setup connection, exempt from the write-gate.
    pub fn registration_connection(&self) -> Result<Connection> {
        self.open(ConnectionKind::Registration)
    }

    fn open(&self, kind: ConnectionKind) -> Result<Connection> {
        Ok(Connection {
            conn: self.handle.connect()?,
            probe: self.probe.clone(),
            enforce_gate: self.enforce_gate,
            kind,
        })
    }
}

/// A transactable lease on the database. Not for concurrent sharing; run it
/// on one thread and drop it when done.
pub struct Connection {
    conn: rusqlite::Connection,
    probe: ReadinessProbe,
    enforce_gate: bool,
    kind: ConnectionKind,
}

impl Connection {
    /// Run `f` inside a read (deferred) transaction.
    pub fn read_transaction<T>(
        &mut self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Deferred)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` inside a write (immediate) transaction.
    ///
    /// Checked against the readiness gate first; see the module docs for the
    /// enforcement policy.
    pub fn write_transaction<T>(
        &mut self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        if self.kind != ConnectionKind::Registration && !self.probe.all_registrations_complete() {
            if self.enforce_gate {
                return Err(StorageError::NotReady);
            }
            tracing::warn!("write on a general connection before storage readiness");
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}
