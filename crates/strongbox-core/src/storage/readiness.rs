//! Process-wide readiness coordination.
//!
//! Readiness is explicit state owned by a [`ReadinessGate`] value, not an
//! ambient global: tests run several independent gates in one process. The
//! gate flips to ready exactly once, when every registered storage instance
//! has been sealed and every one of its extensions reached `Registered`. A
//! single `Failed` extension anywhere freezes readiness at false, because a broken
//! schema must not let the application proceed.
//!
//! The flag and its broadcast move under one lock, so there is no window in
//! which a subscriber can miss the flip: the watch channel retains the last
//! value and late subscribers observe `true` immediately.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::watch;

use super::{Result, StorageError};

#[derive(Default)]
struct InstanceProgress {
    /// True once the owning instance finished enqueueing its setup
    /// registrations. Unsealed instances hold readiness open even with zero
    /// outstanding records, so a slow setup cannot race the flip.
    sealed: bool,
    outstanding: usize,
    failed: usize,
}

struct GateState {
    /// Bumped on every reset; completions carrying an older epoch are stale
    /// and must not touch the rebuilt state.
    epoch: u64,
    ready: bool,
    reset_failed: bool,
    instances: HashMap<String, InstanceProgress>,
}

struct GateShared {
    state: Mutex<GateState>,
    ready_tx: watch::Sender<bool>,
}

fn lock_state(shared: &GateShared) -> MutexGuard<'_, GateState> {
    match shared.state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn recompute(state: &mut GateState, ready_tx: &watch::Sender<bool>) {
    if state.ready || state.instances.is_empty() {
        return;
    }
    let complete = state
        .instances
        .values()
        .all(|p| p.sealed && p.outstanding == 0 && p.failed == 0);
    if complete {
        state.ready = true;
        ready_tx.send_replace(true);
        tracing::info!("storage is ready: all extension registrations complete");
    }
}

/// Coordinator for the process-wide "storage is ready" predicate.
///
/// Cheap to clone; all clones share one underlying state.
#[derive(Clone)]
pub struct ReadinessGate {
    shared: Arc<GateShared>,
}

impl ReadinessGate {
    pub fn new() -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(GateShared {
                state: Mutex::new(GateState {
                    epoch: 0,
                    ready: false,
                    reset_failed: false,
                    instances: HashMap::new(),
                }),
                ready_tx,
            }),
        }
    }

    /// True iff every known storage instance has every extension registered.
    pub fn is_ready(&self) -> bool {
        lock_state(&self.shared).ready
    }

    /// True iff the last destructive reset did not complete. A loud,
    /// distinct state: the on-disk database must not be mistaken for healthy.
    pub fn reset_failed(&self) -> bool {
        lock_state(&self.shared).reset_failed
    }

    /// Subscribe to the readiness broadcast.
    ///
    /// The channel retains the current value: a subscriber arriving after the
    /// flip sees `true` without waiting for another event.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shared.ready_tx.subscribe()
    }

    /// A non-owning readiness capability for connection write-gating.
    pub fn probe(&self) -> ReadinessProbe {
        ReadinessProbe {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub(crate) fn register_instance(&self, name: &str) -> Result<InstanceHandle> {
        let mut state = lock_state(&self.shared);
        if state.instances.contains_key(name) {
            return Err(StorageError::Init(format!(
                "storage instance '{name}' is already registered"
            )));
        }
        if state.ready {
            // Setup after the flip cannot un-flip readiness (monotonic);
            // sequencing setup before readiness consumption is the
            // integrator's contract.
            tracing::warn!(instance = name, "instance registered after readiness flip");
        }
        state.instances.insert(name.to_string(), InstanceProgress::default());
        Ok(InstanceHandle {
            shared: Arc::downgrade(&self.shared),
            name: name.to_string(),
            epoch: state.epoch,
        })
    }

    /// Begin a destructive reset: invalidate every instance and revert
    /// readiness to false. In-flight registration completions from before
    /// this point are ignored via the epoch tag.
    pub(crate) fn begin_reset(&self) {
        let mut state = lock_state(&self.shared);
        state.epoch += 1;
        state.instances.clear();
        state.ready = false;
        state.reset_failed = false;
        self.shared.ready_tx.send_replace(false);
        tracing::info!(epoch = state.epoch, "storage readiness reset");
    }

    pub(crate) fn mark_reset_failed(&self) {
        let mut state = lock_state(&self.shared);
        state.reset_failed = true;
        tracing::warn!("destructive storage reset did not complete");
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-owning readiness query held by the connection pool.
///
/// Holds a weak reference: if the gate is gone the probe answers "not
/// complete" rather than dereferencing a dead coordinator.
#[derive(Clone)]
pub struct ReadinessProbe {
    shared: Weak<GateShared>,
}

impl ReadinessProbe {
    pub fn all_registrations_complete(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => lock_state(&shared).ready,
            None => false,
        }
    }
}

/// One storage instance's view of the gate. Carries the epoch at which the
/// instance registered; operations from a previous epoch are dropped.
#[derive(Clone)]
pub(crate) struct InstanceHandle {
    shared: Weak<GateShared>,
    name: String,
    epoch: u64,
}

impl InstanceHandle {
    fn with_current_state(&self, f: impl FnOnce(&mut GateState, &watch::Sender<bool>)) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let mut state = lock_state(&shared);
        if state.epoch != self.epoch {
            tracing::debug!(
                instance = %self.name,
                "stale registration event ignored after reset"
            );
            return;
        }
        f(&mut state, &shared.ready_tx);
    }

    /// A registration was enqueued for this instance.
    pub(crate) fn note_enqueued(&self) {
        self.with_current_state(|state, _| {
            if let Some(progress) = state.instances.get_mut(&self.name) {
                progress.outstanding += 1;
            }
        });
    }

    /// A registration reached its terminal state.
    pub(crate) fn note_result(&self, success: bool) {
        self.with_current_state(|state, ready_tx| {
            if let Some(progress) = state.instances.get_mut(&self.name) {
                progress.outstanding = progress.outstanding.saturating_sub(1);
                if !success {
                    progress.failed += 1;
                }
            }
            recompute(state, ready_tx);
        });
    }

    /// The instance finished enqueueing its setup registrations.
    pub(crate) fn seal(&self) {
        self.with_current_state(|state, ready_tx| {
            if let Some(progress) = state.instances.get_mut(&self.name) {
                progress.sealed = true;
            }
            recompute(state, ready_tx);
        });
    }
}
