//! Coordinator adapter for managing global transaction lifecycle
//!
//! The CoordinatorAdapter wraps the external [`TransactionCoordinator`] and adds:
//! - Error normalization (every failure maps to one of the demarcation kinds)
//! - Transaction metrics (started, committed, rolled back, joined, suspended, resumed)
//! - Structured logging of every coordinator interaction

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use txguard_core::{
    RollbackCause, TransactionCoordinator, TransactionHandle, TxError, TxResult, XaParticipant,
};

#[derive(Default)]
struct Counters {
    active_count: AtomicU64,
    total_started: AtomicU64,
    total_committed: AtomicU64,
    total_rolled_back: AtomicU64,
    total_joined: AtomicU64,
    total_suspended: AtomicU64,
    total_resumed: AtomicU64,
}

/// Adapter around the external transaction coordinator
///
/// Cloning is cheap and every clone shares the same coordinator and metrics,
/// so resource adapters and interceptors can each hold one.
///
/// # Memory Ordering
///
/// The metric counters use Relaxed ordering: they are observational only
/// and do not synchronize any other memory operations.
#[derive(Clone)]
pub struct CoordinatorAdapter {
    coordinator: Arc<dyn TransactionCoordinator>,
    counters: Arc<Counters>,
}

impl fmt::Debug for CoordinatorAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorAdapter")
            .field("metrics", &self.metrics())
            .finish()
    }
}

impl CoordinatorAdapter {
    /// Wrap a coordinator
    pub fn new(coordinator: Arc<dyn TransactionCoordinator>) -> Self {
        Self {
            coordinator,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Begin a new global transaction
    ///
    /// # Errors
    /// * `CoordinatorUnavailable` - the coordinator could not allocate one
    /// * `CoordinatorTimeout` - the coordinator hit its own deadline
    pub fn begin(&self) -> TxResult<TransactionHandle> {
        match self.coordinator.begin() {
            Ok(handle) => {
                self.counters.active_count.fetch_add(1, Ordering::Relaxed);
                self.counters.total_started.fetch_add(1, Ordering::Relaxed);
                debug!(target: "txguard::tx", handle = %handle, "Transaction started");
                Ok(handle)
            }
            Err(e) => {
                warn!(target: "txguard::tx", error = %e, "Transaction begin failed");
                Err(match e {
                    TxError::CoordinatorUnavailable { .. } | TxError::CoordinatorTimeout { .. } => e,
                    other => TxError::unavailable(other.to_string()),
                })
            }
        }
    }

    /// Detach the calling thread's transaction
    ///
    /// # Errors
    /// * `NoActiveTransaction` - nothing was associated with the caller
    pub fn suspend(&self) -> TxResult<TransactionHandle> {
        let handle = self
            .coordinator
            .suspend()?
            .ok_or(TxError::NoActiveTransaction)?;
        self.counters.total_suspended.fetch_add(1, Ordering::Relaxed);
        debug!(target: "txguard::tx", handle = %handle, "Transaction suspended");
        Ok(handle)
    }

    /// Re-associate a suspended transaction with the calling thread
    pub fn resume(&self, handle: TransactionHandle) -> TxResult<()> {
        self.coordinator.resume(handle).map_err(|e| {
            warn!(target: "txguard::tx", handle = %handle, error = %e, "Transaction resume failed");
            e
        })?;
        self.counters.total_resumed.fetch_add(1, Ordering::Relaxed);
        debug!(target: "txguard::tx", handle = %handle, "Transaction resumed");
        Ok(())
    }

    /// Commit a transaction through the coordinator's two-phase protocol
    ///
    /// Any failure means the transaction did not commit. Failures are
    /// normalized so the caller only ever sees rollback kinds:
    /// - `TransactionRolledBack` and `CoordinatorTimeout` pass through
    /// - anything else becomes `TransactionRolledBack` with a
    ///   [`RollbackCause::CommitFailure`]
    pub fn commit(&self, handle: TransactionHandle) -> TxResult<()> {
        match self.coordinator.commit(handle) {
            Ok(()) => {
                self.record_commit();
                info!(target: "txguard::tx", handle = %handle, "Transaction committed");
                Ok(())
            }
            Err(e) => {
                self.record_rollback();
                warn!(target: "txguard::tx", handle = %handle, error = %e, "Transaction commit failed, rolled back");
                Err(match e {
                    TxError::TransactionRolledBack { .. } | TxError::CoordinatorTimeout { .. } => e,
                    other => TxError::rolled_back(
                        handle,
                        RollbackCause::CommitFailure(other.to_string()),
                    ),
                })
            }
        }
    }

    /// Roll back a transaction
    ///
    /// Counts as the transaction's terminal decision even when the
    /// coordinator reports a failure.
    pub fn rollback(&self, handle: TransactionHandle) -> TxResult<()> {
        self.record_rollback();
        match self.coordinator.rollback(handle) {
            Ok(()) => {
                info!(target: "txguard::tx", handle = %handle, "Transaction rolled back");
                Ok(())
            }
            Err(e) => {
                warn!(target: "txguard::tx", handle = %handle, error = %e, "Transaction rollback failed");
                Err(e)
            }
        }
    }

    /// Mark a transaction rollback-only (idempotent)
    pub fn set_rollback_only(&self, handle: TransactionHandle) -> TxResult<()> {
        self.coordinator.set_rollback_only(handle)?;
        debug!(target: "txguard::tx", handle = %handle, "Transaction marked rollback-only");
        Ok(())
    }

    /// Whether the coordinator has the transaction marked rollback-only
    pub fn is_rollback_only(&self, handle: TransactionHandle) -> TxResult<bool> {
        self.coordinator.is_rollback_only(handle)
    }

    /// Enlist an XA participant in a transaction
    pub fn enlist(
        &self,
        handle: TransactionHandle,
        participant: Arc<dyn XaParticipant>,
    ) -> TxResult<()> {
        let name = participant.name().to_string();
        self.coordinator.enlist(handle, participant)?;
        debug!(target: "txguard::tx", handle = %handle, participant = %name, "Participant enlisted");
        Ok(())
    }

    /// Record a call that joined an existing transaction
    pub fn record_join(&self) {
        self.counters.total_joined.fetch_add(1, Ordering::Relaxed);
    }

    fn record_commit(&self) {
        // Saturating decrement, metrics must never underflow
        let _ = self
            .counters
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
        self.counters.total_committed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rollback(&self) {
        let _ = self
            .counters
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
        self.counters.total_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    /// Get transaction metrics
    ///
    /// Returns current snapshot of transaction statistics.
    pub fn metrics(&self) -> TransactionMetrics {
        let c = &self.counters;
        TransactionMetrics {
            active_count: c.active_count.load(Ordering::Relaxed),
            total_started: c.total_started.load(Ordering::Relaxed),
            total_committed: c.total_committed.load(Ordering::Relaxed),
            total_rolled_back: c.total_rolled_back.load(Ordering::Relaxed),
            total_joined: c.total_joined.load(Ordering::Relaxed),
            total_suspended: c.total_suspended.load(Ordering::Relaxed),
            total_resumed: c.total_resumed.load(Ordering::Relaxed),
        }
    }

    /// Get current active transaction count
    pub fn active_count(&self) -> u64 {
        self.counters.active_count.load(Ordering::SeqCst)
    }
}

/// Transaction metrics
///
/// Provides statistics about global transaction lifecycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionMetrics {
    /// Transactions begun and not yet committed or rolled back
    pub active_count: u64,
    /// Total transactions begun
    pub total_started: u64,
    /// Total transactions committed
    pub total_committed: u64,
    /// Total transactions rolled back (explicitly or by failed commit)
    pub total_rolled_back: u64,
    /// Total intercepted calls that joined an existing transaction
    pub total_joined: u64,
    /// Total suspensions
    pub total_suspended: u64,
    /// Total resumptions
    pub total_resumed: u64,
}

impl TransactionMetrics {
    /// Total transactions that completed (committed + rolled back)
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_rolled_back
    }

    /// Commit rate (committed / started)
    pub fn commit_rate(&self) -> f64 {
        if self.total_started > 0 {
            self.total_committed as f64 / self.total_started as f64
        } else {
            0.0
        }
    }

    /// Rollback rate (rolled back / started)
    pub fn rollback_rate(&self) -> f64 {
        if self.total_started > 0 {
            self.total_rolled_back as f64 / self.total_started as f64
        } else {
            0.0
        }
    }
}
