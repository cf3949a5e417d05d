//! In-memory JTA-like coordinator
//!
//! Keeps one transaction association per thread, runs a real two-phase
//! protocol over enlisted participants and records every call in an event
//! log that tests can assert on. Failures can be injected one call at a
//! time with [`RecordingCoordinator::fail_next`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, warn};
use txguard_core::{
    Outcome, RollbackCause, TransactionCoordinator, TransactionHandle, TxError, TxResult, Vote,
    XaParticipant,
};

/// One call observed by the coordinator
///
/// `Begin` is recorded once a handle was allocated; every other call is
/// recorded whatever its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// Transaction allocated and associated with the caller
    Begin(TransactionHandle),
    /// Transaction detached from the caller
    Suspend(TransactionHandle),
    /// Transaction re-attached to the caller
    Resume(TransactionHandle),
    /// Commit requested
    Commit(TransactionHandle),
    /// Rollback requested
    Rollback(TransactionHandle),
    /// Rollback-only mark requested
    SetRollbackOnly(TransactionHandle),
    /// Participant enlisted, by name
    Enlist(TransactionHandle, String),
}

/// Failure injected into the next matching call
#[derive(Debug, Clone)]
pub enum Failure {
    /// `begin` fails without allocating a handle
    Begin(TxError),
    /// `suspend` fails and the association is kept
    Suspend(TxError),
    /// `resume` fails and nothing is associated
    Resume(TxError),
    /// `commit` rolls everything back and reports this error
    Commit(TxError),
    /// `rollback` rolls everything back and reports this error
    Rollback(TxError),
    /// `set_rollback_only` fails without marking
    SetRollbackOnly(TxError),
    /// `enlist` fails without enlisting
    Enlist(TxError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Begin,
    Suspend,
    Resume,
    Commit,
    Rollback,
    SetRollbackOnly,
    Enlist,
}

impl Failure {
    fn op(&self) -> Op {
        match self {
            Failure::Begin(_) => Op::Begin,
            Failure::Suspend(_) => Op::Suspend,
            Failure::Resume(_) => Op::Resume,
            Failure::Commit(_) => Op::Commit,
            Failure::Rollback(_) => Op::Rollback,
            Failure::SetRollbackOnly(_) => Op::SetRollbackOnly,
            Failure::Enlist(_) => Op::Enlist,
        }
    }

    fn into_error(self) -> TxError {
        match self {
            Failure::Begin(e)
            | Failure::Suspend(e)
            | Failure::Resume(e)
            | Failure::Commit(e)
            | Failure::Rollback(e)
            | Failure::SetRollbackOnly(e)
            | Failure::Enlist(e) => e,
        }
    }
}

#[derive(Default)]
struct GlobalTx {
    participants: Vec<Arc<dyn XaParticipant>>,
    rollback_only: bool,
    outcome: Option<Outcome>,
}

/// In-memory coordinator for tests
pub struct RecordingCoordinator {
    next_id: AtomicU64,
    transactions: Mutex<HashMap<TransactionHandle, GlobalTx>>,
    associations: Mutex<HashMap<ThreadId, TransactionHandle>>,
    events: Mutex<Vec<CoordinatorEvent>>,
    failures: Mutex<Vec<Failure>>,
}

impl Default for RecordingCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingCoordinator {
    /// Coordinator with no transactions; handles start at 1
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            transactions: Mutex::new(HashMap::new()),
            associations: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Make the next call of the failure's kind fail
    ///
    /// Several failures of different kinds can be pending at once; failures
    /// of the same kind fire in the order they were queued.
    pub fn fail_next(&self, failure: Failure) {
        self.failures.lock().push(failure);
    }

    /// Every call recorded so far, oldest first
    pub fn events(&self) -> Vec<CoordinatorEvent> {
        self.events.lock().clone()
    }

    /// Number of recorded calls matching `pred`
    pub fn count(&self, pred: impl Fn(&CoordinatorEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    /// Forget recorded calls
    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Transaction associated with the calling thread
    pub fn associated(&self) -> Option<TransactionHandle> {
        self.associations.lock().get(&thread::current().id()).copied()
    }

    /// Terminal outcome of `handle`, once it has one
    pub fn outcome(&self, handle: TransactionHandle) -> Option<Outcome> {
        self.transactions
            .lock()
            .get(&handle)
            .and_then(|tx| tx.outcome)
    }

    /// Transactions begun and not yet completed
    pub fn active_transactions(&self) -> usize {
        self.transactions
            .lock()
            .values()
            .filter(|tx| tx.outcome.is_none())
            .count()
    }

    fn record(&self, event: CoordinatorEvent) {
        self.events.lock().push(event);
    }

    fn take_failure(&self, op: Op) -> Option<TxError> {
        let mut failures = self.failures.lock();
        let index = failures.iter().position(|f| f.op() == op)?;
        Some(failures.remove(index).into_error())
    }

    fn disassociate(&self, handle: TransactionHandle) {
        self.associations.lock().retain(|_, h| *h != handle);
    }

    /// Take the participants of a live transaction and record its outcome
    fn finish(
        &self,
        handle: TransactionHandle,
        outcome: Outcome,
    ) -> TxResult<(Vec<Arc<dyn XaParticipant>>, bool)> {
        let mut transactions = self.transactions.lock();
        let tx = transactions
            .get_mut(&handle)
            .ok_or_else(|| TxError::invalid_state(format!("unknown transaction {}", handle)))?;
        if let Some(done) = tx.outcome {
            return Err(TxError::invalid_state(format!(
                "transaction {} already {}",
                handle, done
            )));
        }
        tx.outcome = Some(outcome);
        Ok((std::mem::take(&mut tx.participants), tx.rollback_only))
    }

    fn set_outcome(&self, handle: TransactionHandle, outcome: Outcome) {
        if let Some(tx) = self.transactions.lock().get_mut(&handle) {
            tx.outcome = Some(outcome);
        }
    }

    fn rollback_all(handle: TransactionHandle, participants: &[Arc<dyn XaParticipant>]) {
        for participant in participants {
            if let Err(e) = participant.rollback(handle) {
                warn!(target: "txguard::testkit", handle = %handle, participant = participant.name(), error = %e, "Participant rollback failed");
            }
        }
    }

    fn with_live<R>(
        &self,
        handle: TransactionHandle,
        f: impl FnOnce(&mut GlobalTx) -> R,
    ) -> TxResult<R> {
        let mut transactions = self.transactions.lock();
        match transactions.get_mut(&handle) {
            Some(tx) if tx.outcome.is_none() => Ok(f(tx)),
            Some(_) => Err(TxError::invalid_state(format!(
                "transaction {} already completed",
                handle
            ))),
            None => Err(TxError::invalid_state(format!(
                "unknown transaction {}",
                handle
            ))),
        }
    }
}

impl TransactionCoordinator for RecordingCoordinator {
    fn begin(&self) -> TxResult<TransactionHandle> {
        if let Some(e) = self.take_failure(Op::Begin) {
            return Err(e);
        }
        let thread = thread::current().id();
        let mut associations = self.associations.lock();
        if let Some(existing) = associations.get(&thread) {
            return Err(TxError::invalid_state(format!(
                "thread already associated with {}",
                existing
            )));
        }

        let handle = TransactionHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.transactions.lock().insert(handle, GlobalTx::default());
        associations.insert(thread, handle);
        drop(associations);

        self.record(CoordinatorEvent::Begin(handle));
        debug!(target: "txguard::testkit", handle = %handle, "begin");
        Ok(handle)
    }

    fn suspend(&self) -> TxResult<Option<TransactionHandle>> {
        if let Some(e) = self.take_failure(Op::Suspend) {
            return Err(e);
        }
        let handle = self.associations.lock().remove(&thread::current().id());
        if let Some(h) = handle {
            self.record(CoordinatorEvent::Suspend(h));
        }
        Ok(handle)
    }

    fn resume(&self, handle: TransactionHandle) -> TxResult<()> {
        self.record(CoordinatorEvent::Resume(handle));
        if let Some(e) = self.take_failure(Op::Resume) {
            return Err(e);
        }
        self.with_live(handle, |_| ())?;
        let mut associations = self.associations.lock();
        let thread = thread::current().id();
        match associations.get(&thread) {
            Some(existing) if *existing != handle => Err(TxError::invalid_state(format!(
                "cannot resume {}: thread already associated with {}",
                handle, existing
            ))),
            _ => {
                associations.insert(thread, handle);
                Ok(())
            }
        }
    }

    fn commit(&self, handle: TransactionHandle) -> TxResult<()> {
        self.record(CoordinatorEvent::Commit(handle));
        let injected = self.take_failure(Op::Commit);
        let (participants, rollback_only) = self.finish(handle, Outcome::RolledBack)?;
        self.disassociate(handle);

        if let Some(e) = injected {
            Self::rollback_all(handle, &participants);
            return Err(e);
        }
        if rollback_only {
            Self::rollback_all(handle, &participants);
            return Err(TxError::rolled_back(handle, RollbackCause::RollbackOnly));
        }

        // Phase one
        let mut voters = Vec::with_capacity(participants.len());
        for participant in &participants {
            let vote = participant.prepare(handle).unwrap_or_else(|e| Vote::Abort {
                reason: e.to_string(),
            });
            match vote {
                Vote::Commit => voters.push(participant.clone()),
                Vote::ReadOnly => {}
                Vote::Abort { reason } => {
                    Self::rollback_all(handle, &participants);
                    return Err(TxError::rolled_back(
                        handle,
                        RollbackCause::ParticipantVote {
                            participant: participant.name().to_string(),
                            reason,
                        },
                    ));
                }
            }
        }

        // Phase two
        self.set_outcome(handle, Outcome::Committed);
        let mut failed = None;
        for participant in &voters {
            if let Err(e) = participant.commit(handle) {
                warn!(target: "txguard::testkit", handle = %handle, participant = participant.name(), error = %e, "Participant commit failed after prepare");
                failed.get_or_insert(e);
            }
        }
        match failed {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn rollback(&self, handle: TransactionHandle) -> TxResult<()> {
        self.record(CoordinatorEvent::Rollback(handle));
        let injected = self.take_failure(Op::Rollback);
        let (participants, _) = self.finish(handle, Outcome::RolledBack)?;
        self.disassociate(handle);
        Self::rollback_all(handle, &participants);
        match injected {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn set_rollback_only(&self, handle: TransactionHandle) -> TxResult<()> {
        self.record(CoordinatorEvent::SetRollbackOnly(handle));
        if let Some(e) = self.take_failure(Op::SetRollbackOnly) {
            return Err(e);
        }
        self.with_live(handle, |tx| tx.rollback_only = true)
    }

    fn is_rollback_only(&self, handle: TransactionHandle) -> TxResult<bool> {
        self.transactions
            .lock()
            .get(&handle)
            .map(|tx| tx.rollback_only)
            .ok_or_else(|| TxError::invalid_state(format!("unknown transaction {}", handle)))
    }

    fn enlist(&self, handle: TransactionHandle, participant: Arc<dyn XaParticipant>) -> TxResult<()> {
        self.record(CoordinatorEvent::Enlist(handle, participant.name().to_string()));
        if let Some(e) = self.take_failure(Op::Enlist) {
            return Err(e);
        }
        self.with_live(handle, |tx| tx.participants.push(participant))
    }
}
