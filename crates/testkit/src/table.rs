//! In-memory row store
//!
//! A table of integer keys with per-transaction pending writes. It can be
//! enlisted with a coordinator as an XA participant or driven directly as a
//! local resource; both paths share the same pending/committed state.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use txguard_core::{
    IsolationLevel, LocalResource, TransactionHandle, TxError, TxResult, Vote, XaParticipant,
};

#[derive(Default)]
struct TableState {
    committed: BTreeSet<u64>,
    pending: HashMap<TransactionHandle, Vec<u64>>,
    isolation: HashMap<TransactionHandle, Option<IsolationLevel>>,
    abort_next_prepare: Option<String>,
    fail_next_commit: Option<String>,
}

/// In-memory table with primary-key semantics
pub struct InMemoryTable {
    name: String,
    state: Mutex<TableState>,
}

impl InMemoryTable {
    /// Empty table
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(TableState::default()),
        }
    }

    /// Write `id` inside `handle`
    ///
    /// # Errors
    /// Fails like a primary-key violation if `id` is already committed or
    /// pending in any transaction.
    pub fn insert(&self, handle: TransactionHandle, id: u64) -> TxResult<()> {
        let mut state = self.state.lock();
        let taken = state.committed.contains(&id)
            || state.pending.values().any(|rows| rows.contains(&id));
        if taken {
            return Err(TxError::invalid_state(format!(
                "duplicate key {} in table '{}'",
                id, self.name
            )));
        }
        state.pending.entry(handle).or_default().push(id);
        Ok(())
    }

    /// Committed keys, ascending
    pub fn rows(&self) -> Vec<u64> {
        self.state.lock().committed.iter().copied().collect()
    }

    /// Keys written by `handle` and not yet committed
    pub fn pending(&self, handle: TransactionHandle) -> Vec<u64> {
        self.state
            .lock()
            .pending
            .get(&handle)
            .cloned()
            .unwrap_or_default()
    }

    /// Isolation hint the local transaction for `handle` began with
    pub fn isolation_of(&self, handle: TransactionHandle) -> Option<IsolationLevel> {
        self.state.lock().isolation.get(&handle).copied().flatten()
    }

    /// Vote to abort in the next prepare
    pub fn abort_next_prepare(&self, reason: &str) {
        self.state.lock().abort_next_prepare = Some(reason.to_string());
    }

    /// Fail the next commit (XA phase two or local)
    pub fn fail_next_commit(&self, reason: &str) {
        self.state.lock().fail_next_commit = Some(reason.to_string());
    }

    fn apply(&self, handle: TransactionHandle) -> TxResult<()> {
        let mut state = self.state.lock();
        if let Some(reason) = state.fail_next_commit.take() {
            state.pending.remove(&handle);
            return Err(TxError::invalid_state(format!(
                "table '{}' failed to commit: {}",
                self.name, reason
            )));
        }
        if let Some(rows) = state.pending.remove(&handle) {
            state.committed.extend(rows);
        }
        Ok(())
    }

    fn discard(&self, handle: TransactionHandle) {
        self.state.lock().pending.remove(&handle);
    }
}

impl XaParticipant for InMemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn prepare(&self, handle: TransactionHandle) -> TxResult<Vote> {
        let mut state = self.state.lock();
        if let Some(reason) = state.abort_next_prepare.take() {
            return Ok(Vote::Abort { reason });
        }
        let has_writes = state
            .pending
            .get(&handle)
            .map_or(false, |rows| !rows.is_empty());
        Ok(if has_writes { Vote::Commit } else { Vote::ReadOnly })
    }

    fn commit(&self, handle: TransactionHandle) -> TxResult<()> {
        self.apply(handle)
    }

    fn rollback(&self, handle: TransactionHandle) -> TxResult<()> {
        self.discard(handle);
        Ok(())
    }
}

impl LocalResource for InMemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn begin_local(&self, handle: TransactionHandle, isolation: Option<IsolationLevel>) -> TxResult<()> {
        let mut state = self.state.lock();
        state.pending.entry(handle).or_default();
        state.isolation.insert(handle, isolation);
        Ok(())
    }

    fn commit_local(&self, handle: TransactionHandle) -> TxResult<()> {
        self.apply(handle)
    }

    fn rollback_local(&self, handle: TransactionHandle) -> TxResult<()> {
        self.discard(handle);
        Ok(())
    }
}
