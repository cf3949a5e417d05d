//! Transaction frames
//!
//! A frame is pushed for every intercepted call and records how that call
//! relates to the global transaction: whether it began the transaction or
//! joined it, which outer transaction it suspended, and whether it vetoed
//! the commit.
//!
//! State transitions:
//! - `Entering` → `Active` (frame pushed, body about to run)
//! - `Active` → `Exiting(Commit)` (body returned normally)
//! - `Active` → `Exiting(Rollback)` (body failed, or rollback-only)
//! - `Exiting(_)` → `Done` (outcome applied, suspended tx resumed)
//!
//! `Exiting(Commit)` → `Exiting(Rollback)` is also allowed: a commit that
//! turns out to be rollback-only, or that fails, is re-labelled as a rollback.
//!
//! Terminal state (no transitions allowed): `Done`

use std::fmt;
use txguard_core::{IsolationLevel, Propagation, TransactionHandle, TxError, TxResult};

/// Per-thread frame identifier, assigned on push
pub type FrameId = u64;

/// Direction a frame is exiting in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Completion {
    /// Normal return; commit if this frame owns the transaction
    Commit,
    /// Failure or rollback-only; roll back (owner) or mark (joined)
    Rollback,
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Commit => f.write_str("commit"),
            Completion::Rollback => f.write_str("rollback"),
        }
    }
}

/// Lifecycle state of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Demarcation decided, coordinator calls in progress
    Entering,
    /// Body is running
    Active,
    /// Outcome being applied
    Exiting(Completion),
    /// Outcome applied and context restored
    Done,
}

/// Bookkeeping record of one intercepted call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionFrame {
    /// Identifier assigned by the context stack on push (0 until pushed)
    pub id: FrameId,
    /// Propagation declared by the call site
    pub propagation: Propagation,
    /// Isolation hint declared by the call site
    pub isolation: Option<IsolationLevel>,
    /// Global transaction this frame runs in
    pub handle: TransactionHandle,
    /// True when this frame began `handle` and owns its outcome
    pub created: bool,
    /// Outer transaction suspended on entry, resumed on exit
    pub suspended: Option<TransactionHandle>,
    rollback_only: bool,
    state: FrameState,
}

impl TransactionFrame {
    /// Frame for a call that began a new global transaction
    pub fn begun(
        propagation: Propagation,
        handle: TransactionHandle,
        suspended: Option<TransactionHandle>,
    ) -> Self {
        Self {
            id: 0,
            propagation,
            isolation: None,
            handle,
            created: true,
            suspended,
            rollback_only: false,
            state: FrameState::Entering,
        }
    }

    /// Frame for a call that joined the current transaction
    pub fn joined(propagation: Propagation, handle: TransactionHandle) -> Self {
        Self {
            id: 0,
            propagation,
            isolation: None,
            handle,
            created: false,
            suspended: None,
            rollback_only: false,
            state: FrameState::Entering,
        }
    }

    /// Set the isolation hint
    pub fn with_isolation(mut self, isolation: Option<IsolationLevel>) -> Self {
        self.isolation = isolation;
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// True while the body runs
    pub fn is_active(&self) -> bool {
        matches!(self.state, FrameState::Active)
    }

    /// True once the frame is finished
    pub fn is_done(&self) -> bool {
        matches!(self.state, FrameState::Done)
    }

    /// Frame-local rollback-only flag
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Set the frame-local rollback-only flag
    ///
    /// There is no way to clear it again.
    pub fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    /// Transition to Active state
    ///
    /// # Errors
    /// Returns `TxError::InvalidState` if not in `Entering` state.
    ///
    /// # State Transition
    /// `Entering` → `Active`
    pub fn mark_active(&mut self) -> TxResult<()> {
        match self.state {
            FrameState::Entering => {
                self.state = FrameState::Active;
                Ok(())
            }
            other => Err(self.illegal("activate", other)),
        }
    }

    /// Transition to Exiting state
    ///
    /// # Errors
    /// Returns `TxError::InvalidState` unless the frame is `Active`, or is
    /// exiting towards commit and is being re-labelled as a rollback.
    ///
    /// # State Transition
    /// `Active` → `Exiting(_)`, `Exiting(Commit)` → `Exiting(Rollback)`
    pub fn mark_exiting(&mut self, completion: Completion) -> TxResult<()> {
        match (self.state, completion) {
            (FrameState::Active, _)
            | (FrameState::Exiting(Completion::Commit), Completion::Rollback) => {
                self.state = FrameState::Exiting(completion);
                Ok(())
            }
            (other, _) => Err(self.illegal("exit", other)),
        }
    }

    /// Transition to Done state
    ///
    /// # Errors
    /// Returns `TxError::InvalidState` if not in `Exiting` state.
    ///
    /// # State Transition
    /// `Exiting(_)` → `Done`
    pub fn mark_done(&mut self) -> TxResult<()> {
        match self.state {
            FrameState::Exiting(_) => {
                self.state = FrameState::Done;
                Ok(())
            }
            other => Err(self.illegal("finish", other)),
        }
    }

    fn illegal(&self, action: &str, from: FrameState) -> TxError {
        TxError::invalid_state(format!(
            "cannot {} frame {} ({}) from state {:?}",
            action, self.id, self.handle, from
        ))
    }
}
