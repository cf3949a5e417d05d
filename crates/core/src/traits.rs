//! Collaborator traits
//!
//! The demarcation engine never talks to a transaction manager or a database
//! driver directly. It goes through these traits so the coordinator and the
//! resources can be swapped (production JTA-like manager, in-memory test
//! doubles) without touching the interceptor.
//!
//! Thread safety: all implementations must be `Send + Sync`. A single
//! coordinator is shared by every thread that runs intercepted calls.

use std::sync::Arc;

use crate::error::TxResult;
use crate::types::{IsolationLevel, TransactionHandle, Vote};

/// External two-phase-commit transaction coordinator (JTA-like)
///
/// The coordinator associates at most one transaction with each calling
/// thread. `begin` associates the new transaction with the caller;
/// `suspend`/`resume` detach and re-attach it; `commit`/`rollback` end it
/// and clear the association.
pub trait TransactionCoordinator: Send + Sync {
    /// Start a new global transaction and associate it with the caller
    ///
    /// # Errors
    ///
    /// `CoordinatorUnavailable` if no transaction can be allocated.
    fn begin(&self) -> TxResult<TransactionHandle>;

    /// Detach the caller's transaction, returning it (or `None` if none)
    fn suspend(&self) -> TxResult<Option<TransactionHandle>>;

    /// Re-associate a previously suspended transaction with the caller
    fn resume(&self, handle: TransactionHandle) -> TxResult<()>;

    /// Run the two-phase protocol across every enlisted participant
    ///
    /// # Errors
    ///
    /// - `TransactionRolledBack` if the transaction was rollback-only or a
    ///   participant voted to abort (the transaction is rolled back)
    /// - `CoordinatorTimeout` if the coordinator hit its own deadline
    fn commit(&self, handle: TransactionHandle) -> TxResult<()>;

    /// Roll back every enlisted participant
    fn rollback(&self, handle: TransactionHandle) -> TxResult<()>;

    /// Mark the transaction so that it can only roll back (idempotent)
    fn set_rollback_only(&self, handle: TransactionHandle) -> TxResult<()>;

    /// Whether the transaction has been marked rollback-only
    fn is_rollback_only(&self, handle: TransactionHandle) -> TxResult<bool>;

    /// Enlist a participant in the transaction's two-phase protocol
    fn enlist(&self, handle: TransactionHandle, participant: Arc<dyn XaParticipant>)
        -> TxResult<()>;
}

/// A resource that takes part in the coordinator's two-phase commit
pub trait XaParticipant: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Phase one: persist pending work durably and vote
    fn prepare(&self, handle: TransactionHandle) -> TxResult<Vote>;

    /// Phase two: make prepared work visible
    fn commit(&self, handle: TransactionHandle) -> TxResult<()>;

    /// Discard pending work (before or after prepare)
    fn rollback(&self, handle: TransactionHandle) -> TxResult<()>;
}

/// A resource with its own local transaction primitive (JDBC-style)
pub trait LocalResource: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Begin (or resume) a local unit of work bound to `handle`
    fn begin_local(&self, handle: TransactionHandle, isolation: Option<IsolationLevel>)
        -> TxResult<()>;

    /// Commit the local unit of work bound to `handle`
    fn commit_local(&self, handle: TransactionHandle) -> TxResult<()>;

    /// Roll back the local unit of work bound to `handle`
    fn rollback_local(&self, handle: TransactionHandle) -> TxResult<()>;
}
