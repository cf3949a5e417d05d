//! Error types for transaction demarcation
//!
//! Two layers of errors live here:
//! - [`TxError`]: failures of the demarcation machinery itself (coordinator,
//!   enlistment, context stack). Uses `thiserror` for `Display`/`Error`.
//! - [`TransactionalError`]: what an intercepted call returns. It keeps the
//!   business method's own failure intact and carries demarcation failures
//!   next to it.

use std::fmt;
use thiserror::Error;

use crate::types::TransactionHandle;

/// Result type alias for demarcation operations
pub type TxResult<T> = std::result::Result<T, TxError>;

/// Why a transaction ended in rollback when a commit was expected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackCause {
    /// The transaction had been marked rollback-only
    RollbackOnly,
    /// A participant voted to abort during prepare
    ParticipantVote {
        /// Name of the participant that aborted
        participant: String,
        /// Reason given by the participant
        reason: String,
    },
    /// The commit call itself failed
    CommitFailure(String),
}

impl fmt::Display for RollbackCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RollbackCause::RollbackOnly => f.write_str("marked rollback-only"),
            RollbackCause::ParticipantVote {
                participant,
                reason,
            } => write!(f, "participant '{}' voted to abort: {}", participant, reason),
            RollbackCause::CommitFailure(msg) => write!(f, "commit failed: {}", msg),
        }
    }
}

/// Failures raised by the demarcation layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    /// Coordinator could not allocate a new global transaction
    #[error("Coordinator unavailable: {reason}")]
    CoordinatorUnavailable {
        /// Reason reported by the coordinator
        reason: String,
    },

    /// Suspend or join attempted with no transaction associated
    #[error("No active transaction")]
    NoActiveTransaction,

    /// A resource could not associate with the given transaction
    #[error("Resource '{resource}' could not enlist in {handle}: {reason}")]
    EnlistmentError {
        /// Resource name
        resource: String,
        /// Transaction the resource tried to join
        handle: TransactionHandle,
        /// Reason reported by the resource or coordinator
        reason: String,
    },

    /// Commit was attempted but the outcome was rollback
    #[error("Transaction {handle} rolled back: {cause}")]
    TransactionRolledBack {
        /// Transaction that rolled back
        handle: TransactionHandle,
        /// Why it rolled back
        cause: RollbackCause,
    },

    /// The external coordinator exceeded its own deadline
    #[error("Coordinator timed out during {operation} of {handle}")]
    CoordinatorTimeout {
        /// Transaction being processed
        handle: TransactionHandle,
        /// Coordinator operation that timed out
        operation: String,
    },

    /// Global commit succeeded but a local resource failed to follow it
    #[error("Partial commit of {handle}: resource '{resource}' failed after global commit: {reason}")]
    PartialCommit {
        /// Transaction that committed globally
        handle: TransactionHandle,
        /// Local resource that did not commit
        resource: String,
        /// Reason reported by the resource
        reason: String,
    },

    /// The per-thread context stack no longer matches the call stack
    #[error("Transaction context corrupted: {message}")]
    ContextCorrupted {
        /// What was found instead of the expected frame
        message: String,
    },

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Configuration could not be read or is invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TxError {
    /// Create a CoordinatorUnavailable error
    pub fn unavailable(reason: impl Into<String>) -> Self {
        TxError::CoordinatorUnavailable {
            reason: reason.into(),
        }
    }

    /// Create an EnlistmentError
    pub fn enlistment(
        resource: impl Into<String>,
        handle: TransactionHandle,
        reason: impl Into<String>,
    ) -> Self {
        TxError::EnlistmentError {
            resource: resource.into(),
            handle,
            reason: reason.into(),
        }
    }

    /// Create a TransactionRolledBack error
    pub fn rolled_back(handle: TransactionHandle, cause: RollbackCause) -> Self {
        TxError::TransactionRolledBack { handle, cause }
    }

    /// Create a CoordinatorTimeout error
    pub fn timeout(handle: TransactionHandle, operation: impl Into<String>) -> Self {
        TxError::CoordinatorTimeout {
            handle,
            operation: operation.into(),
        }
    }

    /// Create a ContextCorrupted error
    pub fn corrupted(message: impl Into<String>) -> Self {
        TxError::ContextCorrupted {
            message: message.into(),
        }
    }

    /// Create an InvalidState error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        TxError::InvalidState(message.into())
    }

    /// Create a Config error
    pub fn config(message: impl Into<String>) -> Self {
        TxError::Config(message.into())
    }

    /// True when the error means the transaction did not commit
    pub fn is_rollback(&self) -> bool {
        matches!(
            self,
            TxError::TransactionRolledBack { .. } | TxError::CoordinatorTimeout { .. }
        )
    }

    /// True for invariant violations that must never be tolerated
    pub fn is_fatal(&self) -> bool {
        matches!(self, TxError::ContextCorrupted { .. })
    }
}

/// Error returned by an intercepted call
///
/// The business method's failure is never replaced: when the body fails,
/// the caller gets [`TransactionalError::Method`] holding exactly that
/// failure, with any rollback problem attached as `secondary`. Failures of
/// the demarcation itself (begin, commit, rollback-only outcome, resume)
/// come back as [`TransactionalError::Transaction`].
#[derive(Debug)]
pub enum TransactionalError<E> {
    /// The wrapped method failed
    Method {
        /// Original failure, unchanged
        error: E,
        /// Failure of the rollback / rollback-only mark triggered by it
        secondary: Option<TxError>,
        /// Message declared on the call site's marker
        context: Option<String>,
    },
    /// Demarcation failed around an otherwise completed (or never started) body
    Transaction {
        /// Demarcation failure
        error: TxError,
        /// Message declared on the call site's marker
        context: Option<String>,
    },
}

impl<E> TransactionalError<E> {
    /// Wrap a business failure
    pub fn method(error: E) -> Self {
        TransactionalError::Method {
            error,
            secondary: None,
            context: None,
        }
    }

    /// Wrap a demarcation failure
    pub fn transaction(error: TxError) -> Self {
        TransactionalError::Transaction {
            error,
            context: None,
        }
    }

    /// Attach the call site's message, keeping any message already set
    pub fn with_context(mut self, message: Option<&str>) -> Self {
        if let Some(msg) = message {
            let slot = match &mut self {
                TransactionalError::Method { context, .. } => context,
                TransactionalError::Transaction { context, .. } => context,
            };
            if slot.is_none() {
                *slot = Some(msg.to_string());
            }
        }
        self
    }

    /// Attach a secondary demarcation failure to a method failure
    ///
    /// The first secondary wins; transaction failures are left unchanged.
    pub fn with_secondary(mut self, err: TxError) -> Self {
        if let TransactionalError::Method { secondary, .. } = &mut self {
            if secondary.is_none() {
                *secondary = Some(err);
            }
        }
        self
    }

    /// True when the business method itself failed
    pub fn is_method(&self) -> bool {
        matches!(self, TransactionalError::Method { .. })
    }

    /// The business failure, if that is what happened
    pub fn method_error(&self) -> Option<&E> {
        match self {
            TransactionalError::Method { error, .. } => Some(error),
            TransactionalError::Transaction { .. } => None,
        }
    }

    /// Consume and return the business failure, if any
    pub fn into_method_error(self) -> Option<E> {
        match self {
            TransactionalError::Method { error, .. } => Some(error),
            TransactionalError::Transaction { .. } => None,
        }
    }

    /// The demarcation failure, if that is what happened
    pub fn transaction_error(&self) -> Option<&TxError> {
        match self {
            TransactionalError::Transaction { error, .. } => Some(error),
            TransactionalError::Method { .. } => None,
        }
    }

    /// Secondary failure attached to a method failure
    pub fn secondary(&self) -> Option<&TxError> {
        match self {
            TransactionalError::Method { secondary, .. } => secondary.as_ref(),
            TransactionalError::Transaction { .. } => None,
        }
    }

    /// Message declared on the call site's marker
    pub fn context(&self) -> Option<&str> {
        match self {
            TransactionalError::Method { context, .. }
            | TransactionalError::Transaction { context, .. } => context.as_deref(),
        }
    }

    /// True when the work done by the call did not commit
    ///
    /// Method failures always lead to rollback (or a rollback-only mark);
    /// transaction failures do when they are rollback kinds.
    pub fn is_rollback(&self) -> bool {
        match self {
            TransactionalError::Method { .. } => true,
            TransactionalError::Transaction { error, .. } => error.is_rollback(),
        }
    }

    /// Map the business failure type, e.g. when bubbling through layers
    pub fn map_method<F, G>(self, f: G) -> TransactionalError<F>
    where
        G: FnOnce(E) -> F,
    {
        match self {
            TransactionalError::Method {
                error,
                secondary,
                context,
            } => TransactionalError::Method {
                error: f(error),
                secondary,
                context,
            },
            TransactionalError::Transaction { error, context } => {
                TransactionalError::Transaction { error, context }
            }
        }
    }
}

impl<E> From<TxError> for TransactionalError<E> {
    fn from(error: TxError) -> Self {
        TransactionalError::transaction(error)
    }
}

impl<E: fmt::Display> fmt::Display for TransactionalError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = self.context() {
            write!(f, "{}: ", ctx)?;
        }
        match self {
            TransactionalError::Method {
                error, secondary, ..
            } => {
                write!(f, "{}", error)?;
                if let Some(sec) = secondary {
                    write!(f, " (secondary: {})", sec)?;
                }
                Ok(())
            }
            TransactionalError::Transaction { error, .. } => write!(f, "{}", error),
        }
    }
}

impl<E> std::error::Error for TransactionalError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransactionalError::Method { error, .. } => Some(error),
            TransactionalError::Transaction { error, .. } => Some(error),
        }
    }
}
