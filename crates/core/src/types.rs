//! Core types for transaction demarcation
//!
//! This module defines the foundational types:
//! - TransactionHandle: Opaque identity of one global transaction
//! - Propagation: How an intercepted call relates to the current transaction
//! - IsolationLevel: Isolation hint handed to local resources
//! - Outcome: Terminal result of a global transaction

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TxError;

/// Opaque identity of one global transaction
///
/// Handles are allocated by the coordinator on `begin` and are only
/// meaningful to the coordinator that issued them. Everything else
/// (context stack, resource adapters) stores copies and compares them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionHandle(u64);

impl TransactionHandle {
    /// Wrap a coordinator-issued identifier
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw identifier as issued by the coordinator
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Propagation mode of a transactional call site
///
/// Determines whether a call joins the transaction already active on the
/// calling thread or runs in a brand-new one.
///
/// # Parsing
///
/// Accepts `REQUIRED` and `REQUIRES_NEW` in any case, with `-` or `_`
/// as separator, so both config files and annotations-as-strings work:
///
/// ```
/// use txguard_core::Propagation;
///
/// assert_eq!("requires-new".parse::<Propagation>().unwrap(), Propagation::RequiresNew);
/// assert_eq!(Propagation::default(), Propagation::Required);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Propagation {
    /// Join the current transaction, or begin one if none is active
    #[default]
    Required,
    /// Always run in a new transaction, suspending the current one if any
    RequiresNew,
}

impl Propagation {
    /// Canonical upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Propagation::Required => "REQUIRED",
            Propagation::RequiresNew => "REQUIRES_NEW",
        }
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Propagation {
    type Err = TxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "REQUIRED" => Ok(Propagation::Required),
            "REQUIRES_NEW" => Ok(Propagation::RequiresNew),
            other => Err(TxError::config(format!(
                "unknown propagation '{}', expected REQUIRED or REQUIRES_NEW",
                other
            ))),
        }
    }
}

/// Isolation level hint
///
/// Only local (non-XA) resources act on it; XA participants get their
/// isolation from the coordinator's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    /// Dirty reads allowed
    ReadUncommitted,
    /// Only committed data is visible
    ReadCommitted,
    /// Rows read once stay stable for the transaction
    RepeatableRead,
    /// Full serializability
    Serializable,
}

impl IsolationLevel {
    /// Canonical upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ_UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ_COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE_READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = TxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace(['-', ' '], "_").as_str() {
            "READ_UNCOMMITTED" => Ok(IsolationLevel::ReadUncommitted),
            "READ_COMMITTED" => Ok(IsolationLevel::ReadCommitted),
            "REPEATABLE_READ" => Ok(IsolationLevel::RepeatableRead),
            "SERIALIZABLE" => Ok(IsolationLevel::Serializable),
            other => Err(TxError::config(format!("unknown isolation level '{}'", other))),
        }
    }
}

/// Terminal outcome of a global transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// All participants committed
    Committed,
    /// The transaction was rolled back (explicitly or by vote)
    RolledBack,
}

impl Outcome {
    /// True for [`Outcome::Committed`]
    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Committed => f.write_str("committed"),
            Outcome::RolledBack => f.write_str("rolled back"),
        }
    }
}

/// Vote cast by an XA participant in the prepare phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vote {
    /// Participant is prepared and will commit when told to
    Commit,
    /// Participant has nothing to commit and can be left out of phase two
    ReadOnly,
    /// Participant cannot commit; the whole transaction must roll back
    Abort {
        /// Human-readable reason
        reason: String,
    },
}
