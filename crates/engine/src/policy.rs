//! Propagation policy
//!
//! Pure decision logic: given the call site's propagation and whether a
//! transaction is active on the calling thread, decide what the interceptor
//! must do before running the body.
//!
//! | Propagation    | Active? | Action            |
//! |----------------|---------|-------------------|
//! | `REQUIRED`     | yes     | `Join`            |
//! | `REQUIRED`     | no      | `Begin`           |
//! | `REQUIRES_NEW` | yes     | `SuspendAndBegin` |
//! | `REQUIRES_NEW` | no      | `SuspendAndBegin` |
//!
//! `REQUIRES_NEW` without an active transaction still reports
//! `SuspendAndBegin`: the suspend is a no-op and the frame records that
//! there is nothing to resume.

use std::fmt;
use txguard_core::Propagation;

/// What the interceptor does on entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Run inside the active transaction; no coordinator call
    Join,
    /// Suspend the active transaction (if any), then begin a new one
    SuspendAndBegin,
    /// Begin a new transaction
    Begin,
}

impl Action {
    /// True when the call will own a brand-new transaction
    pub fn creates_transaction(&self) -> bool {
        !matches!(self, Action::Join)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Join => f.write_str("join"),
            Action::SuspendAndBegin => f.write_str("suspend-and-begin"),
            Action::Begin => f.write_str("begin"),
        }
    }
}

/// Decide the entry action for a call
pub fn decide(propagation: Propagation, has_active_transaction: bool) -> Action {
    match (propagation, has_active_transaction) {
        (Propagation::Required, true) => Action::Join,
        (Propagation::Required, false) => Action::Begin,
        (Propagation::RequiresNew, _) => Action::SuspendAndBegin,
    }
}
