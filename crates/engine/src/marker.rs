//! Transactional markers
//!
//! A [`Transactional`] marker is the declarative part of demarcation: it is
//! attached to a service or a single operation and tells the interceptor how
//! the call relates to the caller's transaction.

use serde::{Deserialize, Serialize};
use txguard_core::{IsolationLevel, Propagation};

/// Declarative transaction settings for an operation
///
/// # Example
///
/// ```
/// use txguard_core::{IsolationLevel, Propagation};
/// use txguard_engine::Transactional;
///
/// let marker = Transactional::requires_new()
///     .with_isolation(IsolationLevel::Serializable)
///     .with_message("could not transfer funds");
/// assert_eq!(marker.propagation, Propagation::RequiresNew);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transactional {
    /// How the call relates to the caller's transaction
    #[serde(default)]
    pub propagation: Propagation,
    /// Isolation hint handed to local resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation: Option<IsolationLevel>,
    /// Roll back a transaction this call began even if the body succeeds
    ///
    /// Has no effect on calls that join the caller's transaction.
    #[serde(default)]
    pub rollback_only: bool,
    /// Context prefixed to errors surfaced by this call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Transactional {
    /// `REQUIRED` marker with no other settings
    pub fn required() -> Self {
        Self::default()
    }

    /// `REQUIRES_NEW` marker with no other settings
    pub fn requires_new() -> Self {
        Self::default().with_propagation(Propagation::RequiresNew)
    }

    /// Set the propagation
    pub fn with_propagation(mut self, propagation: Propagation) -> Self {
        self.propagation = propagation;
        self
    }

    /// Set the isolation hint
    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = Some(isolation);
        self
    }

    /// Roll back instead of committing
    pub fn with_rollback_only(mut self, rollback_only: bool) -> Self {
        self.rollback_only = rollback_only;
        self
    }

    /// Set the error context
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}
