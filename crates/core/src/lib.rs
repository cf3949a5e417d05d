//! Core types and traits for txguard
//!
//! This crate defines the foundational types used throughout the system:
//! - TransactionHandle: Opaque identity of a global transaction
//! - Propagation / IsolationLevel: Call-site transaction attributes
//! - Error: TxError and TransactionalError
//! - Traits: TransactionCoordinator, XaParticipant, LocalResource

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{RollbackCause, TransactionalError, TxError, TxResult};
pub use traits::{LocalResource, TransactionCoordinator, XaParticipant};
pub use types::{IsolationLevel, Outcome, Propagation, TransactionHandle, Vote};
