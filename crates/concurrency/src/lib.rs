//! Per-thread transaction context for txguard
//!
//! This crate holds the state that ties transactions to call stacks:
//! - TransactionFrame: One intercepted call's bookkeeping and lifecycle
//! - ContextStack: Thread-local stack of frames; top = active transaction
//!
//! Nothing here talks to a coordinator. The engine decides what to push
//! and pop; this crate guarantees isolation between threads and detects
//! frames that leak.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod frame;
pub mod stack;

pub use frame::{Completion, FrameId, FrameState, TransactionFrame};
pub use stack::{ContextStack, INITIAL_DEPTH};
