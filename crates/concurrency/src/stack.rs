//! Thread-local transaction context stack
//!
//! Tracks the frames of the intercepted calls currently on the thread's
//! call stack. The top frame is the active one; frames below a
//! `REQUIRES_NEW` frame belong to suspended transactions.
//!
//! # Isolation
//!
//! The stack lives in thread-local storage: every thread sees its own
//! frames and nothing else, so no locking is needed and concurrent calls
//! on independent threads never observe each other's transactions.
//!
//! # Example
//!
//! ```ignore
//! let id = ContextStack::push(TransactionFrame::begun(Propagation::Required, handle, None))?;
//! assert_eq!(ContextStack::current(), Some(handle));
//!
//! // ... run the body ...
//!
//! let frame = ContextStack::pop_frame(id)?;
//! assert!(ContextStack::is_empty());
//! ```

use crate::frame::{FrameId, TransactionFrame};
use std::cell::{Cell, RefCell};
use tracing::error;
use txguard_core::{IsolationLevel, TransactionHandle, TxError, TxResult};

/// Initial capacity of each thread's stack
///
/// Nesting deeper than this just reallocates.
pub const INITIAL_DEPTH: usize = 8;

thread_local! {
    /// Frames of the intercepted calls on this thread, innermost last
    static CONTEXT_STACK: RefCell<Vec<TransactionFrame>> = RefCell::new(Vec::with_capacity(INITIAL_DEPTH));

    /// Next frame id on this thread
    static NEXT_FRAME_ID: Cell<FrameId> = const { Cell::new(1) };
}

/// Context stack operations
///
/// All operations act on the calling thread's stack. The stack is created
/// implicitly on first access.
pub struct ContextStack;

impl ContextStack {
    /// Handle of the active transaction, if any
    pub fn current() -> Option<TransactionHandle> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().map(|f| f.handle))
    }

    /// Isolation hint of the active frame, if any
    pub fn current_isolation() -> Option<IsolationLevel> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|f| f.isolation))
    }

    /// Copy of the active frame
    pub fn top() -> Option<TransactionFrame> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Number of frames on this thread
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }

    /// True when no intercepted call is in progress on this thread
    pub fn is_empty() -> bool {
        Self::depth() == 0
    }

    /// Push a frame and make it the active one
    ///
    /// Assigns the frame its id and moves it from `Entering` to `Active`.
    ///
    /// # Returns
    /// * `FrameId` - Id to hand back to [`ContextStack::pop_frame`]
    ///
    /// # Errors
    /// Returns `TxError::InvalidState` if the frame is not `Entering`.
    pub fn push(mut frame: TransactionFrame) -> TxResult<FrameId> {
        let id = NEXT_FRAME_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            id
        });
        frame.id = id;
        frame.mark_active()?;
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(frame));
        Ok(id)
    }

    /// Pop the active frame
    ///
    /// # Errors
    /// Returns `TxError::ContextCorrupted` if the stack is empty.
    pub fn pop() -> TxResult<TransactionFrame> {
        CONTEXT_STACK
            .with(|stack| stack.borrow_mut().pop())
            .ok_or_else(|| TxError::corrupted("pop on an empty context stack"))
    }

    /// Pop the frame that was pushed with `expected`
    ///
    /// The frame on top must be exactly that frame. Anything else means a
    /// frame leaked (or was popped twice), which would leave a suspended
    /// transaction behind for later calls on this thread; the stack is left
    /// untouched and the violation is reported.
    ///
    /// # Errors
    /// Returns `TxError::ContextCorrupted` if `expected` is not on top.
    pub fn pop_frame(expected: FrameId) -> TxResult<TransactionFrame> {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.last().map(|top| (top.id, top.handle)) {
                Some((id, _)) if id == expected => stack
                    .pop()
                    .ok_or_else(|| TxError::corrupted("top frame vanished during pop")),
                Some((id, handle)) => {
                    let message = format!(
                        "expected frame {} on top, found frame {} ({}) at depth {}",
                        expected,
                        id,
                        handle,
                        stack.len()
                    );
                    error!(target: "txguard::tx", frame = expected, "{}", message);
                    Err(TxError::corrupted(message))
                }
                None => {
                    let message = format!("expected frame {} on top, stack is empty", expected);
                    error!(target: "txguard::tx", frame = expected, "{}", message);
                    Err(TxError::corrupted(message))
                }
            }
        })
    }

    /// Run `f` against the frame pushed with `id`
    ///
    /// `f` must not call back into `ContextStack`.
    pub fn with_frame_mut<R>(id: FrameId, f: impl FnOnce(&mut TransactionFrame) -> R) -> Option<R> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow_mut()
                .iter_mut()
                .rev()
                .find(|frame| frame.id == id)
                .map(f)
        })
    }

    /// Flag every frame running in `handle` as rollback-only
    ///
    /// # Returns
    /// Number of frames flagged.
    pub fn mark_rollback_only(handle: TransactionHandle) -> usize {
        CONTEXT_STACK.with(|stack| {
            let mut flagged = 0;
            for frame in stack.borrow_mut().iter_mut().filter(|f| f.handle == handle) {
                frame.set_rollback_only();
                flagged += 1;
            }
            flagged
        })
    }

    /// Whether any frame running in `handle` is flagged rollback-only
    pub fn is_rollback_only(handle: TransactionHandle) -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .any(|f| f.handle == handle && f.is_rollback_only())
        })
    }

    /// Transactions currently suspended by frames on this thread
    pub fn suspended_handles() -> Vec<TransactionHandle> {
        CONTEXT_STACK.with(|stack| stack.borrow().iter().filter_map(|f| f.suspended).collect())
    }

    /// Copy of every frame, outermost first (for diagnostics)
    pub fn snapshot() -> Vec<TransactionFrame> {
        CONTEXT_STACK.with(|stack| stack.borrow().clone())
    }

    /// Clear the stack (for testing)
    #[cfg(test)]
    pub fn clear() {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().clear());
    }
}
