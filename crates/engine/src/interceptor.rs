//! Transactional interceptor
//!
//! Wraps a unit of work with declarative transaction demarcation. On entry
//! the propagation policy decides whether the call joins the active
//! transaction, begins one, or suspends the active one and begins a fresh
//! one. On exit the outcome is applied:
//!
//! | Frame   | Body returned            | Body failed           |
//! |---------|--------------------------|-----------------------|
//! | created | commit (or rollback if   | rollback              |
//! |         | marked rollback-only)    |                       |
//! | joined  | nothing                  | mark rollback-only    |
//!
//! Then, on every path, a suspended outer transaction is resumed and the
//! frame is popped. A panic in the body takes the failure path from the
//! frame guard's `Drop`.
//!
//! # Example
//!
//! ```ignore
//! let interceptor = TransactionalInterceptor::builder(coordinator)
//!     .resource(db.clone())
//!     .build();
//!
//! interceptor.invoke(&Transactional::required(), || {
//!     let tx = db.join_current()?;
//!     table.insert(tx, 1)
//! })?;
//! ```

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};
use txguard_concurrency::{Completion, ContextStack, FrameId, TransactionFrame};
use txguard_core::{
    Outcome, RollbackCause, TransactionHandle, TransactionalError, TxError, TxResult,
};

use crate::config::TxConfig;
use crate::coordinator::{CoordinatorAdapter, TransactionMetrics};
use crate::marker::Transactional;
use crate::policy::{decide, Action};
use crate::resource::{ResourceAdapter, ResourceRegistry};

/// Builder for [`TransactionalInterceptor`]
#[derive(Debug)]
pub struct InterceptorBuilder {
    coordinator: CoordinatorAdapter,
    resources: ResourceRegistry,
    config: TxConfig,
}

impl InterceptorBuilder {
    /// Register a resource to notify when transactions owned by the
    /// interceptor complete
    pub fn resource(mut self, adapter: Arc<ResourceAdapter>) -> Self {
        self.resources.register(adapter);
        self
    }

    /// Use `config` instead of the defaults
    pub fn config(mut self, config: TxConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the interceptor
    pub fn build(self) -> TransactionalInterceptor {
        TransactionalInterceptor {
            coordinator: self.coordinator,
            resources: self.resources,
            config: self.config,
        }
    }
}

/// Applies [`Transactional`] markers around units of work
///
/// Every interceptor used on one thread must wrap the same coordinator:
/// the context stack is per thread, not per interceptor.
pub struct TransactionalInterceptor {
    coordinator: CoordinatorAdapter,
    resources: ResourceRegistry,
    config: TxConfig,
}

impl fmt::Debug for TransactionalInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalInterceptor")
            .field("coordinator", &self.coordinator)
            .field("resources", &self.resources.len())
            .field("config", &self.config)
            .finish()
    }
}

impl TransactionalInterceptor {
    /// Interceptor with default config and no resources
    pub fn new(coordinator: CoordinatorAdapter) -> Self {
        Self::builder(coordinator).build()
    }

    /// Start building an interceptor
    pub fn builder(coordinator: CoordinatorAdapter) -> InterceptorBuilder {
        InterceptorBuilder {
            coordinator,
            resources: ResourceRegistry::new(),
            config: TxConfig::default(),
        }
    }

    /// Coordinator adapter
    pub fn coordinator(&self) -> &CoordinatorAdapter {
        &self.coordinator
    }

    /// Registered resources
    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    /// Active configuration
    pub fn config(&self) -> &TxConfig {
        &self.config
    }

    /// Snapshot of the coordinator metrics
    pub fn metrics(&self) -> TransactionMetrics {
        self.coordinator.metrics()
    }

    /// Transaction active on the calling thread
    pub fn current(&self) -> Option<TransactionHandle> {
        ContextStack::current()
    }

    /// Veto the active transaction without failing the call
    ///
    /// The transaction will roll back when the frame that began it exits,
    /// whatever the bodies in between return.
    ///
    /// # Errors
    /// * `NoActiveTransaction` - called outside an intercepted call
    pub fn mark_rollback_only(&self) -> TxResult<TransactionHandle> {
        let handle = ContextStack::current().ok_or(TxError::NoActiveTransaction)?;
        self.veto(handle)?;
        Ok(handle)
    }

    /// Run `body` with the config's default marker
    pub fn invoke_default<T, E, F>(&self, body: F) -> Result<T, TransactionalError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.invoke(&self.config.default_marker(), body)
    }

    /// Run `body` under the demarcation declared by `marker`
    ///
    /// # Returns
    /// * `Ok(T)` - body succeeded and its transaction outcome was applied
    /// * `Err(TransactionalError::Method)` - body failed; the failure is
    ///   returned unchanged, with any rollback problem attached
    /// * `Err(TransactionalError::Transaction)` - demarcation failed: begin,
    ///   suspend, commit, a rollback-only outcome, or resume
    pub fn invoke<T, E, F>(&self, marker: &Transactional, body: F) -> Result<T, TransactionalError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let context = marker.message.as_deref();
        let scope = self
            .enter(marker)
            .map_err(|e| TransactionalError::transaction(e).with_context(context))?;

        let result = match body() {
            Ok(value) => {
                let decision = self.complete(&scope, marker);
                let finished = scope.finish();
                match merge(decision, finished) {
                    Ok(()) => Ok(value),
                    Err(e) => Err(TransactionalError::transaction(e)),
                }
            }
            Err(error) => {
                let mut failure = TransactionalError::method(error);
                if let Err(e) = self.abort(&scope) {
                    failure = failure.with_secondary(e);
                }
                if let Err(e) = scope.finish() {
                    failure = failure.with_secondary(e);
                }
                Err(failure)
            }
        };
        result.map_err(|e| e.with_context(context))
    }

    fn enter(&self, marker: &Transactional) -> TxResult<FrameScope<'_>> {
        let depth = ContextStack::depth();
        if depth >= self.config.max_depth {
            return Err(TxError::invalid_state(format!(
                "transactional nesting depth {} exceeds max_depth {}",
                depth + 1,
                self.config.max_depth
            )));
        }

        let current = ContextStack::current();
        let action = decide(marker.propagation, current.is_some());
        let frame = match action {
            Action::Join => {
                let handle = current.ok_or(TxError::NoActiveTransaction)?;
                self.coordinator.record_join();
                // Isolation belongs to the transaction, not the joining call
                TransactionFrame::joined(marker.propagation, handle)
                    .with_isolation(ContextStack::current_isolation())
            }
            Action::Begin => {
                let handle = self.coordinator.begin()?;
                TransactionFrame::begun(marker.propagation, handle, None)
                    .with_isolation(marker.isolation.or(self.config.default_isolation))
            }
            Action::SuspendAndBegin => {
                let suspended = match current {
                    Some(expected) => {
                        let outer = self.coordinator.suspend()?;
                        if outer != expected {
                            warn!(target: "txguard::tx", expected = %expected, suspended = %outer, "Coordinator suspended a different transaction than the active frame");
                        }
                        Some(outer)
                    }
                    None => None,
                };
                match self.coordinator.begin() {
                    Ok(handle) => TransactionFrame::begun(marker.propagation, handle, suspended)
                        .with_isolation(marker.isolation.or(self.config.default_isolation)),
                    Err(e) => {
                        if let Some(outer) = suspended {
                            if let Err(resume_err) = self.coordinator.resume(outer) {
                                error!(target: "txguard::tx", handle = %outer, error = %resume_err, "Failed to resume suspended transaction after begin failure");
                            }
                        }
                        return Err(e);
                    }
                }
            }
        };

        let handle = frame.handle;
        let created = frame.created;
        let suspended = frame.suspended;

        let id = match ContextStack::push(frame) {
            Ok(id) => id,
            Err(e) => {
                error!(target: "txguard::tx", handle = %handle, error = %e, "Could not push transaction frame");
                if created {
                    if let Err(rollback_err) = self.roll_back(handle) {
                        error!(target: "txguard::tx", handle = %handle, error = %rollback_err, "Rollback after failed push failed");
                    }
                }
                if let Some(outer) = suspended {
                    if let Err(resume_err) = self.coordinator.resume(outer) {
                        error!(target: "txguard::tx", handle = %outer, error = %resume_err, "Resume after failed push failed");
                    }
                }
                return Err(e);
            }
        };

        debug!(target: "txguard::tx", handle = %handle, frame = id, action = %action, depth = depth + 1, "Entered transactional call");
        Ok(FrameScope {
            interceptor: self,
            id,
            handle,
            created,
            suspended,
            decided: Cell::new(false),
            finished: false,
        })
    }

    /// Apply the outcome of a body that returned normally
    fn complete(&self, scope: &FrameScope<'_>, marker: &Transactional) -> TxResult<()> {
        let handle = scope.handle;
        if !scope.created {
            return scope.mark_exiting(Completion::Commit);
        }

        if marker.rollback_only {
            self.begin_exit(scope, Completion::Rollback)?;
            scope.decide();
            return self.roll_back(handle);
        }

        if self.is_marked_rollback_only(handle) {
            self.begin_exit(scope, Completion::Rollback)?;
            scope.decide();
            if let Err(e) = self.roll_back(handle) {
                warn!(target: "txguard::tx", handle = %handle, error = %e, "Rollback of rollback-only transaction failed");
            }
            return Err(TxError::rolled_back(handle, RollbackCause::RollbackOnly));
        }

        self.begin_exit(scope, Completion::Commit)?;
        scope.decide();
        match self.coordinator.commit(handle) {
            Ok(()) => self.resources.after_completion(handle, Outcome::Committed),
            Err(e) => {
                if let Err(relabel) = scope.mark_exiting(Completion::Rollback) {
                    warn!(target: "txguard::tx", handle = %handle, error = %relabel, "Could not relabel failed commit");
                }
                let _ = self.resources.after_completion(handle, Outcome::RolledBack);
                Err(e)
            }
        }
    }

    /// Apply the outcome of a body that failed
    fn abort(&self, scope: &FrameScope<'_>) -> TxResult<()> {
        let exiting = scope.mark_exiting(Completion::Rollback);
        let outcome = if scope.created {
            scope.decide();
            self.roll_back(scope.handle)
        } else {
            self.veto(scope.handle)
        };
        merge(outcome, exiting)
    }

    /// Move the frame to `Exiting`, rolling back an owned transaction if
    /// the frame is not in a state to exit
    fn begin_exit(&self, scope: &FrameScope<'_>, completion: Completion) -> TxResult<()> {
        scope.mark_exiting(completion).map_err(|e| {
            if scope.created {
                scope.decide();
                if let Err(rollback_err) = self.roll_back(scope.handle) {
                    warn!(target: "txguard::tx", handle = %scope.handle, error = %rollback_err, "Rollback after illegal exit failed");
                }
            }
            e
        })
    }

    /// Roll back through the coordinator, then release local resources
    fn roll_back(&self, handle: TransactionHandle) -> TxResult<()> {
        let rolled_back = self.coordinator.rollback(handle);
        let released = self.resources.after_completion(handle, Outcome::RolledBack);
        merge(rolled_back, released)
    }

    /// Flag `handle` rollback-only on the frame stack and the coordinator
    fn veto(&self, handle: TransactionHandle) -> TxResult<()> {
        let flagged = ContextStack::mark_rollback_only(handle);
        debug!(target: "txguard::tx", handle = %handle, frames = flagged, "Vetoing transaction");
        self.coordinator.set_rollback_only(handle)
    }

    fn is_marked_rollback_only(&self, handle: TransactionHandle) -> bool {
        if ContextStack::is_rollback_only(handle) {
            return true;
        }
        match self.coordinator.is_rollback_only(handle) {
            Ok(flag) => flag,
            Err(e) => {
                warn!(target: "txguard::tx", handle = %handle, error = %e, "Rollback-only query failed, attempting commit");
                false
            }
        }
    }
}

/// Combine two outcomes, keeping the more serious error
///
/// A corrupted context outranks everything else; otherwise the first
/// error wins. The dropped error is logged.
fn merge(first: TxResult<()>, second: TxResult<()>) -> TxResult<()> {
    match (first, second) {
        (Ok(()), Ok(())) => Ok(()),
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Err(a), Err(b)) => {
            let (kept, dropped) = if b.is_fatal() && !a.is_fatal() {
                (b, a)
            } else {
                (a, b)
            };
            warn!(target: "txguard::tx", kept = %kept, dropped = %dropped, "Multiple demarcation failures");
            Err(kept)
        }
    }
}

/// Guard for one pushed frame
///
/// `finish` restores the context on the normal paths. If the guard is
/// dropped unfinished, the body (or a completion callback) unwound: the
/// frame's transaction is rolled back (or vetoed, if joined) before the
/// context is restored, unless its terminal decision was already issued.
struct FrameScope<'a> {
    interceptor: &'a TransactionalInterceptor,
    id: FrameId,
    handle: TransactionHandle,
    created: bool,
    suspended: Option<TransactionHandle>,
    /// Commit or rollback was sent to the coordinator
    decided: Cell<bool>,
    finished: bool,
}

impl FrameScope<'_> {
    fn decide(&self) {
        self.decided.set(true);
    }

    fn mark_exiting(&self, completion: Completion) -> TxResult<()> {
        ContextStack::with_frame_mut(self.id, |frame| frame.mark_exiting(completion))
            .unwrap_or_else(|| Err(self.missing()))
    }

    fn finish(mut self) -> TxResult<()> {
        self.finished = true;
        self.restore()
    }

    /// Resume the suspended transaction and pop the frame
    ///
    /// Both steps always run.
    fn restore(&self) -> TxResult<()> {
        let resumed = match self.suspended {
            Some(outer) => self.interceptor.coordinator.resume(outer),
            None => Ok(()),
        };
        let done = ContextStack::with_frame_mut(self.id, |frame| frame.mark_done())
            .unwrap_or_else(|| Err(self.missing()));
        let popped = ContextStack::pop_frame(self.id).map(|frame| {
            debug!(target: "txguard::tx", handle = %frame.handle, frame = frame.id, created = frame.created, "Exited transactional call");
        });
        merge(merge(popped, resumed), done)
    }

    fn missing(&self) -> TxError {
        TxError::corrupted(format!(
            "frame {} ({}) missing from context stack",
            self.id, self.handle
        ))
    }
}

impl Drop for FrameScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let interceptor = self.interceptor;
        let _ = self.mark_exiting(Completion::Rollback);
        let outcome = if self.decided.get() {
            warn!(target: "txguard::tx", handle = %self.handle, frame = self.id, "Transactional call unwound after its outcome was decided");
            Ok(())
        } else if self.created {
            warn!(target: "txguard::tx", handle = %self.handle, frame = self.id, "Transactional call unwound, rolling back");
            interceptor.roll_back(self.handle)
        } else {
            warn!(target: "txguard::tx", handle = %self.handle, frame = self.id, "Joined call unwound, vetoing transaction");
            interceptor.veto(self.handle)
        };
        if let Err(e) = merge(outcome, self.restore()) {
            error!(target: "txguard::tx", handle = %self.handle, frame = self.id, error = %e, "Cleanup after unwind failed");
        }
    }
}
