//! Resource manager adapters
//!
//! A [`ResourceAdapter`] wraps one logical resource (one database, one
//! queue) and joins it to the active global transaction on first use:
//!
//! - **XA** resources are enlisted with the coordinator. From then on the
//!   coordinator's two-phase protocol commits or rolls them back; the
//!   adapter never touches the physical transaction itself.
//! - **Local** resources run their own local transaction. The adapter begins
//!   it on first use and commits or rolls it back once the global
//!   transaction's outcome is known.
//!
//! Enlistments are tracked per handle and torn down when the transaction
//! reaches its terminal outcome, never on suspend: a resource used by an
//! outer transaction stays enlisted while a `REQUIRES_NEW` call runs.
//!
//! Only adapters registered in a [`ResourceRegistry`] hear about terminal
//! outcomes, so an unregistered adapter refuses to join any transaction.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use txguard_concurrency::ContextStack;
use txguard_core::{
    LocalResource, Outcome, TransactionHandle, TxError, TxResult, XaParticipant,
};

use crate::coordinator::CoordinatorAdapter;

/// How a resource takes part in global transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceMode {
    /// Enlisted in the coordinator's two-phase commit
    Xa,
    /// Own local transaction, driven after the global outcome
    Local,
}

enum Backend {
    Xa {
        participant: Arc<dyn XaParticipant>,
        coordinator: CoordinatorAdapter,
    },
    Local(Arc<dyn LocalResource>),
}

#[derive(Default)]
struct Enlistments {
    joined: HashSet<TransactionHandle>,
    /// Handles whose enlist/begin call is in flight
    pending: HashSet<TransactionHandle>,
}

/// Adapter joining one resource to global transactions
pub struct ResourceAdapter {
    name: String,
    backend: Backend,
    registered: AtomicBool,
    enlisted: Mutex<Enlistments>,
}

impl fmt::Debug for ResourceAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceAdapter")
            .field("name", &self.name)
            .field("mode", &self.mode())
            .field("registered", &self.is_registered())
            .field("enlisted", &self.enlisted_count())
            .finish()
    }
}

impl ResourceAdapter {
    /// Adapter for a resource taking part in two-phase commit
    pub fn xa(participant: Arc<dyn XaParticipant>, coordinator: CoordinatorAdapter) -> Self {
        Self {
            name: participant.name().to_string(),
            backend: Backend::Xa {
                participant,
                coordinator,
            },
            registered: AtomicBool::new(false),
            enlisted: Mutex::new(Enlistments::default()),
        }
    }

    /// Adapter for a resource with its own local transactions
    pub fn local(resource: Arc<dyn LocalResource>) -> Self {
        Self {
            name: resource.name().to_string(),
            backend: Backend::Local(resource),
            registered: AtomicBool::new(false),
            enlisted: Mutex::new(Enlistments::default()),
        }
    }

    /// Resource name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the adapter was added to a [`ResourceRegistry`]
    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::Acquire)
    }

    fn mark_registered(&self) {
        self.registered.store(true, Ordering::Release);
    }

    /// How this resource joins transactions
    pub fn mode(&self) -> ResourceMode {
        match self.backend {
            Backend::Xa { .. } => ResourceMode::Xa,
            Backend::Local(_) => ResourceMode::Local,
        }
    }

    /// Join the transaction active on the calling thread
    ///
    /// This is what business code calls before using the resource.
    ///
    /// # Errors
    /// * `NoActiveTransaction` - called outside an intercepted call
    /// * `EnlistmentError` - the resource could not join
    pub fn join_current(&self) -> TxResult<TransactionHandle> {
        let handle = ContextStack::current().ok_or(TxError::NoActiveTransaction)?;
        self.enlist_or_begin(handle)?;
        Ok(handle)
    }

    /// Associate the resource with `handle`, once per transaction
    ///
    /// XA resources are enlisted with the coordinator; local resources begin
    /// their local unit of work, using the active frame's isolation hint when
    /// `handle` is the active transaction. Repeated calls for the same handle
    /// are no-ops.
    ///
    /// The external call runs without holding the adapter's lock; the handle
    /// is reserved first so a second caller for the same handle is refused
    /// instead of enlisting twice.
    ///
    /// # Errors
    /// Returns `EnlistmentError` if the resource cannot associate, if the
    /// adapter is not registered with any interceptor, or if an enlistment
    /// for `handle` is already in flight.
    pub fn enlist_or_begin(&self, handle: TransactionHandle) -> TxResult<()> {
        if !self.is_registered() {
            return Err(TxError::enlistment(
                &self.name,
                handle,
                "resource is not registered with an interceptor",
            ));
        }
        {
            let mut enlisted = self.enlisted.lock();
            if enlisted.joined.contains(&handle) {
                return Ok(());
            }
            if !enlisted.pending.insert(handle) {
                return Err(TxError::enlistment(
                    &self.name,
                    handle,
                    "enlistment already in progress",
                ));
            }
        }

        let result = match &self.backend {
            Backend::Xa {
                participant,
                coordinator,
            } => coordinator.enlist(handle, participant.clone()),
            Backend::Local(resource) => {
                let isolation = if ContextStack::current() == Some(handle) {
                    ContextStack::current_isolation()
                } else {
                    None
                };
                resource.begin_local(handle, isolation)
            }
        };

        let mut enlisted = self.enlisted.lock();
        enlisted.pending.remove(&handle);
        match result {
            Ok(()) => {
                enlisted.joined.insert(handle);
                drop(enlisted);
                debug!(target: "txguard::tx", resource = %self.name, handle = %handle, mode = ?self.mode(), "Resource joined transaction");
                Ok(())
            }
            Err(TxError::EnlistmentError { reason, .. }) => {
                Err(TxError::enlistment(&self.name, handle, reason))
            }
            Err(e) => Err(TxError::enlistment(&self.name, handle, e.to_string())),
        }
    }

    /// Whether the resource is associated with `handle`
    pub fn is_enlisted(&self, handle: TransactionHandle) -> bool {
        self.enlisted.lock().joined.contains(&handle)
    }

    /// Number of transactions the resource is associated with
    pub fn enlisted_count(&self) -> usize {
        self.enlisted.lock().joined.len()
    }

    /// Commit the resource's part of `handle`
    ///
    /// Local resources run their own commit. XA resources were already
    /// committed by the coordinator; only the enlistment is torn down.
    /// A resource not associated with `handle` is left alone.
    pub fn commit_local(&self, handle: TransactionHandle) -> TxResult<()> {
        if !self.enlisted.lock().joined.remove(&handle) {
            return Ok(());
        }
        match &self.backend {
            Backend::Xa { .. } => Ok(()),
            Backend::Local(resource) => resource.commit_local(handle),
        }
    }

    /// Roll back the resource's part of `handle`
    ///
    /// Same delegation rules as [`ResourceAdapter::commit_local`].
    pub fn rollback_local(&self, handle: TransactionHandle) -> TxResult<()> {
        if !self.enlisted.lock().joined.remove(&handle) {
            return Ok(());
        }
        match &self.backend {
            Backend::Xa { .. } => Ok(()),
            Backend::Local(resource) => resource.rollback_local(handle),
        }
    }

    /// Apply the terminal outcome of `handle` to this resource
    ///
    /// # Errors
    /// A local commit that fails after the global commit succeeded is
    /// reported as `PartialCommit`.
    pub fn after_completion(&self, handle: TransactionHandle, outcome: Outcome) -> TxResult<()> {
        match outcome {
            Outcome::Committed => self.commit_local(handle).map_err(|e| TxError::PartialCommit {
                handle,
                resource: self.name.clone(),
                reason: e.to_string(),
            }),
            Outcome::RolledBack => self.rollback_local(handle),
        }
    }
}

/// Resources bound to one interceptor
///
/// After a transaction owned by the interceptor ends, every registered
/// resource is told the outcome.
#[derive(Debug, Default, Clone)]
pub struct ResourceRegistry {
    adapters: Vec<Arc<ResourceAdapter>>,
}

impl ResourceRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter
    ///
    /// From now on the adapter may join transactions.
    pub fn register(&mut self, adapter: Arc<ResourceAdapter>) {
        adapter.mark_registered();
        self.adapters.push(adapter);
    }

    /// Look up an adapter by name
    pub fn get(&self, name: &str) -> Option<&Arc<ResourceAdapter>> {
        self.adapters.iter().find(|a| a.name() == name)
    }

    /// Number of registered adapters
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// True when no adapter is registered
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Iterate over registered adapters
    pub fn iter(&self) -> impl Iterator<Item = &Arc<ResourceAdapter>> {
        self.adapters.iter()
    }

    /// Tell every resource the outcome of `handle`
    ///
    /// Every resource is notified even when an earlier one fails; the first
    /// failure is returned and the rest are logged.
    pub fn after_completion(&self, handle: TransactionHandle, outcome: Outcome) -> TxResult<()> {
        let mut first_error = None;
        for adapter in &self.adapters {
            if let Err(e) = adapter.after_completion(handle, outcome) {
                warn!(target: "txguard::tx", resource = %adapter.name(), handle = %handle, outcome = %outcome, error = %e, "Resource completion failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
