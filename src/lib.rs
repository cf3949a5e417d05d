//! txguard - declarative transaction demarcation
//!
//! Wraps units of work with `REQUIRED` / `REQUIRES_NEW` propagation over an
//! external two-phase-commit coordinator. Each thread keeps its own stack of
//! transaction frames; nested calls join, begin, or suspend-and-begin
//! transactions and every exit path restores the caller's context.
//!
//! # Quick Start
//!
//! ```ignore
//! use txguard::{CoordinatorAdapter, ResourceAdapter, Transactional, TransactionalInterceptor};
//!
//! let coordinator = CoordinatorAdapter::new(jta_manager);
//! let orders = Arc::new(ResourceAdapter::xa(orders_db, coordinator.clone()));
//! let interceptor = TransactionalInterceptor::builder(coordinator)
//!     .resource(orders.clone())
//!     .build();
//!
//! interceptor.invoke(&Transactional::required(), || {
//!     let tx = orders.join_current()?;
//!     orders_db.insert(tx, 42)
//! })?;
//! ```
//!
//! # Architecture
//!
//! - `txguard-core`: handles, propagation, errors, collaborator traits
//! - `txguard-concurrency`: frames and the thread-local context stack
//! - `txguard-engine`: policy, coordinator/resource adapters, interceptor

pub use txguard_concurrency::{Completion, ContextStack, FrameState, TransactionFrame};
pub use txguard_core::{
    IsolationLevel, LocalResource, Outcome, Propagation, RollbackCause, TransactionCoordinator,
    TransactionHandle, TransactionalError, TxError, TxResult, Vote, XaParticipant,
};
pub use txguard_engine::{
    decide, Action, CoordinatorAdapter, InterceptorBuilder, ResourceAdapter, ResourceMode,
    ResourceRegistry, ServiceBinding, TransactionMetrics, Transactional,
    TransactionalInterceptor, TxConfig, CONFIG_FILE_NAME,
};
