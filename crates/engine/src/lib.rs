//! Declarative transaction demarcation engine
//!
//! This crate ties the lower layers together:
//! - Policy: propagation decision on entry
//! - Coordinator adapter: normalized access to the external coordinator
//! - Resource adapters: XA enlistment and local transactions
//! - Interceptor: the enter/exit state machine around a unit of work
//! - Bindings: service- and operation-level markers
//! - Config: `txguard.toml`
//!
//! The engine is the only component that talks to the coordinator; the
//! context stack and the frames it holds live in `txguard-concurrency`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod binder;
pub mod config;
pub mod coordinator;
pub mod interceptor;
pub mod marker;
pub mod policy;
pub mod resource;

pub use binder::ServiceBinding;
pub use config::{TxConfig, CONFIG_FILE_NAME, DEFAULT_MAX_DEPTH};
pub use coordinator::{CoordinatorAdapter, TransactionMetrics};
pub use interceptor::{InterceptorBuilder, TransactionalInterceptor};
pub use marker::Transactional;
pub use policy::{decide, Action};
pub use resource::{ResourceAdapter, ResourceMode, ResourceRegistry};
