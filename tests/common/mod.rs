//! Shared test utilities for all integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from any test's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::sync::Arc;
pub use txguard::{
    ContextStack, CoordinatorAdapter, Outcome, Propagation, ResourceAdapter, RollbackCause,
    ServiceBinding, TransactionHandle, Transactional, TransactionalError,
    TransactionalInterceptor, TxConfig, TxError,
};
pub use txguard_testkit::{CoordinatorEvent, Failure, InMemoryTable, RecordingCoordinator};

// ============================================================================
// Errors
// ============================================================================

/// Business failure raised by the test services
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Deliberate failure that must roll back the caller's work
    Rollback,
    /// Demarcation or resource failure bubbling up through a service
    Tx(TxError),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Rollback => f.write_str("business rollback"),
            AppError::Tx(e) => write!(f, "{}", e),
        }
    }
}

impl From<TxError> for AppError {
    fn from(e: TxError) -> Self {
        AppError::Tx(e)
    }
}

impl From<TransactionalError<AppError>> for AppError {
    fn from(e: TransactionalError<AppError>) -> Self {
        match e {
            TransactionalError::Method { error, .. } => error,
            TransactionalError::Transaction { error, .. } => AppError::Tx(error),
        }
    }
}

pub type AppResult<T> = Result<T, TransactionalError<AppError>>;

pub fn h(n: u64) -> TransactionHandle {
    TransactionHandle::new(n)
}

// ============================================================================
// Services
// ============================================================================

/// Service writing rows to one table, transactional at service level
pub struct TableService {
    pub table: Arc<InMemoryTable>,
    pub resource: Arc<ResourceAdapter>,
    binding: ServiceBinding,
}

impl TableService {
    pub fn new(
        table: Arc<InMemoryTable>,
        resource: Arc<ResourceAdapter>,
        interceptor: Arc<TransactionalInterceptor>,
    ) -> Self {
        let binding = ServiceBinding::new(resource.name().to_string(), interceptor)
            .annotate_service(Transactional::required())
            .exclude("row_count");
        Self {
            table,
            resource,
            binding,
        }
    }

    pub fn insert(&self, id: u64) -> AppResult<()> {
        self.binding.invoke("insert", || {
            let tx = self.resource.join_current()?;
            self.table.insert(tx, id)?;
            Ok(())
        })
    }

    pub fn row_count(&self) -> usize {
        self.binding
            .invoke("row_count", || Ok::<_, AppError>(self.table.rows().len()))
            .unwrap_or(0)
    }
}

/// Process spanning both databases, one marker per operation
pub struct Process {
    pub service1: TableService,
    pub service2: TableService,
    binding: ServiceBinding,
}

impl Process {
    fn insert_both(&self, id: u64) -> Result<(), AppError> {
        self.service1.insert(id)?;
        self.service2.insert(id)?;
        Ok(())
    }

    /// REQUIRED: insert `id` in both databases
    pub fn required(&self, id: u64) -> AppResult<()> {
        self.binding.invoke("required", || self.insert_both(id))
    }

    /// REQUIRES_NEW: insert `id` in both databases
    pub fn requires_new(&self, id: u64) -> AppResult<()> {
        self.binding.invoke("requires_new", || self.insert_both(id))
    }

    /// REQUIRED: insert `id`, then fail
    pub fn required_and_rollback(&self, id: u64) -> AppResult<()> {
        self.binding.invoke("required_and_rollback", || {
            self.insert_both(id)?;
            Err(AppError::Rollback)
        })
    }

    /// REQUIRES_NEW: insert `id`, then fail
    pub fn requires_new_and_rollback(&self, id: u64) -> AppResult<()> {
        self.binding.invoke("requires_new_and_rollback", || {
            self.insert_both(id)?;
            Err(AppError::Rollback)
        })
    }

    /// REQUIRED { insert 1; REQUIRES_NEW { insert 2 } }
    pub fn required_and_requires_new(&self) -> AppResult<()> {
        self.binding.invoke("required_and_requires_new", || {
            self.insert_both(1)?;
            self.requires_new(2)?;
            Ok(())
        })
    }

    /// REQUIRED { REQUIRES_NEW { insert 2 }; insert 1 }
    pub fn requires_new_and_required(&self) -> AppResult<()> {
        self.binding.invoke("requires_new_and_required", || {
            self.requires_new(2)?;
            self.insert_both(1)?;
            Ok(())
        })
    }

    /// REQUIRED { insert 1; REQUIRES_NEW { insert 2; fail } }
    pub fn rollback_internal_requires_new(&self) -> AppResult<()> {
        self.binding.invoke("rollback_internal_requires_new", || {
            self.insert_both(1)?;
            let inner = self.requires_new_and_rollback(2);
            assert!(inner.is_err());
            Ok::<_, AppError>(())
        })
    }

    /// REQUIRED { REQUIRES_NEW { insert 1; fail }; insert 2 }
    pub fn rollback_internal_requires_new2(&self) -> AppResult<()> {
        self.binding.invoke("rollback_internal_requires_new2", || {
            let inner = self.requires_new_and_rollback(1);
            assert!(inner.is_err());
            self.insert_both(2)?;
            Ok(())
        })
    }

    /// REQUIRED { REQUIRES_NEW { insert 1 }; insert 2; fail }
    pub fn rollback_external_required(&self) -> AppResult<()> {
        self.binding.invoke("rollback_external_required", || {
            self.requires_new(1)?;
            self.insert_both(2)?;
            Err::<(), _>(AppError::Rollback)
        })
    }

    /// REQUIRED { insert 1; REQUIRES_NEW { insert 2 }; fail }
    pub fn rollback_external_required2(&self) -> AppResult<()> {
        self.binding.invoke("rollback_external_required2", || {
            self.insert_both(1)?;
            self.requires_new(2)?;
            Err::<(), _>(AppError::Rollback)
        })
    }
}

// ============================================================================
// Fixture
// ============================================================================

/// Two XA databases, one coordinator, one interceptor
pub struct Fixture {
    pub coordinator: Arc<RecordingCoordinator>,
    pub interceptor: Arc<TransactionalInterceptor>,
    pub db1: Arc<InMemoryTable>,
    pub db2: Arc<InMemoryTable>,
    pub process: Process,
}

impl Fixture {
    /// Fixture with both databases enlisted as XA participants
    pub fn xa() -> Self {
        Self::build(TxConfig::default(), |table, coordinator| {
            ResourceAdapter::xa(table, coordinator.clone())
        })
    }

    /// Fixture with both databases running local transactions
    pub fn local() -> Self {
        Self::build(TxConfig::default(), |table, _| ResourceAdapter::local(table))
    }

    /// XA fixture with a custom config
    pub fn xa_with_config(config: TxConfig) -> Self {
        Self::build(config, |table, coordinator| {
            ResourceAdapter::xa(table, coordinator.clone())
        })
    }

    fn build(
        config: TxConfig,
        make: impl Fn(Arc<InMemoryTable>, &CoordinatorAdapter) -> ResourceAdapter,
    ) -> Self {
        txguard_testkit::init_tracing();
        let coordinator = Arc::new(RecordingCoordinator::new());
        let adapter = CoordinatorAdapter::new(coordinator.clone());
        let db1 = Arc::new(InMemoryTable::new("db1"));
        let db2 = Arc::new(InMemoryTable::new("db2"));
        let resource1 = Arc::new(make(db1.clone(), &adapter));
        let resource2 = Arc::new(make(db2.clone(), &adapter));

        let interceptor = Arc::new(
            TransactionalInterceptor::builder(adapter)
                .resource(resource1.clone())
                .resource(resource2.clone())
                .config(config)
                .build(),
        );

        let required = Transactional::required();
        let requires_new = Transactional::requires_new();
        let binding = ServiceBinding::new("process", interceptor.clone())
            .annotate_method("required", required.clone())
            .annotate_method("requires_new", requires_new.clone())
            .annotate_method("required_and_rollback", required.clone())
            .annotate_method("requires_new_and_rollback", requires_new)
            .annotate_method("required_and_requires_new", required.clone())
            .annotate_method("requires_new_and_required", required.clone())
            .annotate_method("rollback_internal_requires_new", required.clone())
            .annotate_method("rollback_internal_requires_new2", required.clone())
            .annotate_method("rollback_external_required", required.clone())
            .annotate_method("rollback_external_required2", required);

        let process = Process {
            service1: TableService::new(db1.clone(), resource1, interceptor.clone()),
            service2: TableService::new(db2.clone(), resource2, interceptor.clone()),
            binding,
        };

        Fixture {
            coordinator,
            interceptor,
            db1,
            db2,
            process,
        }
    }

    /// Assert both databases hold exactly `rows`
    pub fn assert_rows(&self, rows: &[u64]) {
        assert_eq!(self.db1.rows(), rows, "db1 rows");
        assert_eq!(self.db2.rows(), rows, "db2 rows");
    }

    /// Assert nothing is left over on this thread or in the coordinator
    pub fn assert_quiescent(&self) {
        assert!(ContextStack::is_empty(), "context stack not empty");
        assert_eq!(self.coordinator.associated(), None, "thread still associated");
        assert_eq!(self.coordinator.active_transactions(), 0, "transactions left open");
        let begins = self.count(|e| matches!(e, CoordinatorEvent::Begin(_)));
        let ends = self.count(|e| {
            matches!(e, CoordinatorEvent::Commit(_) | CoordinatorEvent::Rollback(_))
        });
        assert_eq!(begins, ends, "every begin needs exactly one commit or rollback");
        let suspends = self.count(|e| matches!(e, CoordinatorEvent::Suspend(_)));
        let resumes = self.count(|e| matches!(e, CoordinatorEvent::Resume(_)));
        assert_eq!(suspends, resumes, "every suspend needs exactly one resume");
    }

    pub fn count(&self, pred: impl Fn(&CoordinatorEvent) -> bool) -> usize {
        self.coordinator.count(pred)
    }

    /// Recorded events without enlistments
    pub fn lifecycle_events(&self) -> Vec<CoordinatorEvent> {
        self.coordinator
            .events()
            .into_iter()
            .filter(|e| !matches!(e, CoordinatorEvent::Enlist(_, _)))
            .collect()
    }
}

/// Interceptor with no resources over a fresh recording coordinator
pub fn bare_interceptor() -> (Arc<RecordingCoordinator>, Arc<TransactionalInterceptor>) {
    let coordinator = Arc::new(RecordingCoordinator::new());
    let interceptor = Arc::new(TransactionalInterceptor::new(CoordinatorAdapter::new(
        coordinator.clone(),
    )));
    (coordinator, interceptor)
}
