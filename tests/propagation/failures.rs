//! Failure Path Tests
//!
//! Coordinator and resource failures, panics, and the guarantees that hold
//! on every exit path: the original failure reaches the caller, nothing
//! partial is committed, and the thread's context is restored.

use crate::common::*;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tempfile::TempDir;
use txguard::TransactionCoordinator;
use txguard_testkit::CoordinatorEvent::*;

// ============================================================================
// Coordinator Failures
// ============================================================================

#[test]
fn begin_failure_after_suspend_resumes_outer() {
    let fx = Fixture::xa();

    fx.interceptor
        .invoke(&Transactional::required(), || {
            fx.process.service1.insert(1)?;
            fx.coordinator
                .fail_next(Failure::Begin(TxError::unavailable("no free slots")));

            let inner = fx.process.requires_new(2).unwrap_err();
            assert!(matches!(
                inner.transaction_error(),
                Some(TxError::CoordinatorUnavailable { .. })
            ));
            // Outer transaction is associated again and still usable
            assert_eq!(fx.coordinator.associated(), Some(h(1)));
            assert_eq!(ContextStack::depth(), 1);
            fx.process.service2.insert(1)?;
            Ok::<_, AppError>(())
        })
        .unwrap();

    fx.assert_rows(&[1]);
    assert_eq!(
        fx.lifecycle_events(),
        vec![Begin(h(1)), Suspend(h(1)), Resume(h(1)), Commit(h(1))]
    );
    fx.assert_quiescent();
}

#[test]
fn commit_timeout_is_reported_as_rollback() {
    let fx = Fixture::xa();
    fx.coordinator
        .fail_next(Failure::Commit(TxError::timeout(h(1), "commit")));

    let err = fx.process.required(1).unwrap_err();
    assert!(matches!(
        err.transaction_error(),
        Some(TxError::CoordinatorTimeout { .. })
    ));
    assert!(err.is_rollback());
    fx.assert_rows(&[]);
    fx.assert_quiescent();
}

#[test]
fn participant_abort_vote_rolls_back_both_databases() {
    let fx = Fixture::xa();
    fx.db2.abort_next_prepare("check constraint");

    let err = fx.process.required(1).unwrap_err();
    match err.transaction_error() {
        Some(TxError::TransactionRolledBack {
            cause: RollbackCause::ParticipantVote { participant, reason },
            ..
        }) => {
            assert_eq!(participant, "db2");
            assert_eq!(reason, "check constraint");
        }
        other => panic!("unexpected error {:?}", other),
    }
    fx.assert_rows(&[]);
    fx.assert_quiescent();
    assert_eq!(fx.interceptor.metrics().total_rolled_back, 1);
}

#[test]
fn inner_commit_failure_does_not_touch_outer() {
    let fx = Fixture::xa();

    fx.interceptor
        .invoke(&Transactional::required(), || {
            fx.process.service1.insert(1)?;
            fx.coordinator
                .fail_next(Failure::Commit(TxError::invalid_state("log device full")));
            let inner = fx.process.requires_new(2).unwrap_err();
            assert!(matches!(
                inner.transaction_error(),
                Some(TxError::TransactionRolledBack {
                    cause: RollbackCause::CommitFailure(_),
                    ..
                })
            ));
            fx.process.service2.insert(1)?;
            Ok::<_, AppError>(())
        })
        .unwrap();

    fx.assert_rows(&[1]);
    fx.assert_quiescent();
}

#[test]
fn suspend_failure_skips_inner_body_and_keeps_outer() {
    let (coordinator, interceptor) = bare_interceptor();

    interceptor
        .invoke(&Transactional::required(), || {
            coordinator.fail_next(Failure::Suspend(TxError::NoActiveTransaction));
            let mut ran = false;
            let inner = interceptor.invoke(&Transactional::requires_new(), || {
                ran = true;
                Ok::<_, AppError>(())
            });

            assert!(!ran);
            assert!(matches!(
                inner,
                Err(TransactionalError::Transaction {
                    error: TxError::NoActiveTransaction,
                    ..
                })
            ));
            assert_eq!(ContextStack::depth(), 1);
            assert_eq!(interceptor.current(), Some(h(1)));
            Ok::<_, AppError>(())
        })
        .unwrap();

    assert_eq!(coordinator.events(), vec![Begin(h(1)), Commit(h(1))]);
    assert_eq!(coordinator.outcome(h(1)), Some(Outcome::Committed));
    assert!(ContextStack::is_empty());
}

#[test]
fn requires_new_with_detached_thread_reports_no_active_transaction() {
    let (coordinator, interceptor) = bare_interceptor();

    interceptor
        .invoke(&Transactional::required(), || {
            // Something outside the interceptor detached the thread
            let detached = TransactionCoordinator::suspend(&*coordinator)?;
            assert_eq!(detached, Some(h(1)));

            let inner = interceptor.invoke(&Transactional::requires_new(), || Ok::<_, AppError>(()));
            assert!(matches!(
                inner.unwrap_err().transaction_error(),
                Some(TxError::NoActiveTransaction)
            ));
            assert_eq!(ContextStack::depth(), 1);

            TransactionCoordinator::resume(&*coordinator, h(1))?;
            Ok::<_, AppError>(())
        })
        .unwrap();

    assert_eq!(coordinator.count(|e| matches!(e, Begin(_))), 1);
    assert_eq!(coordinator.outcome(h(1)), Some(Outcome::Committed));
}

#[test]
fn resume_failure_is_reported_and_frame_still_popped() {
    let (coordinator, interceptor) = bare_interceptor();

    let outer = interceptor.invoke(&Transactional::required(), || {
        coordinator.fail_next(Failure::Resume(TxError::invalid_state("thread busy")));
        let inner = interceptor.invoke(&Transactional::requires_new(), || Ok::<_, AppError>(()));
        assert!(matches!(
            inner.unwrap_err().transaction_error(),
            Some(TxError::InvalidState(_))
        ));
        assert_eq!(ContextStack::depth(), 1);
        assert_eq!(coordinator.outcome(h(2)), Some(Outcome::Committed));
        Ok::<_, AppError>(())
    });

    // The outer transaction is still committed by handle
    outer.unwrap();
    assert_eq!(coordinator.outcome(h(1)), Some(Outcome::Committed));
    assert!(ContextStack::is_empty());
}

#[test]
fn rollback_failure_is_secondary_to_body_failure() {
    let fx = Fixture::xa();
    fx.coordinator
        .fail_next(Failure::Rollback(TxError::invalid_state("resource manager gone")));

    let err = fx.process.required_and_rollback(1).unwrap_err();
    assert_eq!(err.method_error(), Some(&AppError::Rollback));
    assert!(matches!(err.secondary(), Some(TxError::InvalidState(_))));
    assert!(err.to_string().contains("secondary"));
    fx.assert_rows(&[]);
    fx.assert_quiescent();
}

#[test]
fn set_rollback_only_failure_is_secondary_to_joined_failure() {
    let (coordinator, interceptor) = bare_interceptor();

    let _ = interceptor.invoke(&Transactional::required(), || {
        coordinator.fail_next(Failure::SetRollbackOnly(TxError::invalid_state("unreachable")));
        let inner = interceptor
            .invoke(&Transactional::required(), || Err::<(), _>(AppError::Rollback))
            .unwrap_err();
        assert_eq!(inner.method_error(), Some(&AppError::Rollback));
        assert!(inner.secondary().is_some());
        Ok::<_, AppError>(())
    });

    // The frame flag alone still vetoes the commit
    assert_eq!(coordinator.outcome(h(1)), Some(Outcome::RolledBack));
}

// ============================================================================
// Resource Failures
// ============================================================================

#[test]
fn enlistment_failure_fails_the_call_and_rolls_back() {
    let fx = Fixture::xa();

    let err = fx
        .interceptor
        .invoke(&Transactional::required(), || {
            fx.process.service1.insert(1)?;
            fx.coordinator
                .fail_next(Failure::Enlist(TxError::invalid_state("xa start refused")));
            fx.process.service2.insert(1)?;
            Ok::<_, AppError>(())
        })
        .unwrap_err();

    match err.method_error() {
        Some(AppError::Tx(TxError::EnlistmentError { resource, .. })) => {
            assert_eq!(resource, "db2")
        }
        other => panic!("unexpected error {:?}", other),
    }
    fx.assert_rows(&[]);
    fx.assert_quiescent();
}

#[test]
fn unregistered_resource_cannot_join() {
    let (coordinator, interceptor) = bare_interceptor();
    let table = Arc::new(InMemoryTable::new("stray"));
    let stray = ResourceAdapter::local(table.clone());

    for id in 1..=3 {
        let err = interceptor
            .invoke(&Transactional::required(), || {
                let tx = stray.join_current()?;
                table.insert(tx, id)?;
                Ok::<_, AppError>(())
            })
            .unwrap_err();
        match err.method_error() {
            Some(AppError::Tx(TxError::EnlistmentError { resource, .. })) => {
                assert_eq!(resource, "stray")
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(coordinator.outcome(h(id)), Some(Outcome::RolledBack));
    }

    // Nothing was begun on the table, so nothing is left behind
    assert!(table.rows().is_empty());
    assert_eq!(stray.enlisted_count(), 0);
    assert!(ContextStack::is_empty());
}

#[test]
fn local_commit_failure_after_global_commit_is_partial() {
    let fx = Fixture::local();
    fx.db2.fail_next_commit("disk full");

    let err = fx.process.required(1).unwrap_err();
    match err.transaction_error() {
        Some(TxError::PartialCommit { resource, .. }) => assert_eq!(resource, "db2"),
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(fx.db1.rows(), vec![1]);
    assert!(fx.db2.rows().is_empty());
    assert_eq!(fx.coordinator.outcome(h(1)), Some(Outcome::Committed));
    fx.assert_quiescent();
}

#[test]
fn local_resource_receives_isolation_hint() {
    let fx = Fixture::local();
    let marker = Transactional::required().with_isolation(txguard::IsolationLevel::Serializable);

    fx.interceptor
        .invoke(&marker, || {
            fx.process.service1.insert(1)?;
            Ok::<_, AppError>(())
        })
        .unwrap();

    assert_eq!(
        fx.db1.isolation_of(h(1)),
        Some(txguard::IsolationLevel::Serializable)
    );
}

// ============================================================================
// Panics
// ============================================================================

#[test]
fn panic_in_nested_body_rolls_back_everything_and_restores_stack() {
    let fx = Fixture::xa();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let _ = fx.interceptor.invoke(&Transactional::required(), || {
            fx.process.service1.insert(1)?;
            fx.interceptor.invoke(&Transactional::required(), || {
                fx.process.service2.insert(1)?;
                if ContextStack::depth() > 0 {
                    panic!("bug in business code");
                }
                Ok::<_, AppError>(())
            })?;
            Ok::<_, AppError>(())
        });
    }));

    assert!(outcome.is_err());
    fx.assert_rows(&[]);
    fx.assert_quiescent();

    // The thread is usable again
    fx.process.required(5).unwrap();
    fx.assert_rows(&[5]);
}

#[test]
fn panic_inside_requires_new_resumes_outer() {
    let (coordinator, interceptor) = bare_interceptor();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let _ = interceptor.invoke(&Transactional::required(), || {
            let _ = interceptor.invoke(&Transactional::requires_new(), || -> Result<(), AppError> {
                panic!("inner panic")
            });
            Ok::<_, AppError>(())
        });
    }));

    assert!(outcome.is_err());
    assert!(ContextStack::is_empty());
    assert_eq!(
        coordinator.events(),
        vec![
            Begin(h(1)),
            Suspend(h(1)),
            Begin(h(2)),
            Rollback(h(2)),
            Resume(h(1)),
            Rollback(h(1)),
        ]
    );
}

// ============================================================================
// Markers and Configuration
// ============================================================================

#[test]
fn marker_message_prefixes_every_failure() {
    let (coordinator, interceptor) = bare_interceptor();
    let marker = Transactional::required().with_message("could not place order");

    let err = interceptor
        .invoke(&marker, || Err::<(), _>(AppError::Rollback))
        .unwrap_err();
    assert_eq!(err.context(), Some("could not place order"));

    coordinator.fail_next(Failure::Begin(TxError::unavailable("down")));
    let err = interceptor.invoke(&marker, || Ok::<_, AppError>(())).unwrap_err();
    assert_eq!(err.context(), Some("could not place order"));
    assert!(err.to_string().starts_with("could not place order: "));
}

#[test]
fn service_and_method_markers_wrap_once() {
    let (coordinator, interceptor) = bare_interceptor();
    let binding = ServiceBinding::new("orders", interceptor)
        .annotate_service(Transactional::required())
        .annotate_method("audit", Transactional::requires_new())
        .exclude("describe");

    binding
        .invoke("place", || {
            assert_eq!(ContextStack::depth(), 1);
            Ok::<_, AppError>(())
        })
        .unwrap();
    binding
        .invoke("describe", || {
            assert!(ContextStack::is_empty());
            Ok::<_, AppError>(())
        })
        .unwrap();
    binding
        .invoke("place", || {
            binding.invoke("audit", || {
                assert_eq!(ContextStack::depth(), 2);
                assert_eq!(ContextStack::suspended_handles().len(), 1);
                Ok::<_, AppError>(())
            })
        })
        .unwrap();

    assert_eq!(coordinator.count(|e| matches!(e, Begin(_))), 3);
}

#[test]
fn config_file_limits_nesting() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(txguard::CONFIG_FILE_NAME);
    std::fs::write(&path, "max_depth = 2\ndefault_propagation = \"REQUIRES_NEW\"\n").unwrap();
    let config = TxConfig::from_file(&path).unwrap();

    let fx = Fixture::xa_with_config(config);
    let result = fx.interceptor.invoke_default(|| {
        fx.interceptor.invoke_default(|| {
            let third = fx.interceptor.invoke_default(|| Ok::<_, AppError>(()));
            assert!(matches!(
                third.unwrap_err().transaction_error(),
                Some(TxError::InvalidState(_))
            ));
            Ok::<_, AppError>(())
        })
    });

    result.unwrap();
    // Two levels, each its own transaction
    assert_eq!(fx.count(|e| matches!(e, Begin(_))), 2);
    assert_eq!(fx.count(|e| matches!(e, Suspend(_))), 1);
    fx.assert_quiescent();
}
