//! Test doubles for txguard
//!
//! - RecordingCoordinator: in-memory JTA-like coordinator that logs every call
//! - InMemoryTable: row store usable as XA participant or local resource
//! - init_tracing: route `tracing` output to the test harness

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod table;

pub use coordinator::{CoordinatorEvent, Failure, RecordingCoordinator};
pub use table::InMemoryTable;

/// Install a `tracing` subscriber that writes through the test harness
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
