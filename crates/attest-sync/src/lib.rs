//! # attest-sync
//!
//! Matter synchronization engine for attest.
//!
//! This crate provides:
//! - The per-matter sync lock with stale-lock recovery ([`SyncLockManager`])
//! - Non-destructive reconciliation of source listings ([`Reconciler`])
//! - Document snapshot construction for processing jobs ([`SnapshotBuilder`])
//! - The orchestration façade tying them together ([`Orchestrator`])
//!
//! The engine depends only on the repository and source-client traits from
//! `attest-core`; `attest-db` supplies the Postgres implementations, and
//! [`test_support`] supplies in-memory fakes for tests.

pub mod lock;
pub mod orchestrator;
pub mod reconcile;
pub mod snapshot;
pub mod test_support;

pub use lock::{SyncLease, SyncLockManager};
pub use orchestrator::Orchestrator;
pub use reconcile::{ObservedDocument, Reconciler};
pub use snapshot::SnapshotBuilder;
