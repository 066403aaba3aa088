//! # attest-jobs
//!
//! Background extraction worker for attest processing jobs.
//!
//! This crate provides:
//! - The extraction worker: claims pending jobs and walks their frozen
//!   document snapshots, resuming from the stored progress counter
//! - Progress tracking and notifications via broadcast channels
//! - The abandonment sweeper that returns crashed jobs to the queue
//!
//! ## Example
//!
//! ```ignore
//! use attest_jobs::{SweepConfig, Sweeper, WorkerBuilder, WorkerConfig};
//! use attest_db::Database;
//!
//! let db = Database::connect("postgres://...").await?;
//!
//! let worker = WorkerBuilder::new(db.clone())
//!     .with_config(WorkerConfig::from_env())
//!     .with_handler(my_extractor)
//!     .build();
//! let handle = worker.start();
//!
//! let sweeper = Sweeper::new(std::sync::Arc::new(db.jobs), SweepConfig::from_env());
//! let sweeper_handle = sweeper.start();
//!
//! // Graceful shutdown
//! handle.shutdown().await?;
//! sweeper_handle.shutdown().await?;
//! ```

pub mod handler;
pub mod sweep;
pub mod worker;

// Re-export core types
pub use attest_core::*;

pub use handler::{ExtractionHandler, JobContext, NoOpExtractor, ProgressCallback};
pub use sweep::{SweepConfig, Sweeper, SweeperHandle};
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};

/// Default polling interval for job processing (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = attest_core::defaults::JOB_POLL_INTERVAL_MS;
