//! # attest-db
//!
//! PostgreSQL persistence layer for attest.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for matters, documents, processing jobs, and
//!   witnesses
//! - The atomic conditional-UPDATE forms of the sync-lock and job-lifecycle
//!   transitions (acquisition and claim are single statements, never
//!   read-then-write)
//!
//! Schema is managed externally; each repository module documents the
//! conceptual table layout it expects.
//!
//! ## Example
//!
//! ```rust,ignore
//! use attest_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/attest").await?;
//!     let matter = db.matters.get(matter_id).await?;
//!     Ok(())
//! }
//! ```

pub mod documents;
pub mod jobs;
pub mod matters;
pub mod pool;
pub mod witnesses;

// Re-export core types
pub use attest_core::*;

pub use documents::{compute_content_hash, PgDocumentRepository};
pub use jobs::PgProcessingJobRepository;
pub use matters::PgMatterRepository;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use witnesses::PgWitnessRepository;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Matter repository owning the per-matter sync lock.
    pub matters: PgMatterRepository,
    /// Document repository written by the reconciler.
    pub documents: PgDocumentRepository,
    /// Processing-job repository owning the job lifecycle.
    pub jobs: PgProcessingJobRepository,
    /// Witness provenance storage written by the extraction worker.
    pub witnesses: PgWitnessRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            matters: PgMatterRepository::new(pool.clone()),
            documents: PgDocumentRepository::new(pool.clone()),
            jobs: PgProcessingJobRepository::new(pool.clone()),
            witnesses: PgWitnessRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect to PostgreSQL with default pool configuration.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Connect to PostgreSQL with a custom pool configuration.
    pub async fn connect_with_config(database_url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(database_url, config).await?;
        Ok(Self::new(pool))
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        // Repositories only hold pool handles (and the jobs repo its notify),
        // so a clone shares the same pool and wake channel.
        Self {
            matters: PgMatterRepository::new(self.pool.clone()),
            documents: PgDocumentRepository::new(self.pool.clone()),
            jobs: PgProcessingJobRepository::with_notify(
                self.pool.clone(),
                self.jobs.job_notify(),
            ),
            witnesses: PgWitnessRepository::new(self.pool.clone()),
            pool: self.pool.clone(),
        }
    }
}
