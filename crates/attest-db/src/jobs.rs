//! Processing-job repository implementation.
//!
//! Conceptual schema:
//!
//! ```sql
//! CREATE TABLE processing_jobs (
//!     id                    BIGSERIAL PRIMARY KEY,
//!     job_number            BIGINT GENERATED ALWAYS AS (id) STORED,
//!     owner_id              UUID NOT NULL REFERENCES owners(id) ON DELETE CASCADE,
//!     matter_id             UUID NOT NULL REFERENCES matters(id) ON DELETE CASCADE,
//!     scope                 JSONB NOT NULL,
//!     status                TEXT NOT NULL,
//!     document_ids_snapshot JSONB NOT NULL,
//!     total_documents       INT NOT NULL,
//!     processed_documents   INT NOT NULL DEFAULT 0,
//!     last_activity_at      TIMESTAMPTZ NOT NULL,
//!     is_resumable          BOOLEAN NOT NULL DEFAULT TRUE,
//!     is_archived           BOOLEAN NOT NULL DEFAULT FALSE,
//!     archived_at           TIMESTAMPTZ,
//!     error_message         TEXT,
//!     created_at            TIMESTAMPTZ NOT NULL,
//!     started_at            TIMESTAMPTZ,
//!     completed_at          TIMESTAMPTZ
//! );
//! ```
//!
//! `job_number` is generated from the row id: the identifier doubles as the
//! job number, so there is no counter table to race on. The snapshot column
//! is write-once; nothing in this file ever updates it after insert.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use uuid::Uuid;

use attest_core::{
    CreateJobRequest, Error, JobRepository, JobStatus, ListJobsRequest, ProcessingJob, Result,
    SweepReport,
};

/// PostgreSQL implementation of JobRepository.
pub struct PgProcessingJobRepository {
    pool: Pool<Postgres>,
    /// Notify handle for event-driven worker wake.
    notify: Arc<Notify>,
}

impl PgProcessingJobRepository {
    /// Create a new PgProcessingJobRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a new PgProcessingJobRepository sharing an existing notify handle.
    pub fn with_notify(pool: Pool<Postgres>, notify: Arc<Notify>) -> Self {
        Self { pool, notify }
    }

    /// Get the job notification handle for event-driven waking.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    /// Convert JobStatus to string for database.
    fn job_status_to_str(status: JobStatus) -> &'static str {
        match status {
            JobStatus::Queued => "queued",
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Convert string from database to JobStatus.
    fn str_to_job_status(s: &str) -> JobStatus {
        match s {
            "queued" => JobStatus::Queued,
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Pending, // fallback
        }
    }

    /// Parse a job row into a ProcessingJob struct.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<ProcessingJob> {
        let scope: serde_json::Value = row.get("scope");
        let snapshot: serde_json::Value = row.get("document_ids_snapshot");

        Ok(ProcessingJob {
            id: row.get("id"),
            job_number: row.get("job_number"),
            owner_id: row.get("owner_id"),
            matter_id: row.get("matter_id"),
            scope: serde_json::from_value(scope)?,
            status: Self::str_to_job_status(row.get("status")),
            document_ids_snapshot: serde_json::from_value(snapshot)?,
            total_documents: row.get("total_documents"),
            processed_documents: row.get("processed_documents"),
            last_activity_at: row.get("last_activity_at"),
            is_resumable: row.get("is_resumable"),
            is_archived: row.get("is_archived"),
            archived_at: row.get("archived_at"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }

    const JOB_COLUMNS: &'static str =
        "id, job_number, owner_id, matter_id, scope, status, document_ids_snapshot, \
         total_documents, processed_documents, last_activity_at, is_resumable, \
         is_archived, archived_at, error_message, created_at, started_at, completed_at";

    async fn fetch_status(&self, job_id: i64) -> Result<Option<JobStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM processing_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::Database)?;

        Ok(status.as_deref().map(Self::str_to_job_status))
    }
}

#[async_trait]
impl JobRepository for PgProcessingJobRepository {
    async fn create(&self, req: CreateJobRequest, admission_cap: i64) -> Result<ProcessingJob> {
        if req.document_ids_snapshot.is_empty() {
            // The snapshot builder surfaces NoDocuments before ever reaching
            // here; an empty snapshot at this point is a programming error.
            return Err(Error::InvalidInput(
                "document snapshot must be non-empty at job creation".into(),
            ));
        }

        let now = Utc::now();
        let total = req.document_ids_snapshot.len() as i32;
        let scope = serde_json::to_value(&req.scope)?;
        let snapshot = serde_json::to_value(&req.document_ids_snapshot)?;

        // Admission control folded into the INSERT: at or above the cap the
        // job lands as 'queued', otherwise 'pending'. One statement keeps
        // concurrent creates from all observing the same active count and
        // all admitting.
        let row = sqlx::query(&format!(
            "INSERT INTO processing_jobs
                 (owner_id, matter_id, scope, status, document_ids_snapshot, total_documents,
                  processed_documents, last_activity_at, is_resumable, is_archived, created_at)
             SELECT $1, $2, $3,
                    CASE WHEN (SELECT COUNT(*) FROM processing_jobs
                               WHERE owner_id = $1 AND status IN ('pending', 'running')) >= $4
                         THEN 'queued' ELSE 'pending' END,
                    $5, $6, 0, $7, TRUE, FALSE, $7
             RETURNING {}",
            Self::JOB_COLUMNS
        ))
        .bind(req.owner_id)
        .bind(req.matter_id)
        .bind(&scope)
        .bind(admission_cap)
        .bind(&snapshot)
        .bind(total)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        let job = Self::parse_job_row(row)?;
        if job.status == JobStatus::Pending {
            self.notify.notify_waiters();
        }
        Ok(job)
    }

    async fn get(&self, job_id: i64) -> Result<Option<ProcessingJob>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM processing_jobs WHERE id = $1",
            Self::JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn claim_next(&self) -> Result<Option<ProcessingJob>> {
        let now = Utc::now();

        // FOR UPDATE SKIP LOCKED: concurrent workers never claim the same
        // job. started_at is preserved across re-dispatch so audit trails
        // keep the original start.
        let row = sqlx::query(&format!(
            "UPDATE processing_jobs
             SET status = $2, started_at = COALESCE(started_at, $1),
                 last_activity_at = $1
             WHERE id = (
                 SELECT id FROM processing_jobs
                 WHERE status = $3
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {}",
            Self::JOB_COLUMNS
        ))
        .bind(now)
        .bind(Self::job_status_to_str(JobStatus::Running))
        .bind(Self::job_status_to_str(JobStatus::Pending))
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        row.map(Self::parse_job_row).transpose()
    }

    async fn record_progress(&self, job_id: i64, processed: i32) -> Result<()> {
        let now = Utc::now();

        // Monotonic guard in the predicate: a regressing report updates
        // nothing and is rejected below.
        let affected = sqlx::query(
            "UPDATE processing_jobs
             SET processed_documents = $1, last_activity_at = $2
             WHERE id = $3 AND status = 'running' AND processed_documents <= $1",
        )
        .bind(processed)
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        if affected == 1 {
            return Ok(());
        }

        match self.fetch_status(job_id).await? {
            None => Err(Error::JobNotFound(job_id)),
            Some(JobStatus::Running) => Err(Error::InvalidTransition(format!(
                "progress regression on job {job_id}: reported {processed}"
            ))),
            Some(status) => Err(Error::InvalidTransition(format!(
                "progress report on job {job_id} in state {status:?}"
            ))),
        }
    }

    async fn complete(&self, job_id: i64) -> Result<()> {
        let now = Utc::now();

        // Conditional on a non-terminal status: redelivered completion
        // signals from the at-least-once dispatch layer are harmless.
        let affected = sqlx::query(
            "UPDATE processing_jobs
             SET status = 'completed', completed_at = $1, last_activity_at = $1,
                 processed_documents = total_documents
             WHERE id = $2 AND status NOT IN ('completed', 'failed')",
        )
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        if affected == 0 && self.fetch_status(job_id).await?.is_none() {
            return Err(Error::JobNotFound(job_id));
        }
        Ok(())
    }

    async fn fail(&self, job_id: i64, reason: &str) -> Result<()> {
        let now = Utc::now();

        let affected = sqlx::query(
            "UPDATE processing_jobs
             SET status = 'failed', completed_at = $1, last_activity_at = $1,
                 error_message = $2
             WHERE id = $3 AND status NOT IN ('completed', 'failed')",
        )
        .bind(now)
        .bind(reason)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        if affected == 0 && self.fetch_status(job_id).await?.is_none() {
            return Err(Error::JobNotFound(job_id));
        }
        Ok(())
    }

    async fn sweep_abandoned(&self, abandoned_cutoff: DateTime<Utc>) -> Result<SweepReport> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // Resumable jobs go back to pending with the snapshot untouched:
        // correctness of recovery depends on re-dispatching the exact
        // original document list.
        let redispatched: Vec<i64> = sqlx::query_scalar(
            "UPDATE processing_jobs
             SET status = 'pending', last_activity_at = $1
             WHERE status = 'running' AND last_activity_at < $2 AND is_resumable = TRUE
             RETURNING id",
        )
        .bind(now)
        .bind(abandoned_cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let failed: Vec<i64> = sqlx::query_scalar(
            "UPDATE processing_jobs
             SET status = 'failed', completed_at = $1, last_activity_at = $1,
                 error_message = 'abandoned by worker; job is not resumable'
             WHERE status = 'running' AND last_activity_at < $2 AND is_resumable = FALSE
             RETURNING id",
        )
        .bind(now)
        .bind(abandoned_cutoff)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;

        tx.commit().await.map_err(Error::Database)?;

        if !redispatched.is_empty() {
            self.notify.notify_waiters();
        }

        Ok(SweepReport {
            redispatched,
            failed,
        })
    }

    async fn promote_queued(&self, owner_id: Uuid, admission_cap: i64) -> Result<i64> {
        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM processing_jobs
             WHERE owner_id = $1 AND status IN ('pending', 'running')",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        let capacity = (admission_cap - active).max(0);
        if capacity == 0 {
            return Ok(0);
        }

        // Advisory admission control: a concurrent create can race this by
        // one slot, which only delays a promotion to the next pass.
        let promoted = sqlx::query(
            "UPDATE processing_jobs
             SET status = 'pending'
             WHERE id IN (
                 SELECT id FROM processing_jobs
                 WHERE owner_id = $1 AND status = 'queued'
                 ORDER BY created_at ASC
                 LIMIT $2
                 FOR UPDATE SKIP LOCKED
             )",
        )
        .bind(owner_id)
        .bind(capacity)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected() as i64;

        if promoted > 0 {
            self.notify.notify_waiters();
        }
        Ok(promoted)
    }

    async fn archive(&self, job_id: i64) -> Result<()> {
        let now = Utc::now();

        // Only terminal jobs can be retired; archival never touches status.
        let affected = sqlx::query(
            "UPDATE processing_jobs
             SET is_archived = TRUE, archived_at = $1
             WHERE id = $2 AND status IN ('completed', 'failed') AND is_archived = FALSE",
        )
        .bind(now)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        if affected == 1 {
            return Ok(());
        }

        match self.fetch_status(job_id).await? {
            None => Err(Error::JobNotFound(job_id)),
            Some(status) if !status.is_terminal() => Err(Error::InvalidTransition(format!(
                "cannot archive job {job_id} in state {status:?}"
            ))),
            // Already archived: idempotent no-op.
            Some(_) => Ok(()),
        }
    }

    async fn unarchive(&self, job_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE processing_jobs
             SET is_archived = FALSE, archived_at = NULL
             WHERE id = $1",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn list(&self, req: ListJobsRequest) -> Result<Vec<ProcessingJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM processing_jobs
             WHERE owner_id = $1 AND (is_archived = FALSE OR $2)
             ORDER BY created_at DESC
             LIMIT $3 OFFSET $4",
            Self::JOB_COLUMNS
        ))
        .bind(req.owner_id)
        .bind(req.include_archived)
        .bind(req.limit)
        .bind(req.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_job_row).collect()
    }
}
