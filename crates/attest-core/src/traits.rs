//! Core traits for attest abstractions.
//!
//! These traits define the interfaces that concrete implementations must
//! satisfy, enabling pluggable backends and testability. The Postgres
//! implementations live in `attest-db`; the sync engine and worker depend
//! only on these seams.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;
use crate::source::{FolderScope, SourceDocument, SourceMatter};

// =============================================================================
// MATTER REPOSITORY
// =============================================================================

/// Upsert payload the reconciler produces from a source matter record.
#[derive(Debug, Clone)]
pub struct UpsertMatterRequest {
    pub owner_id: Uuid,
    pub external_id: String,
    pub display_name: String,
    pub client_name: String,
    pub practice_area: Option<String>,
}

/// Repository for matter rows and the per-matter sync lock.
///
/// `sync_status`/`sync_started_at` are mutated only through the transition
/// methods here, never by ad-hoc field writes elsewhere. Implementations must
/// make `try_begin_sync` a single atomic read-and-transition: two concurrent
/// callers must never both observe an idle matter and both proceed.
#[async_trait]
pub trait MatterRepository: Send + Sync {
    /// Fetch a matter by id.
    async fn get(&self, id: Uuid) -> Result<Option<Matter>>;

    /// Look up a matter by its identifier at the source.
    async fn find_by_external_id(&self, owner_id: Uuid, external_id: &str)
        -> Result<Option<Matter>>;

    /// Insert or update a matter from reconciled source data.
    async fn upsert(&self, req: UpsertMatterRequest) -> Result<Uuid>;

    /// Atomically claim the sync lock.
    ///
    /// Succeeds when the matter is Idle, Failed, or Syncing with
    /// `sync_started_at` older than `stale_cutoff` (abandoned lock). Returns
    /// the claimed row with `sync_status = Syncing` and `sync_started_at =
    /// now`, or `None` when the lock is held and not stale.
    async fn try_begin_sync(
        &self,
        matter_id: Uuid,
        now: DateTime<Utc>,
        stale_cutoff: DateTime<Utc>,
    ) -> Result<Option<Matter>>;

    /// Release the sync lock. Idempotent: releasing an already-released or
    /// expired lease is harmless.
    async fn end_sync(&self, matter_id: Uuid, outcome: SyncOutcome, now: DateTime<Utc>)
        -> Result<()>;

    /// Recover every stale SYNCING matter of the owner to Idle. Returns how
    /// many rows were recovered. Best-effort background correction.
    async fn recover_stale(&self, owner_id: Uuid, stale_cutoff: DateTime<Utc>) -> Result<i64>;

    /// Count matters currently holding the sync lock for this owner.
    async fn syncing_count(&self, owner_id: Uuid) -> Result<i64>;
}

// =============================================================================
// DOCUMENT REPOSITORY
// =============================================================================

/// Per-row outcome counters for one upsert batch.
pub type UpsertBatchStats = ReconcileStats;

/// Repository for document rows. Created/updated only by the reconciler.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Upsert one batch of reconciled records inside a single transaction.
    /// Conflict target is (owner, matter, external_id); existing rows get
    /// display fields and folder reference updated in place and are
    /// un-soft-deleted if previously removed at the source.
    async fn upsert_batch(&self, batch: Vec<UpsertDocumentRequest>) -> Result<UpsertBatchStats>;

    /// Fetch a document by id.
    async fn get(&self, id: Uuid) -> Result<Option<Document>>;

    /// Resolve local ids for the given external ids, preserving input order.
    /// Unknown external ids are omitted. Used to freeze snapshots from the
    /// precise set of just-synchronized identifiers.
    async fn ids_for_external_ids(
        &self,
        matter_id: Uuid,
        external_ids: &[String],
    ) -> Result<Vec<Uuid>>;

    /// Local fallback query: non-deleted document ids of the matter filtered
    /// by scope, ordered by creation time.
    async fn ids_for_scope(&self, matter_id: Uuid, scope: &ProcessScope) -> Result<Vec<Uuid>>;

    /// Record a content hash for extraction de-dup caching.
    async fn set_content_hash(&self, id: Uuid, content_hash: &str) -> Result<()>;

    /// Destructive: delete every document of the matter. Cascades to
    /// dependent extraction history; only the façade's explicitly-confirmed
    /// clear path may call this.
    async fn delete_for_matter(&self, matter_id: Uuid) -> Result<u64>;
}

// =============================================================================
// JOB REPOSITORY
// =============================================================================

/// Result of one abandonment sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Resumable abandoned jobs returned to Pending with their original
    /// snapshot.
    pub redispatched: Vec<i64>,
    /// Non-resumable abandoned jobs marked Failed.
    pub failed: Vec<i64>,
}

/// Request for listing jobs.
#[derive(Debug, Clone)]
pub struct ListJobsRequest {
    pub owner_id: Uuid,
    /// Archived jobs are hidden from default views.
    pub include_archived: bool,
    pub limit: i64,
    pub offset: i64,
}

/// Repository owning the processing-job state machine.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Create a job with a frozen, validated-non-empty snapshot.
    ///
    /// The job number equals the row identifier; no separate counter is
    /// consulted. Status is Pending, or Queued when the owner already has
    /// `admission_cap` jobs pending or running.
    async fn create(&self, req: CreateJobRequest, admission_cap: i64) -> Result<ProcessingJob>;

    /// Fetch a job by id.
    async fn get(&self, job_id: i64) -> Result<Option<ProcessingJob>>;

    /// Claim the next Pending job (Pending → Running), if any. Atomic:
    /// concurrent workers never claim the same job.
    async fn claim_next(&self) -> Result<Option<ProcessingJob>>;

    /// Record worker progress. Monotonic: a report lower than the stored
    /// counter is rejected as an invalid transition. Refreshes
    /// `last_activity_at` to prove liveness.
    async fn record_progress(&self, job_id: i64, processed: i32) -> Result<()>;

    /// Terminal success transition. Idempotent against redelivery.
    async fn complete(&self, job_id: i64) -> Result<()>;

    /// Terminal failure transition. Idempotent against redelivery.
    async fn fail(&self, job_id: i64, reason: &str) -> Result<()>;

    /// Recover abandoned RUNNING jobs: resumable ones return to Pending with
    /// their original snapshot, non-resumable ones are failed.
    async fn sweep_abandoned(&self, abandoned_cutoff: DateTime<Utc>) -> Result<SweepReport>;

    /// Promote Queued jobs to Pending while the owner is under the admission
    /// cap. Returns how many were promoted.
    async fn promote_queued(&self, owner_id: Uuid, admission_cap: i64) -> Result<i64>;

    /// Retire a terminal job from default views. Only flips
    /// `is_archived`/`archived_at`.
    async fn archive(&self, job_id: i64) -> Result<()>;

    /// Restore an archived job to default views.
    async fn unarchive(&self, job_id: i64) -> Result<()>;

    /// List jobs for an owner, newest first.
    async fn list(&self, req: ListJobsRequest) -> Result<Vec<ProcessingJob>>;
}

// =============================================================================
// WITNESS REPOSITORY
// =============================================================================

/// Storage for extraction output. Written by the worker, not by the core;
/// the core only guarantees the job id and snapshot they reference are
/// stable.
#[async_trait]
pub trait WitnessRepository: Send + Sync {
    /// Insert an extracted witness with job provenance.
    async fn insert(&self, witness: NewWitness) -> Result<Uuid>;

    /// Find the matter's canonical witness by display name, creating it on
    /// first sight.
    async fn find_or_create_canonical(
        &self,
        matter_id: Uuid,
        display_name: &str,
    ) -> Result<CanonicalWitness>;

    /// Point a witness at its merge target.
    async fn link_canonical(&self, witness_id: Uuid, canonical_id: Uuid) -> Result<()>;

    /// All witnesses produced by one job.
    async fn list_for_job(&self, job_id: i64) -> Result<Vec<Witness>>;
}

// =============================================================================
// SOURCE CLIENT
// =============================================================================

/// Narrow interface over the practice-management API client (pagination,
/// token refresh, and encryption live behind it).
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Whether the owner has an active integration. `begin_process` refuses
    /// with NotConnected when this is false.
    async fn is_connected(&self, owner_id: Uuid) -> Result<bool>;

    /// List the owner's matters at the source.
    async fn list_matters(&self, owner_id: Uuid) -> Result<Vec<SourceMatter>>;

    /// List documents of a matter, optionally restricted to a folder scope
    /// (recursing into subfolders only when the scope says so).
    async fn list_documents(
        &self,
        owner_id: Uuid,
        matter_external_id: &str,
        folder: Option<&FolderScope>,
    ) -> Result<Vec<SourceDocument>>;
}
