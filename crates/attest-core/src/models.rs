//! Core data models for attest.
//!
//! These types are shared across all attest crates and represent the core
//! domain entities: matters synchronized from the practice-management source,
//! their documents, and the processing jobs that extract witnesses from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// MATTER TYPES
// =============================================================================

/// Per-matter synchronization lock state.
///
/// The persisted `sync_status` column is the sole mutex for synchronization:
/// it survives process restarts, which is the design's core resilience
/// property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// No synchronization in flight.
    Idle,
    /// A synchronization holds the lock. `sync_started_at` is set.
    Syncing,
    /// The last synchronization ended in an unrecoverable error. A fresh
    /// attempt is always permitted from here.
    Failed,
}

/// A case/client-engagement record mirrored from the practice-management
/// source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matter {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Identifier at the external source; unique per owner.
    pub external_id: String,
    pub display_name: String,
    /// Client linkage from the source. Records without one are skipped by the
    /// reconciler, so local rows always carry it.
    pub client_name: String,
    pub practice_area: Option<String>,
    pub sync_status: SyncStatus,
    /// Set iff `sync_status == Syncing`.
    pub sync_started_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Matter {
    /// The lock invariant: `sync_started_at` is non-null iff the matter is
    /// SYNCING. Checked after every transition.
    pub fn lock_invariant_holds(&self) -> bool {
        self.sync_started_at.is_some() == (self.sync_status == SyncStatus::Syncing)
    }
}

/// Outcome reported when releasing a sync lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Normal completion: Syncing → Idle, `last_synced_at = now`.
    Success,
    /// Unrecoverable error during sync: Syncing → Failed.
    Failure,
}

/// Aggregate sync view for an owner, exposed to the web layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatusReport {
    pub is_syncing: bool,
    pub syncing_count: i64,
    /// Stale locks recovered by the poll that produced this report.
    pub recovered_stale_count: i64,
}

// =============================================================================
// DOCUMENT TYPES
// =============================================================================

/// A document mirrored from the source, owned by exactly one matter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub matter_id: Uuid,
    pub owner_id: Uuid,
    /// Identifier at the external source; unique within (matter, owner).
    pub external_id: String,
    pub display_name: String,
    /// Parent-folder identifier at the source, if the document lives in one.
    pub folder_external_id: Option<String>,
    /// De-dup cache for extraction: same hash means same content already
    /// processed.
    pub content_hash: Option<String>,
    /// True means "no longer present at the source but retained locally for
    /// history". Soft-deleted snapshot members are skipped, never removed.
    pub is_soft_deleted: bool,
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Upsert payload produced by the reconciler from a source record.
#[derive(Debug, Clone)]
pub struct UpsertDocumentRequest {
    pub matter_id: Uuid,
    pub owner_id: Uuid,
    pub external_id: String,
    pub display_name: String,
    pub folder_external_id: Option<String>,
}

// =============================================================================
// PROCESSING JOB TYPES
// =============================================================================

/// Processing job lifecycle state.
///
/// Typical order: Queued → Pending → Running → {Completed | Failed}.
/// Archival is an orthogonal flag on the job, not a status value, so a
/// completed job stays Completed when retired from default views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Admission-controlled: created while the owner was at capacity, not yet
    /// eligible for claim.
    Queued,
    /// Eligible for a worker to claim.
    Pending,
    /// Claimed by a worker; `last_activity_at` is its liveness signal.
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal states admit no further lifecycle transitions (archival is
    /// orthogonal).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// A witness-extraction job over a frozen document snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub id: i64,
    /// Equal to `id` by design: the row identifier doubles as the job number,
    /// so no separate counter exists to race on.
    pub job_number: i64,
    pub owner_id: Uuid,
    pub matter_id: Uuid,
    pub scope: ProcessScope,
    pub status: JobStatus,
    /// Ordered document identifiers frozen at creation. Write-once: recovery
    /// re-dispatches with this exact list, never a recomputed one.
    pub document_ids_snapshot: Vec<Uuid>,
    pub total_documents: i32,
    /// Monotonically non-decreasing progress counter.
    pub processed_documents: i32,
    /// Updated on every progress report; the abandonment sweep's liveness
    /// signal.
    pub last_activity_at: DateTime<Utc>,
    /// False marks a job that must restart from scratch rather than continue;
    /// such jobs are failed, not re-dispatched, when abandoned.
    pub is_resumable: bool,
    pub is_archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// The document scope a processing job covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessScope {
    /// Every non-deleted document of the matter.
    WholeMatter,
    /// One folder, optionally with its subfolders, optionally excluding a
    /// designated reference-material folder.
    Folder {
        folder_external_id: String,
        include_subfolders: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exclude_folder_external_id: Option<String>,
    },
}

/// Request for creating a processing job.
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub owner_id: Uuid,
    pub matter_id: Uuid,
    pub scope: ProcessScope,
    /// Non-empty, ordered; validated at creation.
    pub document_ids_snapshot: Vec<Uuid>,
}

/// Read-model of a job for external callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub id: i64,
    pub job_number: i64,
    pub matter_id: Uuid,
    pub status: JobStatus,
    pub total_documents: i32,
    pub processed_documents: i32,
    pub is_archived: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&ProcessingJob> for JobView {
    fn from(job: &ProcessingJob) -> Self {
        Self {
            id: job.id,
            job_number: job.job_number,
            matter_id: job.matter_id,
            status: job.status,
            total_documents: job.total_documents,
            processed_documents: job.processed_documents,
            is_archived: job.is_archived,
            error_message: job.error_message.clone(),
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

// =============================================================================
// RECONCILIATION TYPES
// =============================================================================

/// Counters reported by a reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub inserted: u64,
    pub updated: u64,
    /// Malformed or unassociated records skipped (logged, non-fatal).
    pub skipped: u64,
    /// Previously soft-deleted rows that reappeared at the source.
    pub restored: u64,
}

impl ReconcileStats {
    pub fn merge(&mut self, other: ReconcileStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.restored += other.restored;
    }

    pub fn observed(&self) -> u64 {
        self.inserted + self.updated + self.restored
    }
}

// =============================================================================
// WITNESS TYPES
// =============================================================================

/// Per-document extraction result, written by the extraction worker.
///
/// Carries provenance: which job produced it and, once merged, which
/// canonical witness it resolves to. The core only guarantees that `job_id`
/// and the document snapshot it references are stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Witness {
    pub id: Uuid,
    pub document_id: Uuid,
    pub job_id: Option<i64>,
    pub canonical_witness_id: Option<Uuid>,
    pub name: String,
    pub role: Option<String>,
    pub snippet: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Deduplication target a set of witnesses merges into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalWitness {
    pub id: Uuid,
    pub matter_id: Uuid,
    pub display_name: String,
    pub merged_count: i32,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a freshly extracted witness.
#[derive(Debug, Clone)]
pub struct NewWitness {
    pub document_id: Uuid,
    pub job_id: Option<i64>,
    pub name: String,
    pub role: Option<String>,
    pub snippet: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matter(status: SyncStatus, started: Option<DateTime<Utc>>) -> Matter {
        Matter {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            external_id: "m-1".into(),
            display_name: "Smith v. Jones".into(),
            client_name: "Smith".into(),
            practice_area: None,
            sync_status: status,
            sync_started_at: started,
            last_synced_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_lock_invariant_syncing_with_timestamp() {
        assert!(matter(SyncStatus::Syncing, Some(Utc::now())).lock_invariant_holds());
    }

    #[test]
    fn test_lock_invariant_idle_without_timestamp() {
        assert!(matter(SyncStatus::Idle, None).lock_invariant_holds());
        assert!(matter(SyncStatus::Failed, None).lock_invariant_holds());
    }

    #[test]
    fn test_lock_invariant_violations() {
        assert!(!matter(SyncStatus::Syncing, None).lock_invariant_holds());
        assert!(!matter(SyncStatus::Idle, Some(Utc::now())).lock_invariant_holds());
        assert!(!matter(SyncStatus::Failed, Some(Utc::now())).lock_invariant_holds());
    }

    #[test]
    fn test_job_status_terminal() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn test_process_scope_serde_round_trip() {
        let scope = ProcessScope::Folder {
            folder_external_id: "f-9".into(),
            include_subfolders: true,
            exclude_folder_external_id: Some("f-ref".into()),
        };
        let json = serde_json::to_string(&scope).unwrap();
        let back: ProcessScope = serde_json::from_str(&json).unwrap();
        assert_eq!(scope, back);
    }

    #[test]
    fn test_process_scope_whole_matter_tag() {
        let json = serde_json::to_string(&ProcessScope::WholeMatter).unwrap();
        assert!(json.contains("\"kind\":\"whole_matter\""));
    }

    #[test]
    fn test_process_scope_exclude_omitted_when_none() {
        let scope = ProcessScope::Folder {
            folder_external_id: "f-9".into(),
            include_subfolders: false,
            exclude_folder_external_id: None,
        };
        let json = serde_json::to_string(&scope).unwrap();
        assert!(!json.contains("exclude_folder_external_id"));
    }

    #[test]
    fn test_sync_status_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&SyncStatus::Syncing).unwrap(),
            "\"syncing\""
        );
        let back: SyncStatus = serde_json::from_str("\"idle\"").unwrap();
        assert_eq!(back, SyncStatus::Idle);
    }

    #[test]
    fn test_reconcile_stats_merge() {
        let mut a = ReconcileStats {
            inserted: 2,
            updated: 3,
            skipped: 1,
            restored: 0,
        };
        a.merge(ReconcileStats {
            inserted: 1,
            updated: 0,
            skipped: 4,
            restored: 2,
        });
        assert_eq!(a.inserted, 3);
        assert_eq!(a.updated, 3);
        assert_eq!(a.skipped, 5);
        assert_eq!(a.restored, 2);
        assert_eq!(a.observed(), 6);
    }

    #[test]
    fn test_job_view_from_job() {
        let now = Utc::now();
        let job = ProcessingJob {
            id: 7,
            job_number: 7,
            owner_id: Uuid::new_v4(),
            matter_id: Uuid::new_v4(),
            scope: ProcessScope::WholeMatter,
            status: JobStatus::Running,
            document_ids_snapshot: vec![Uuid::new_v4()],
            total_documents: 1,
            processed_documents: 0,
            last_activity_at: now,
            is_resumable: true,
            is_archived: false,
            archived_at: None,
            error_message: None,
            created_at: now,
            started_at: Some(now),
            completed_at: None,
        };
        let view = JobView::from(&job);
        assert_eq!(view.id, 7);
        assert_eq!(view.job_number, 7);
        assert_eq!(view.status, JobStatus::Running);
        assert_eq!(view.total_documents, 1);
    }
}
