//! End-to-end orchestration tests over the in-memory fakes.
//!
//! These exercise the full `begin_process` path: lock acquisition,
//! reconciliation, snapshot freezing, job creation, and lock release under
//! both success and failure.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use attest_core::{
    DocumentRepository, Error, JobRepository, JobStatus, MatterRepository, ProcessScope,
    SourceDocument, SourceField, SyncStatus,
};
use attest_sync::test_support::{
    InMemoryDocumentRepository, InMemoryJobRepository, InMemoryMatterRepository,
    StaticSourceClient,
};
use attest_sync::Orchestrator;

struct Fixture {
    matters: Arc<InMemoryMatterRepository>,
    documents: Arc<InMemoryDocumentRepository>,
    jobs: Arc<InMemoryJobRepository>,
    source: Arc<StaticSourceClient>,
    orchestrator: Orchestrator,
    owner_id: Uuid,
    matter_id: Uuid,
}

fn fixture() -> Fixture {
    let matters = Arc::new(InMemoryMatterRepository::new());
    let documents = Arc::new(InMemoryDocumentRepository::new());
    let jobs = Arc::new(InMemoryJobRepository::new());
    let source = Arc::new(StaticSourceClient::new());

    let owner_id = Uuid::new_v4();
    let matter_id = matters.seed_matter(owner_id, "m-1", SyncStatus::Idle, None);

    let orchestrator = Orchestrator::new(
        matters.clone(),
        documents.clone(),
        jobs.clone(),
        source.clone(),
    );

    Fixture {
        matters,
        documents,
        jobs,
        source,
        orchestrator,
        owner_id,
        matter_id,
    }
}

fn doc(id: &str, parent: Option<&str>) -> SourceDocument {
    SourceDocument {
        id: id.to_string(),
        display_name: format!("{id}.pdf"),
        parent_folder_id: parent.map(str::to_string),
        category: SourceField(None),
    }
}

#[tokio::test]
async fn begin_process_creates_pending_job_and_releases_lock() {
    let f = fixture();
    f.source.add_document("m-1", doc("d-1", None));
    f.source.add_document("m-1", doc("d-2", None));

    let job = f
        .orchestrator
        .begin_process(f.owner_id, f.matter_id, ProcessScope::WholeMatter)
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.job_number, job.id);
    assert_eq!(job.total_documents, 2);
    assert_eq!(job.processed_documents, 0);
    assert_eq!(job.document_ids_snapshot.len(), 2);

    // Snapshot members resolve to the mirrored rows, in listing order.
    let resolved = f
        .documents
        .ids_for_external_ids(f.matter_id, &["d-1".to_string(), "d-2".to_string()])
        .await
        .unwrap();
    assert_eq!(job.document_ids_snapshot, resolved);

    let matter = f.matters.get(f.matter_id).await.unwrap().unwrap();
    assert_eq!(matter.sync_status, SyncStatus::Idle);
    assert!(matter.last_synced_at.is_some());
    assert!(matter.lock_invariant_holds());
}

#[tokio::test]
async fn begin_process_refuses_without_integration() {
    let f = fixture();
    let disconnected = Arc::new(StaticSourceClient::disconnected());
    let orchestrator = Orchestrator::new(
        f.matters.clone(),
        f.documents.clone(),
        f.jobs.clone(),
        disconnected,
    );

    let err = orchestrator
        .begin_process(f.owner_id, f.matter_id, ProcessScope::WholeMatter)
        .await;
    assert!(matches!(err, Err(Error::NotConnected)));

    let matter = f.matters.get(f.matter_id).await.unwrap().unwrap();
    assert_eq!(matter.sync_status, SyncStatus::Idle);
}

#[tokio::test]
async fn begin_process_rejects_foreign_matter() {
    let f = fixture();
    let stranger = Uuid::new_v4();

    let err = f
        .orchestrator
        .begin_process(stranger, f.matter_id, ProcessScope::WholeMatter)
        .await;
    assert!(matches!(err, Err(Error::MatterNotFound(_))));
}

#[tokio::test]
async fn begin_process_busy_while_lock_held() {
    let f = fixture();
    f.source.add_document("m-1", doc("d-1", None));

    // Another sync holds a live lock.
    f.matters
        .try_begin_sync(
            f.matter_id,
            Utc::now(),
            Utc::now() - Duration::minutes(30),
        )
        .await
        .unwrap()
        .unwrap();

    let err = f
        .orchestrator
        .begin_process(f.owner_id, f.matter_id, ProcessScope::WholeMatter)
        .await
        .unwrap_err();
    match &err {
        Error::Busy(id) => assert_eq!(*id, f.matter_id),
        other => panic!("expected Busy, got {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn begin_process_recovers_stale_lock_and_proceeds() {
    let f = fixture();
    f.source.add_document("m-1", doc("d-1", None));

    // A crashed sync left the lock held 31 minutes ago.
    let stale_matter = f
        .matters
        .seed_matter(f.owner_id, "m-stale", SyncStatus::Syncing, Some(Utc::now() - Duration::minutes(31)));
    f.source.add_document("m-stale", doc("d-s", None));

    let job = f
        .orchestrator
        .begin_process(f.owner_id, stale_matter, ProcessScope::WholeMatter)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let matter = f.matters.get(stale_matter).await.unwrap().unwrap();
    assert_eq!(matter.sync_status, SyncStatus::Idle);
}

#[tokio::test]
async fn begin_process_empty_scope_releases_lock_as_success() {
    let f = fixture();
    // Source lists nothing and the local mirror is empty.

    let err = f
        .orchestrator
        .begin_process(f.owner_id, f.matter_id, ProcessScope::WholeMatter)
        .await;
    assert!(matches!(err, Err(Error::NoDocuments)));

    let matter = f.matters.get(f.matter_id).await.unwrap().unwrap();
    assert_eq!(matter.sync_status, SyncStatus::Idle);
    assert!(matter.lock_invariant_holds());
}

#[tokio::test]
async fn begin_process_source_failure_releases_lock_as_failure() {
    let f = fixture();
    f.source.fail_documents(true);

    let err = f
        .orchestrator
        .begin_process(f.owner_id, f.matter_id, ProcessScope::WholeMatter)
        .await;
    assert!(matches!(err, Err(Error::ExternalApi(_))));

    let matter = f.matters.get(f.matter_id).await.unwrap().unwrap();
    assert_eq!(matter.sync_status, SyncStatus::Failed);
    assert!(matter.lock_invariant_holds());

    // A fresh attempt is permitted from Failed once the source recovers.
    f.source.fail_documents(false);
    f.source.add_document("m-1", doc("d-1", None));
    assert!(f
        .orchestrator
        .begin_process(f.owner_id, f.matter_id, ProcessScope::WholeMatter)
        .await
        .is_ok());
}

#[tokio::test]
async fn begin_process_folder_scope_excludes_reference_folder() {
    let f = fixture();
    f.source.add_document("m-1", doc("d-work", Some("f-work")));
    f.source.add_document("m-1", doc("d-ref", Some("f-ref")));
    f.source.add_subfolder("f-work", "f-ref");

    let scope = ProcessScope::Folder {
        folder_external_id: "f-work".to_string(),
        include_subfolders: true,
        exclude_folder_external_id: Some("f-ref".to_string()),
    };
    let job = f
        .orchestrator
        .begin_process(f.owner_id, f.matter_id, scope)
        .await
        .unwrap();
    assert_eq!(job.total_documents, 1);

    let work_ids = f
        .documents
        .ids_for_external_ids(f.matter_id, &["d-work".to_string()])
        .await
        .unwrap();
    assert_eq!(job.document_ids_snapshot, work_ids);
}

#[tokio::test]
async fn begin_process_non_recursive_scope_excludes_stale_subfolder_mirror() {
    let f = fixture();
    // A past recursive sync mirrored a subfolder document locally; the source
    // still lists it only under the subfolder.
    f.documents
        .seed_document(f.matter_id, f.owner_id, "d-stale-sub", Some("f-sub"));
    f.source.add_subfolder("f-1", "f-sub");
    f.source.add_document("m-1", doc("d-top", Some("f-1")));
    f.source.add_document("m-1", doc("d-stale-sub", Some("f-sub")));

    let scope = ProcessScope::Folder {
        folder_external_id: "f-1".to_string(),
        include_subfolders: false,
        exclude_folder_external_id: None,
    };
    let job = f
        .orchestrator
        .begin_process(f.owner_id, f.matter_id, scope)
        .await
        .unwrap();

    // Only the folder's own document is snapshotted; the mirrored subfolder
    // row stays out even though it matches the matter locally.
    assert_eq!(job.total_documents, 1);
    let top_ids = f
        .documents
        .ids_for_external_ids(f.matter_id, &["d-top".to_string()])
        .await
        .unwrap();
    assert_eq!(job.document_ids_snapshot, top_ids);
}

#[tokio::test]
async fn admission_cap_queues_overflow_jobs() {
    let f = fixture();
    f.source.add_document("m-1", doc("d-1", None));

    let orchestrator = Orchestrator::new(
        f.matters.clone(),
        f.documents.clone(),
        f.jobs.clone(),
        f.source.clone(),
    )
    .with_admission_cap(1);

    let first = orchestrator
        .begin_process(f.owner_id, f.matter_id, ProcessScope::WholeMatter)
        .await
        .unwrap();
    assert_eq!(first.status, JobStatus::Pending);

    let second = orchestrator
        .begin_process(f.owner_id, f.matter_id, ProcessScope::WholeMatter)
        .await
        .unwrap();
    assert_eq!(second.status, JobStatus::Queued);

    // Completing the first frees capacity for promotion.
    f.jobs.claim_next().await.unwrap().unwrap();
    f.jobs.complete(first.id).await.unwrap();
    let promoted = f.jobs.promote_queued(f.owner_id, 1).await.unwrap();
    assert_eq!(promoted, 1);
    let second = f.jobs.get(second.id).await.unwrap().unwrap();
    assert_eq!(second.status, JobStatus::Pending);
}

#[tokio::test]
async fn snapshot_is_immutable_across_redispatch() {
    let f = fixture();
    f.source.add_document("m-1", doc("d-1", None));
    f.source.add_document("m-1", doc("d-2", None));

    let job = f
        .orchestrator
        .begin_process(f.owner_id, f.matter_id, ProcessScope::WholeMatter)
        .await
        .unwrap();
    let frozen = job.document_ids_snapshot.clone();

    // Worker claims, reports progress, then goes silent.
    let claimed = f.jobs.claim_next().await.unwrap().unwrap();
    assert_eq!(claimed.id, job.id);
    f.jobs.record_progress(job.id, 1).await.unwrap();
    f.jobs
        .backdate_activity(job.id, Utc::now() - Duration::hours(3));

    // New documents arrive at the source before the sweep runs.
    f.source.add_document("m-1", doc("d-3", None));

    let report = f
        .jobs
        .sweep_abandoned(Utc::now() - Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(report.redispatched, vec![job.id]);

    let redispatched = f.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(redispatched.status, JobStatus::Pending);
    assert_eq!(redispatched.document_ids_snapshot, frozen);
    assert_eq!(redispatched.processed_documents, 1);
}

#[tokio::test]
async fn get_job_hides_foreign_jobs() {
    let f = fixture();
    f.source.add_document("m-1", doc("d-1", None));

    let job = f
        .orchestrator
        .begin_process(f.owner_id, f.matter_id, ProcessScope::WholeMatter)
        .await
        .unwrap();

    let view = f.orchestrator.get_job(f.owner_id, job.id).await.unwrap();
    assert_eq!(view.job_number, job.id);

    let stranger = Uuid::new_v4();
    let err = f.orchestrator.get_job(stranger, job.id).await;
    assert!(matches!(err, Err(Error::JobNotFound(_))));
}

#[tokio::test]
async fn archive_hides_job_from_default_listing() {
    let f = fixture();
    f.source.add_document("m-1", doc("d-1", None));

    let job = f
        .orchestrator
        .begin_process(f.owner_id, f.matter_id, ProcessScope::WholeMatter)
        .await
        .unwrap();

    // Archiving a non-terminal job is refused.
    let err = f.orchestrator.archive_job(f.owner_id, job.id).await;
    assert!(matches!(err, Err(Error::InvalidTransition(_))));

    f.jobs.claim_next().await.unwrap().unwrap();
    f.jobs.complete(job.id).await.unwrap();
    f.orchestrator.archive_job(f.owner_id, job.id).await.unwrap();

    let archived = f.jobs.get(job.id).await.unwrap().unwrap();
    assert_eq!(archived.status, JobStatus::Completed);
    assert!(archived.is_archived);
    assert!(archived.archived_at.is_some());

    let default_view = f
        .orchestrator
        .list_jobs(f.owner_id, false, None, None)
        .await
        .unwrap();
    assert!(default_view.is_empty());
    let full_view = f
        .orchestrator
        .list_jobs(f.owner_id, true, None, None)
        .await
        .unwrap();
    assert_eq!(full_view.len(), 1);

    f.orchestrator
        .unarchive_job(f.owner_id, job.id)
        .await
        .unwrap();
    let restored = f
        .orchestrator
        .list_jobs(f.owner_id, false, None, None)
        .await
        .unwrap();
    assert_eq!(restored.len(), 1);
}

#[tokio::test]
async fn clear_documents_requires_confirmation() {
    let f = fixture();
    f.documents
        .seed_document(f.matter_id, f.owner_id, "d-old", None);
    f.source.add_document("m-1", doc("d-new", None));

    let err = f
        .orchestrator
        .clear_documents(f.owner_id, f.matter_id, false)
        .await;
    assert!(matches!(err, Err(Error::InvalidInput(_))));
    assert_eq!(f.documents.count(), 1);

    let stats = f
        .orchestrator
        .clear_documents(f.owner_id, f.matter_id, true)
        .await
        .unwrap();
    assert_eq!(stats.inserted, 1);
    assert_eq!(f.documents.count(), 1);

    let matter = f.matters.get(f.matter_id).await.unwrap().unwrap();
    assert_eq!(matter.sync_status, SyncStatus::Idle);
}

#[tokio::test]
async fn sync_matters_reports_counters() {
    let f = fixture();
    f.source.add_matter(attest_core::SourceMatter {
        id: "m-1".to_string(),
        display_name: "Smith v. Jones".to_string(),
        client: SourceField(Some("Smith".to_string())),
        practice_area: SourceField(None),
        status: SourceField(None),
    });
    f.source.add_matter(attest_core::SourceMatter {
        id: "m-2".to_string(),
        display_name: "Orphaned".to_string(),
        client: SourceField(None),
        practice_area: SourceField(None),
        status: SourceField(None),
    });

    let stats = f.orchestrator.sync_matters(f.owner_id).await.unwrap();
    assert_eq!(stats.updated, 1); // m-1 was seeded locally
    assert_eq!(stats.skipped, 1);
}

#[tokio::test]
async fn sync_status_reflects_and_recovers_stale_locks() {
    let f = fixture();
    f.matters.seed_matter(
        f.owner_id,
        "m-stale",
        SyncStatus::Syncing,
        Some(Utc::now() - Duration::minutes(45)),
    );

    let report = f.orchestrator.get_sync_status(f.owner_id).await.unwrap();
    assert_eq!(report.recovered_stale_count, 1);
    assert_eq!(report.syncing_count, 0);
    assert!(!report.is_syncing);
}
