//! Orchestration façade over the sync lock, reconciler, snapshot builder,
//! and job repository.
//!
//! `begin_process` is the one write path that spans both state machines: it
//! takes the matter's sync lock, mirrors the scope's documents from the
//! source, freezes the snapshot, creates the job, and releases the lock with
//! the truthful outcome. Every early exit releases the lock; a caller that
//! sees an error never leaves a matter stuck in SYNCING.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use attest_core::{
    defaults, DispatchTicket, DocumentRepository, Error, JobRepository, JobView, ListJobsRequest,
    Matter, MatterRepository, ProcessScope, ProcessingJob, ReconcileStats, Result, SourceClient,
    SyncOutcome, SyncStatusReport,
};

use crate::lock::SyncLockManager;
use crate::reconcile::Reconciler;
use crate::snapshot::SnapshotBuilder;

/// Entry point the web layer and workers drive the sync core through.
pub struct Orchestrator {
    matters: Arc<dyn MatterRepository>,
    jobs: Arc<dyn JobRepository>,
    source: Arc<dyn SourceClient>,
    lock: SyncLockManager,
    reconciler: Reconciler,
    snapshots: SnapshotBuilder,
    admission_cap: i64,
}

impl Orchestrator {
    pub fn new(
        matters: Arc<dyn MatterRepository>,
        documents: Arc<dyn DocumentRepository>,
        jobs: Arc<dyn JobRepository>,
        source: Arc<dyn SourceClient>,
    ) -> Self {
        Self {
            lock: SyncLockManager::new(matters.clone()),
            reconciler: Reconciler::new(matters.clone(), documents.clone(), source.clone()),
            snapshots: SnapshotBuilder::new(documents),
            matters,
            jobs,
            source,
            admission_cap: defaults::JOB_ADMISSION_CAP,
        }
    }

    /// Override the per-owner admission cap (pending+running jobs admitted
    /// before new creations queue).
    pub fn with_admission_cap(mut self, cap: i64) -> Self {
        self.admission_cap = cap;
        self
    }

    /// Synchronize documents for the scope and create a processing job over
    /// the frozen snapshot.
    ///
    /// Refusals, in order: [`Error::NotConnected`] without an active
    /// integration, [`Error::MatterNotFound`] for an unknown or foreign
    /// matter, [`Error::Busy`] while another sync holds the matter's lock,
    /// [`Error::NoDocuments`] when the scope resolves to nothing.
    pub async fn begin_process(
        &self,
        owner_id: Uuid,
        matter_id: Uuid,
        scope: ProcessScope,
    ) -> Result<ProcessingJob> {
        if !self.source.is_connected(owner_id).await? {
            return Err(Error::NotConnected);
        }
        let matter = self.owned_matter(owner_id, matter_id).await?;

        let lease = self.lock.begin_sync(matter_id).await?;

        let job = match self.sync_and_create(&matter, owner_id, scope).await {
            Ok(job) => job,
            Err(Error::NoDocuments) => {
                // The sync itself succeeded; there is just nothing to process.
                self.release(matter_id, SyncOutcome::Success).await;
                return Err(Error::NoDocuments);
            }
            Err(err) => {
                error!(
                    subsystem = "sync",
                    component = "orchestrator",
                    op = "begin_process",
                    matter_id = %matter_id,
                    error = %err,
                    "Sync failed; releasing lock as failure"
                );
                self.release(matter_id, SyncOutcome::Failure).await;
                return Err(err);
            }
        };

        self.release(matter_id, SyncOutcome::Success).await;

        let ticket = DispatchTicket { job_id: job.id };
        info!(
            subsystem = "sync",
            component = "orchestrator",
            op = "begin_process",
            owner_id = %owner_id,
            matter_id = %matter_id,
            job_id = ticket.job_id,
            total_documents = job.total_documents,
            status = ?job.status,
            duration_ms = (chrono::Utc::now() - lease.acquired_at).num_milliseconds(),
            "Created processing job"
        );
        Ok(job)
    }

    async fn sync_and_create(
        &self,
        matter: &Matter,
        owner_id: Uuid,
        scope: ProcessScope,
    ) -> Result<ProcessingJob> {
        let folder = scope.folder_scope();
        let (_stats, observed) = self
            .reconciler
            .reconcile_documents(matter, folder.as_ref())
            .await?;

        let snapshot = self.snapshots.build(matter, &scope, &observed).await?;

        self.jobs
            .create(
                attest_core::CreateJobRequest {
                    owner_id,
                    matter_id: matter.id,
                    scope,
                    document_ids_snapshot: snapshot,
                },
                self.admission_cap,
            )
            .await
    }

    /// Best-effort lock release on a path that already has a result to
    /// return. A release failure is logged, never allowed to mask it.
    async fn release(&self, matter_id: Uuid, outcome: SyncOutcome) {
        if let Err(err) = self.lock.end_sync(matter_id, outcome).await {
            error!(
                subsystem = "sync",
                component = "orchestrator",
                op = "end_sync",
                matter_id = %matter_id,
                error = %err,
                "Failed to release sync lock; stale recovery will reclaim it"
            );
        }
    }

    /// Refresh the owner's matter list from the source.
    pub async fn sync_matters(&self, owner_id: Uuid) -> Result<ReconcileStats> {
        if !self.source.is_connected(owner_id).await? {
            return Err(Error::NotConnected);
        }
        self.reconciler.reconcile_matters(owner_id).await
    }

    /// Aggregate sync view for the owner; recovers stale locks as a side
    /// effect so the report reflects reality.
    pub async fn get_sync_status(&self, owner_id: Uuid) -> Result<SyncStatusReport> {
        self.lock.status_report(owner_id).await
    }

    /// Fetch one job as its external read-model. Foreign jobs are
    /// indistinguishable from missing ones.
    pub async fn get_job(&self, owner_id: Uuid, job_id: i64) -> Result<JobView> {
        let job = self.owned_job(owner_id, job_id).await?;
        Ok(JobView::from(&job))
    }

    /// List the owner's jobs, newest first.
    pub async fn list_jobs(
        &self,
        owner_id: Uuid,
        include_archived: bool,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<JobView>> {
        let jobs = self
            .jobs
            .list(ListJobsRequest {
                owner_id,
                include_archived,
                limit: limit.unwrap_or(defaults::PAGE_LIMIT),
                offset: offset.unwrap_or(defaults::PAGE_OFFSET),
            })
            .await?;
        Ok(jobs.iter().map(JobView::from).collect())
    }

    /// Retire a terminal job from default views.
    pub async fn archive_job(&self, owner_id: Uuid, job_id: i64) -> Result<()> {
        self.owned_job(owner_id, job_id).await?;
        self.jobs.archive(job_id).await
    }

    /// Restore an archived job to default views.
    pub async fn unarchive_job(&self, owner_id: Uuid, job_id: i64) -> Result<()> {
        self.owned_job(owner_id, job_id).await?;
        self.jobs.unarchive(job_id).await
    }

    /// Destructive full re-sync of a matter's documents. Requires an explicit
    /// confirmation flag: the delete cascades into extraction history.
    pub async fn clear_documents(
        &self,
        owner_id: Uuid,
        matter_id: Uuid,
        confirm: bool,
    ) -> Result<ReconcileStats> {
        if !confirm {
            return Err(Error::InvalidInput(
                "document clear requires explicit confirmation".to_string(),
            ));
        }
        if !self.source.is_connected(owner_id).await? {
            return Err(Error::NotConnected);
        }
        let matter = self.owned_matter(owner_id, matter_id).await?;

        self.lock.begin_sync(matter_id).await?;
        warn!(
            subsystem = "sync",
            component = "orchestrator",
            op = "clear_documents",
            matter_id = %matter_id,
            "Confirmed destructive document clear"
        );
        let result = self.reconciler.clear_and_reconcile_documents(&matter).await;
        match result {
            Ok((stats, _observed)) => {
                self.release(matter_id, SyncOutcome::Success).await;
                Ok(stats)
            }
            Err(err) => {
                self.release(matter_id, SyncOutcome::Failure).await;
                Err(err)
            }
        }
    }

    async fn owned_matter(&self, owner_id: Uuid, matter_id: Uuid) -> Result<Matter> {
        match self.matters.get(matter_id).await? {
            Some(matter) if matter.owner_id == owner_id => Ok(matter),
            _ => Err(Error::MatterNotFound(matter_id)),
        }
    }

    async fn owned_job(&self, owner_id: Uuid, job_id: i64) -> Result<ProcessingJob> {
        match self.jobs.get(job_id).await? {
            Some(job) if job.owner_id == owner_id => Ok(job),
            _ => Err(Error::JobNotFound(job_id)),
        }
    }
}
