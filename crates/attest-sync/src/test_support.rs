//! In-memory repository and source-client fakes.
//!
//! These back the orchestration tests without a database: every fake
//! linearizes through a mutex, so the atomic-transition contracts
//! (`try_begin_sync`, `claim_next`, conditional terminal transitions) hold
//! exactly as they do under Postgres row locking. Compiled unconditionally so
//! downstream crates can reuse them in their own test suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use attest_core::{
    CanonicalWitness, CreateJobRequest, Document, Error, FolderScope, JobRepository, JobStatus,
    ListJobsRequest, Matter, MatterRepository, NewWitness, ProcessScope, ProcessingJob, Result,
    SourceClient, SourceDocument, SourceMatter, SweepReport, SyncOutcome, SyncStatus,
    UpsertBatchStats, UpsertDocumentRequest, UpsertMatterRequest, Witness, WitnessRepository,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// MATTERS
// =============================================================================

/// Mutex-linearized [`MatterRepository`] fake.
#[derive(Default)]
pub struct InMemoryMatterRepository {
    matters: Mutex<HashMap<Uuid, Matter>>,
}

impl InMemoryMatterRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a matter directly in the given lock state. Returns its id.
    pub fn seed_matter(
        &self,
        owner_id: Uuid,
        external_id: &str,
        sync_status: SyncStatus,
        sync_started_at: Option<DateTime<Utc>>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        lock(&self.matters).insert(
            id,
            Matter {
                id,
                owner_id,
                external_id: external_id.to_string(),
                display_name: format!("Matter {external_id}"),
                client_name: "Test Client".to_string(),
                practice_area: None,
                sync_status,
                sync_started_at,
                last_synced_at: None,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }
}

#[async_trait]
impl MatterRepository for InMemoryMatterRepository {
    async fn get(&self, id: Uuid) -> Result<Option<Matter>> {
        Ok(lock(&self.matters).get(&id).cloned())
    }

    async fn find_by_external_id(
        &self,
        owner_id: Uuid,
        external_id: &str,
    ) -> Result<Option<Matter>> {
        Ok(lock(&self.matters)
            .values()
            .find(|m| m.owner_id == owner_id && m.external_id == external_id)
            .cloned())
    }

    async fn upsert(&self, req: UpsertMatterRequest) -> Result<Uuid> {
        let mut matters = lock(&self.matters);
        let now = Utc::now();

        if let Some(existing) = matters
            .values_mut()
            .find(|m| m.owner_id == req.owner_id && m.external_id == req.external_id)
        {
            existing.display_name = req.display_name;
            existing.client_name = req.client_name;
            existing.practice_area = req.practice_area;
            existing.updated_at = now;
            return Ok(existing.id);
        }

        let id = Uuid::new_v4();
        matters.insert(
            id,
            Matter {
                id,
                owner_id: req.owner_id,
                external_id: req.external_id,
                display_name: req.display_name,
                client_name: req.client_name,
                practice_area: req.practice_area,
                sync_status: SyncStatus::Idle,
                sync_started_at: None,
                last_synced_at: None,
                created_at: now,
                updated_at: now,
            },
        );
        Ok(id)
    }

    async fn try_begin_sync(
        &self,
        matter_id: Uuid,
        now: DateTime<Utc>,
        stale_cutoff: DateTime<Utc>,
    ) -> Result<Option<Matter>> {
        let mut matters = lock(&self.matters);
        let matter = match matters.get_mut(&matter_id) {
            Some(m) => m,
            None => return Ok(None),
        };

        let claimable = match matter.sync_status {
            SyncStatus::Idle | SyncStatus::Failed => true,
            SyncStatus::Syncing => matter
                .sync_started_at
                .map(|started| started < stale_cutoff)
                .unwrap_or(true),
        };
        if !claimable {
            return Ok(None);
        }

        matter.sync_status = SyncStatus::Syncing;
        matter.sync_started_at = Some(now);
        matter.updated_at = now;
        Ok(Some(matter.clone()))
    }

    async fn end_sync(
        &self,
        matter_id: Uuid,
        outcome: SyncOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut matters = lock(&self.matters);
        if let Some(matter) = matters.get_mut(&matter_id) {
            if matter.sync_status == SyncStatus::Syncing {
                matter.sync_status = match outcome {
                    SyncOutcome::Success => SyncStatus::Idle,
                    SyncOutcome::Failure => SyncStatus::Failed,
                };
                matter.sync_started_at = None;
                if outcome == SyncOutcome::Success {
                    matter.last_synced_at = Some(now);
                }
                matter.updated_at = now;
            }
        }
        Ok(())
    }

    async fn recover_stale(&self, owner_id: Uuid, stale_cutoff: DateTime<Utc>) -> Result<i64> {
        let mut matters = lock(&self.matters);
        let now = Utc::now();
        let mut recovered = 0;
        for matter in matters.values_mut() {
            if matter.owner_id == owner_id
                && matter.sync_status == SyncStatus::Syncing
                && matter
                    .sync_started_at
                    .map(|started| started < stale_cutoff)
                    .unwrap_or(true)
            {
                matter.sync_status = SyncStatus::Idle;
                matter.sync_started_at = None;
                matter.updated_at = now;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn syncing_count(&self, owner_id: Uuid) -> Result<i64> {
        Ok(lock(&self.matters)
            .values()
            .filter(|m| m.owner_id == owner_id && m.sync_status == SyncStatus::Syncing)
            .count() as i64)
    }
}

// =============================================================================
// DOCUMENTS
// =============================================================================

/// Mutex-linearized [`DocumentRepository`] fake. Keeps insertion order so
/// `ids_for_scope` returns creation order like the Postgres implementation.
#[derive(Default)]
pub struct InMemoryDocumentRepository {
    documents: Mutex<Vec<Document>>,
}

impl InMemoryDocumentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document directly. Returns its id.
    pub fn seed_document(
        &self,
        matter_id: Uuid,
        owner_id: Uuid,
        external_id: &str,
        folder_external_id: Option<&str>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
        lock(&self.documents).push(Document {
            id,
            matter_id,
            owner_id,
            external_id: external_id.to_string(),
            display_name: format!("{external_id}.pdf"),
            folder_external_id: folder_external_id.map(str::to_string),
            content_hash: None,
            is_soft_deleted: false,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        });
        id
    }

    /// Flip a document to soft-deleted, as a past removal at the source would.
    pub fn soft_delete(&self, matter_id: Uuid, external_id: &str) {
        let mut docs = lock(&self.documents);
        if let Some(doc) = docs
            .iter_mut()
            .find(|d| d.matter_id == matter_id && d.external_id == external_id)
        {
            doc.is_soft_deleted = true;
        }
    }

    pub fn count(&self) -> usize {
        lock(&self.documents).len()
    }
}

#[async_trait]
impl attest_core::DocumentRepository for InMemoryDocumentRepository {
    async fn upsert_batch(&self, batch: Vec<UpsertDocumentRequest>) -> Result<UpsertBatchStats> {
        let mut docs = lock(&self.documents);
        let now = Utc::now();
        let mut stats = UpsertBatchStats::default();

        for req in batch {
            if let Some(existing) = docs.iter_mut().find(|d| {
                d.owner_id == req.owner_id
                    && d.matter_id == req.matter_id
                    && d.external_id == req.external_id
            }) {
                // Unchanged records leave the row untouched, as the
                // conditional conflict-update does under Postgres.
                let unchanged = !existing.is_soft_deleted
                    && existing.display_name == req.display_name
                    && existing.folder_external_id == req.folder_external_id;
                if unchanged {
                    continue;
                }
                if existing.is_soft_deleted {
                    existing.is_soft_deleted = false;
                    stats.restored += 1;
                } else {
                    stats.updated += 1;
                }
                existing.display_name = req.display_name;
                existing.folder_external_id = req.folder_external_id;
                existing.updated_at = now;
            } else {
                docs.push(Document {
                    id: Uuid::new_v4(),
                    matter_id: req.matter_id,
                    owner_id: req.owner_id,
                    external_id: req.external_id,
                    display_name: req.display_name,
                    folder_external_id: req.folder_external_id,
                    content_hash: None,
                    is_soft_deleted: false,
                    retry_count: 0,
                    created_at: now,
                    updated_at: now,
                });
                stats.inserted += 1;
            }
        }
        Ok(stats)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(lock(&self.documents).iter().find(|d| d.id == id).cloned())
    }

    async fn ids_for_external_ids(
        &self,
        matter_id: Uuid,
        external_ids: &[String],
    ) -> Result<Vec<Uuid>> {
        let docs = lock(&self.documents);
        Ok(external_ids
            .iter()
            .filter_map(|ext| {
                docs.iter()
                    .find(|d| d.matter_id == matter_id && &d.external_id == ext)
                    .map(|d| d.id)
            })
            .collect())
    }

    async fn ids_for_scope(&self, matter_id: Uuid, scope: &ProcessScope) -> Result<Vec<Uuid>> {
        let docs = lock(&self.documents);
        Ok(docs
            .iter()
            .filter(|d| d.matter_id == matter_id && !d.is_soft_deleted)
            .filter(|d| match scope {
                ProcessScope::WholeMatter => true,
                ProcessScope::Folder {
                    folder_external_id, ..
                } => d.folder_external_id.as_deref() == Some(folder_external_id.as_str()),
            })
            .map(|d| d.id)
            .collect())
    }

    async fn set_content_hash(&self, id: Uuid, content_hash: &str) -> Result<()> {
        let mut docs = lock(&self.documents);
        match docs.iter_mut().find(|d| d.id == id) {
            Some(doc) => {
                doc.content_hash = Some(content_hash.to_string());
                doc.updated_at = Utc::now();
                Ok(())
            }
            None => Err(Error::Internal(format!("no such document: {id}"))),
        }
    }

    async fn delete_for_matter(&self, matter_id: Uuid) -> Result<u64> {
        let mut docs = lock(&self.documents);
        let before = docs.len();
        docs.retain(|d| d.matter_id != matter_id);
        Ok((before - docs.len()) as u64)
    }
}

// =============================================================================
// JOBS
// =============================================================================

/// Mutex-linearized [`JobRepository`] fake. Job ids are sequential and the
/// job number equals the id, as in the Postgres schema.
#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: Mutex<Vec<ProcessingJob>>,
    next_id: AtomicI64,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Force a job's liveness timestamp into the past, simulating a worker
    /// that stopped reporting.
    pub fn backdate_activity(&self, job_id: i64, last_activity_at: DateTime<Utc>) {
        let mut jobs = lock(&self.jobs);
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.last_activity_at = last_activity_at;
        }
    }

    /// Mark a job non-resumable, as a schema-migration flag day would.
    pub fn set_resumable(&self, job_id: i64, is_resumable: bool) {
        let mut jobs = lock(&self.jobs);
        if let Some(job) = jobs.iter_mut().find(|j| j.id == job_id) {
            job.is_resumable = is_resumable;
        }
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, req: CreateJobRequest, admission_cap: i64) -> Result<ProcessingJob> {
        if req.document_ids_snapshot.is_empty() {
            return Err(Error::InvalidInput(
                "document snapshot must not be empty".to_string(),
            ));
        }

        let mut jobs = lock(&self.jobs);
        let active = jobs
            .iter()
            .filter(|j| {
                j.owner_id == req.owner_id
                    && matches!(j.status, JobStatus::Pending | JobStatus::Running)
            })
            .count() as i64;
        let status = if active >= admission_cap {
            JobStatus::Queued
        } else {
            JobStatus::Pending
        };

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let total = req.document_ids_snapshot.len() as i32;
        let job = ProcessingJob {
            id,
            job_number: id,
            owner_id: req.owner_id,
            matter_id: req.matter_id,
            scope: req.scope,
            status,
            document_ids_snapshot: req.document_ids_snapshot,
            total_documents: total,
            processed_documents: 0,
            last_activity_at: now,
            is_resumable: true,
            is_archived: false,
            archived_at: None,
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        };
        jobs.push(job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: i64) -> Result<Option<ProcessingJob>> {
        Ok(lock(&self.jobs).iter().find(|j| j.id == job_id).cloned())
    }

    async fn claim_next(&self) -> Result<Option<ProcessingJob>> {
        let mut jobs = lock(&self.jobs);
        let now = Utc::now();
        if let Some(job) = jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by_key(|j| j.id)
        {
            job.status = JobStatus::Running;
            job.started_at.get_or_insert(now);
            job.last_activity_at = now;
            return Ok(Some(job.clone()));
        }
        Ok(None)
    }

    async fn record_progress(&self, job_id: i64, processed: i32) -> Result<()> {
        let mut jobs = lock(&self.jobs);
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or(Error::JobNotFound(job_id))?;

        if job.status != JobStatus::Running {
            return Err(Error::InvalidTransition(format!(
                "progress report on job {job_id} in state {:?}",
                job.status
            )));
        }
        if processed < job.processed_documents {
            return Err(Error::InvalidTransition(format!(
                "progress regression on job {job_id}: {} -> {processed}",
                job.processed_documents
            )));
        }
        job.processed_documents = processed;
        job.last_activity_at = Utc::now();
        Ok(())
    }

    async fn complete(&self, job_id: i64) -> Result<()> {
        let mut jobs = lock(&self.jobs);
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        if !job.status.is_terminal() {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn fail(&self, job_id: i64, reason: &str) -> Result<()> {
        let mut jobs = lock(&self.jobs);
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        if !job.status.is_terminal() {
            job.status = JobStatus::Failed;
            job.error_message = Some(reason.to_string());
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn sweep_abandoned(&self, abandoned_cutoff: DateTime<Utc>) -> Result<SweepReport> {
        let mut jobs = lock(&self.jobs);
        let now = Utc::now();
        let mut report = SweepReport::default();

        for job in jobs.iter_mut() {
            if job.status == JobStatus::Running && job.last_activity_at < abandoned_cutoff {
                if job.is_resumable {
                    job.status = JobStatus::Pending;
                    job.last_activity_at = now;
                    report.redispatched.push(job.id);
                } else {
                    job.status = JobStatus::Failed;
                    job.error_message = Some("abandoned and not resumable".to_string());
                    job.completed_at = Some(now);
                    report.failed.push(job.id);
                }
            }
        }
        Ok(report)
    }

    async fn promote_queued(&self, owner_id: Uuid, admission_cap: i64) -> Result<i64> {
        let mut jobs = lock(&self.jobs);
        let active = jobs
            .iter()
            .filter(|j| {
                j.owner_id == owner_id
                    && matches!(j.status, JobStatus::Pending | JobStatus::Running)
            })
            .count() as i64;
        let capacity = (admission_cap - active).max(0);

        let mut queued_ids: Vec<i64> = jobs
            .iter()
            .filter(|j| j.owner_id == owner_id && j.status == JobStatus::Queued)
            .map(|j| j.id)
            .collect();
        queued_ids.sort_unstable();
        queued_ids.truncate(capacity as usize);

        let mut promoted = 0;
        for job in jobs.iter_mut() {
            if queued_ids.contains(&job.id) {
                job.status = JobStatus::Pending;
                promoted += 1;
            }
        }
        Ok(promoted)
    }

    async fn archive(&self, job_id: i64) -> Result<()> {
        let mut jobs = lock(&self.jobs);
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        if !job.status.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "cannot archive job {job_id} in state {:?}",
                job.status
            )));
        }
        if !job.is_archived {
            job.is_archived = true;
            job.archived_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn unarchive(&self, job_id: i64) -> Result<()> {
        let mut jobs = lock(&self.jobs);
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or(Error::JobNotFound(job_id))?;
        job.is_archived = false;
        job.archived_at = None;
        Ok(())
    }

    async fn list(&self, req: ListJobsRequest) -> Result<Vec<ProcessingJob>> {
        let jobs = lock(&self.jobs);
        let mut matching: Vec<ProcessingJob> = jobs
            .iter()
            .filter(|j| j.owner_id == req.owner_id && (req.include_archived || !j.is_archived))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(matching
            .into_iter()
            .skip(req.offset as usize)
            .take(req.limit as usize)
            .collect())
    }
}

// =============================================================================
// WITNESSES
// =============================================================================

/// Minimal [`WitnessRepository`] fake for worker tests.
#[derive(Default)]
pub struct InMemoryWitnessRepository {
    witnesses: Mutex<Vec<Witness>>,
    canonical: Mutex<Vec<CanonicalWitness>>,
}

impl InMemoryWitnessRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WitnessRepository for InMemoryWitnessRepository {
    async fn insert(&self, witness: NewWitness) -> Result<Uuid> {
        let id = Uuid::new_v4();
        lock(&self.witnesses).push(Witness {
            id,
            document_id: witness.document_id,
            job_id: witness.job_id,
            canonical_witness_id: None,
            name: witness.name,
            role: witness.role,
            snippet: witness.snippet,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn find_or_create_canonical(
        &self,
        matter_id: Uuid,
        display_name: &str,
    ) -> Result<CanonicalWitness> {
        let mut canonical = lock(&self.canonical);
        if let Some(existing) = canonical
            .iter()
            .find(|c| c.matter_id == matter_id && c.display_name == display_name)
        {
            return Ok(existing.clone());
        }
        let created = CanonicalWitness {
            id: Uuid::new_v4(),
            matter_id,
            display_name: display_name.to_string(),
            merged_count: 0,
            created_at: Utc::now(),
        };
        canonical.push(created.clone());
        Ok(created)
    }

    async fn link_canonical(&self, witness_id: Uuid, canonical_id: Uuid) -> Result<()> {
        let mut witnesses = lock(&self.witnesses);
        let witness = witnesses
            .iter_mut()
            .find(|w| w.id == witness_id)
            .ok_or_else(|| Error::Internal(format!("no such witness: {witness_id}")))?;
        if witness.canonical_witness_id != Some(canonical_id) {
            witness.canonical_witness_id = Some(canonical_id);
            let mut canonical = lock(&self.canonical);
            if let Some(c) = canonical.iter_mut().find(|c| c.id == canonical_id) {
                c.merged_count += 1;
            }
        }
        Ok(())
    }

    async fn list_for_job(&self, job_id: i64) -> Result<Vec<Witness>> {
        Ok(lock(&self.witnesses)
            .iter()
            .filter(|w| w.job_id == Some(job_id))
            .cloned()
            .collect())
    }
}

// =============================================================================
// SOURCE CLIENT
// =============================================================================

/// Scripted [`SourceClient`] fake serving fixed matter and document listings.
#[derive(Default)]
pub struct StaticSourceClient {
    connected: AtomicBool,
    matters: Mutex<Vec<SourceMatter>>,
    /// Documents per matter external id.
    documents: Mutex<HashMap<String, Vec<SourceDocument>>>,
    /// Direct subfolder edges: folder id -> child folder ids.
    subfolders: Mutex<HashMap<String, Vec<String>>>,
    fail_documents: AtomicBool,
}

impl StaticSourceClient {
    pub fn new() -> Self {
        let client = Self::default();
        client.connected.store(true, Ordering::SeqCst);
        client
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn add_matter(&self, matter: SourceMatter) {
        lock(&self.matters).push(matter);
    }

    pub fn add_document(&self, matter_external_id: &str, doc: SourceDocument) {
        lock(&self.documents)
            .entry(matter_external_id.to_string())
            .or_default()
            .push(doc);
    }

    pub fn add_subfolder(&self, parent: &str, child: &str) {
        lock(&self.subfolders)
            .entry(parent.to_string())
            .or_default()
            .push(child.to_string());
    }

    /// Make subsequent `list_documents` calls fail, simulating a source
    /// outage mid-sync.
    pub fn fail_documents(&self, fail: bool) {
        self.fail_documents.store(fail, Ordering::SeqCst);
    }

    fn folder_closure(&self, scope: &FolderScope) -> Vec<String> {
        let mut members = vec![scope.folder_external_id.clone()];
        if scope.include_subfolders {
            let edges = lock(&self.subfolders);
            let mut frontier = vec![scope.folder_external_id.clone()];
            while let Some(folder) = frontier.pop() {
                for child in edges.get(&folder).into_iter().flatten() {
                    if !members.contains(child) {
                        members.push(child.clone());
                        frontier.push(child.clone());
                    }
                }
            }
        }
        members
    }
}

#[async_trait]
impl SourceClient for StaticSourceClient {
    async fn is_connected(&self, _owner_id: Uuid) -> Result<bool> {
        Ok(self.connected.load(Ordering::SeqCst))
    }

    async fn list_matters(&self, _owner_id: Uuid) -> Result<Vec<SourceMatter>> {
        Ok(lock(&self.matters).clone())
    }

    async fn list_documents(
        &self,
        _owner_id: Uuid,
        matter_external_id: &str,
        folder: Option<&FolderScope>,
    ) -> Result<Vec<SourceDocument>> {
        if self.fail_documents.load(Ordering::SeqCst) {
            return Err(Error::ExternalApi("document listing unavailable".to_string()));
        }

        let all = lock(&self.documents)
            .get(matter_external_id)
            .cloned()
            .unwrap_or_default();

        match folder {
            None => Ok(all),
            Some(scope) => {
                let members = self.folder_closure(scope);
                Ok(all
                    .into_iter()
                    .filter(|d| {
                        d.parent_folder_id
                            .as_deref()
                            .map(|p| members.iter().any(|m| m == p))
                            .unwrap_or(false)
                    })
                    .collect())
            }
        }
    }
}
