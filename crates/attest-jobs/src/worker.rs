//! Extraction worker: claims processing jobs and runs them to a terminal
//! state.
//!
//! The worker is the only writer of RUNNING-side lifecycle transitions. It
//! processes each job's frozen snapshot in order, resuming from the stored
//! progress counter after a redispatch, and reports progress after every
//! document so the abandonment sweeper sees a live `last_activity_at`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use attest_core::{
    defaults, DocumentRepository, Error, JobRepository, NewWitness, ProcessingJob,
    WitnessRepository,
};
use attest_db::Database;

use crate::handler::{ExtractionHandler, JobContext};
use crate::DEFAULT_POLL_INTERVAL_MS;

/// Configuration for the extraction worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds when the queue is empty.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrently executing jobs.
    pub max_concurrent_jobs: usize,
    /// Per-owner pending+running cap used when promoting queued jobs.
    pub admission_cap: i64,
    /// Whether to process jobs at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            admission_cap: defaults::JOB_ADMISSION_CAP,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `JOB_POLL_INTERVAL_MS` | `500` | Polling interval when queue is empty |
    /// | `JOB_ADMISSION_CAP` | `8` | Per-owner pending+running cap |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::JOB_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);

        let admission_cap = std::env::var("JOB_ADMISSION_CAP")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::JOB_ADMISSION_CAP)
            .max(1);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            admission_cap,
            enabled,
        }
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    /// Set the per-owner admission cap.
    pub fn with_admission_cap(mut self, cap: i64) -> Self {
        self.admission_cap = cap;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the extraction worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A job was claimed and started.
    JobStarted { job_id: i64 },
    /// Job progress was updated.
    JobProgress {
        job_id: i64,
        processed: i32,
        total: i32,
    },
    /// A job completed successfully.
    JobCompleted { job_id: i64 },
    /// A job failed.
    JobFailed { job_id: i64, error: String },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> attest_core::Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Worker that claims pending jobs and runs extraction over their snapshots.
pub struct JobWorker {
    jobs: Arc<dyn JobRepository>,
    documents: Arc<dyn DocumentRepository>,
    witnesses: Arc<dyn WitnessRepository>,
    handler: Arc<dyn ExtractionHandler>,
    config: WorkerConfig,
    /// Wake signal from the job repository; absent means pure polling.
    wake: Option<Arc<Notify>>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    /// Create a new worker over explicit repository seams.
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        documents: Arc<dyn DocumentRepository>,
        witnesses: Arc<dyn WitnessRepository>,
        handler: Arc<dyn ExtractionHandler>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        Self {
            jobs,
            documents,
            witnesses,
            handler,
            config,
            wake: None,
            event_tx,
        }
    }

    /// Attach a wake signal so new-job notifications interrupt the idle
    /// sleep.
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = Some(wake);
        self
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Run the worker loop with concurrent job processing.
    ///
    /// Claims up to `max_concurrent_jobs` at a time and processes them
    /// concurrently. Only sleeps when the queue is empty; a wake signal or
    /// the poll interval ends the sleep.
    #[instrument(skip(self, shutdown_rx))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Extraction worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            "Extraction worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Extraction worker received shutdown signal");
                break;
            }

            let mut claimed = 0;
            let mut tasks = tokio::task::JoinSet::new();

            for _ in 0..self.config.max_concurrent_jobs {
                match self.claim_job().await {
                    Some(job) => {
                        claimed += 1;
                        let worker = self.clone_refs();
                        tasks.spawn(async move {
                            worker.execute_job(job).await;
                        });
                    }
                    None => break,
                }
            }

            if claimed == 0 {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Extraction worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                    _ = Self::woken(self.wake.clone()) => {}
                }
            } else {
                debug!(claimed, "Processing concurrent job batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "Job task panicked");
                    }
                }
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Extraction worker stopped");
    }

    async fn woken(wake: Option<Arc<Notify>>) {
        match wake {
            Some(notify) => notify.notified().await,
            None => std::future::pending().await,
        }
    }

    /// Claim the next pending job without processing it.
    async fn claim_job(&self) -> Option<ProcessingJob> {
        match self.jobs.claim_next().await {
            Ok(Some(job)) => Some(job),
            Ok(None) => None,
            Err(e) => {
                error!(error = ?e, "Failed to claim job");
                None
            }
        }
    }

    /// Clone references needed for spawned job tasks.
    fn clone_refs(&self) -> JobWorkerRef {
        JobWorkerRef {
            jobs: self.jobs.clone(),
            documents: self.documents.clone(),
            witnesses: self.witnesses.clone(),
            handler: self.handler.clone(),
            admission_cap: self.config.admission_cap,
            wake: self.wake.clone(),
            event_tx: self.event_tx.clone(),
        }
    }
}

/// Lightweight reference bundle for executing a single job in a spawned task.
struct JobWorkerRef {
    jobs: Arc<dyn JobRepository>,
    documents: Arc<dyn DocumentRepository>,
    witnesses: Arc<dyn WitnessRepository>,
    handler: Arc<dyn ExtractionHandler>,
    admission_cap: i64,
    wake: Option<Arc<Notify>>,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorkerRef {
    /// Execute a single claimed job to a terminal state.
    async fn execute_job(self, job: ProcessingJob) {
        let start = Instant::now();
        let job_id = job.id;
        let owner_id = job.owner_id;
        let total = job.total_documents;

        info!(
            job_id,
            matter_id = %job.matter_id,
            total_documents = total,
            processed_documents = job.processed_documents,
            "Processing job"
        );
        let _ = self.event_tx.send(WorkerEvent::JobStarted { job_id });

        let event_tx = self.event_tx.clone();
        let ctx = JobContext::new(job).with_progress_callback(move |processed, total| {
            let _ = event_tx.send(WorkerEvent::JobProgress {
                job_id,
                processed,
                total,
            });
        });

        match self.process_snapshot(&ctx).await {
            Ok(()) => {
                if let Err(e) = self.jobs.complete(job_id).await {
                    error!(error = ?e, job_id, "Failed to mark job as completed");
                } else {
                    info!(
                        job_id,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Job completed successfully"
                    );
                    let _ = self.event_tx.send(WorkerEvent::JobCompleted { job_id });
                }
            }
            // The sweeper reclaimed the job mid-run: its snapshot and counter
            // are intact and another worker will resume it. No terminal
            // transition from us.
            Err(Error::InvalidTransition(reason)) => {
                warn!(job_id, %reason, "Lost claim on job, abandoning execution");
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(e) = self.jobs.fail(job_id, &message).await {
                    error!(error = ?e, job_id, "Failed to mark job as failed");
                } else {
                    warn!(
                        job_id,
                        error = %message,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Job failed"
                    );
                    let _ = self.event_tx.send(WorkerEvent::JobFailed {
                        job_id,
                        error: message,
                    });
                }
            }
        }

        // Terminal either way from this owner's perspective; open admission
        // for anything queued behind the cap.
        match self.jobs.promote_queued(owner_id, self.admission_cap).await {
            Ok(promoted) if promoted > 0 => {
                debug!(owner_id = %owner_id, promoted, "Promoted queued jobs");
                if let Some(ref wake) = self.wake {
                    wake.notify_one();
                }
            }
            Ok(_) => {}
            Err(e) => error!(error = ?e, owner_id = %owner_id, "Failed to promote queued jobs"),
        }
    }

    /// Walk the snapshot from the resume index, extracting and persisting
    /// witnesses per document.
    async fn process_snapshot(&self, ctx: &JobContext) -> attest_core::Result<()> {
        let job_id = ctx.job.id;
        let total = ctx.job.total_documents;
        let snapshot = &ctx.job.document_ids_snapshot;

        for (idx, document_id) in snapshot.iter().enumerate().skip(ctx.resume_index()) {
            match self.documents.get(*document_id).await? {
                Some(doc) if !doc.is_soft_deleted => {
                    let extracted = self.handler.extract(ctx, &doc).await?;
                    for witness in extracted {
                        let witness_id = self
                            .witnesses
                            .insert(NewWitness {
                                document_id: doc.id,
                                job_id: Some(job_id),
                                name: witness.name.clone(),
                                role: witness.role,
                                snippet: witness.snippet,
                            })
                            .await?;
                        let canonical = self
                            .witnesses
                            .find_or_create_canonical(ctx.job.matter_id, &witness.name)
                            .await?;
                        self.witnesses.link_canonical(witness_id, canonical.id).await?;
                    }
                }
                // Snapshot members deleted since freezing are skipped, still
                // counted as processed.
                _ => {
                    debug!(job_id, document_id = %document_id, "Skipping absent or soft-deleted snapshot member");
                }
            }

            let processed = (idx + 1) as i32;
            self.jobs.record_progress(job_id, processed).await?;
            ctx.report_progress(processed, total);
        }
        Ok(())
    }
}

/// Builder for creating an extraction worker from a database context.
pub struct WorkerBuilder {
    db: Database,
    config: WorkerConfig,
    handler: Arc<dyn ExtractionHandler>,
}

impl WorkerBuilder {
    /// Create a new worker builder with a no-op handler.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            config: WorkerConfig::default(),
            handler: Arc::new(crate::handler::NoOpExtractor),
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the extraction handler.
    pub fn with_handler<H: ExtractionHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Build and return the worker, wired to the repository wake signal.
    pub fn build(self) -> JobWorker {
        let wake = self.db.jobs.job_notify();
        let Database {
            documents,
            jobs,
            witnesses,
            ..
        } = self.db;

        JobWorker::new(
            Arc::new(jobs),
            Arc::new(documents),
            Arc::new(witnesses),
            self.handler,
            self.config,
        )
        .with_wake(wake)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_default() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.admission_cap, 8);
        assert!(config.enabled);
    }

    #[test]
    fn test_worker_config_builder() {
        let config = WorkerConfig::default()
            .with_poll_interval(1000)
            .with_max_concurrent(8)
            .with_admission_cap(2)
            .with_enabled(false);

        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.max_concurrent_jobs, 8);
        assert_eq!(config.admission_cap, 2);
        assert!(!config.enabled);
    }

    #[test]
    fn test_worker_event_variants() {
        let event = WorkerEvent::JobProgress {
            job_id: 3,
            processed: 1,
            total: 4,
        };
        match event {
            WorkerEvent::JobProgress {
                job_id,
                processed,
                total,
            } => {
                assert_eq!(job_id, 3);
                assert_eq!(processed, 1);
                assert_eq!(total, 4);
            }
            _ => panic!("Wrong event variant"),
        }

        let failed = WorkerEvent::JobFailed {
            job_id: 3,
            error: "boom".into(),
        };
        let debug_str = format!("{failed:?}");
        assert!(debug_str.contains("JobFailed"));
        assert!(debug_str.contains("boom"));
    }

    #[test]
    fn test_worker_config_clone_preserves_fields() {
        let config1 = WorkerConfig::default()
            .with_poll_interval(1500)
            .with_max_concurrent(6);
        let config2 = config1.clone();

        assert_eq!(config1.poll_interval_ms, config2.poll_interval_ms);
        assert_eq!(config1.max_concurrent_jobs, config2.max_concurrent_jobs);
        assert_eq!(config1.admission_cap, config2.admission_cap);
        assert_eq!(config1.enabled, config2.enabled);
    }
}
