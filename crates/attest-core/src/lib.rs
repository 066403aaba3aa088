//! # attest-core
//!
//! Core types, traits, and abstractions shared across the attest workspace:
//!
//! - Domain models for matters, documents, processing jobs, and witnesses
//! - The error taxonomy (`Busy`, `NotConnected`, `NoDocuments`, ...)
//! - Repository and source-client trait seams
//! - Pure clock/timeout policy for stale-lock and abandonment detection
//! - Centralized defaults and the structured-logging field schema

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod source;
pub mod staleness;
pub mod traits;

pub use error::{Error, Result};
pub use models::{
    CanonicalWitness, CreateJobRequest, Document, JobStatus, JobView, Matter, NewWitness,
    ProcessScope, ProcessingJob, ReconcileStats, SyncOutcome, SyncStatus, SyncStatusReport,
    UpsertDocumentRequest, Witness,
};
pub use source::{
    DispatchTicket, ExtractedWitness, FolderScope, SourceDocument, SourceField, SourceMatter,
};
pub use staleness::{is_job_abandoned, is_sync_stale, job_abandoned_cutoff, sync_stale_cutoff};
pub use traits::{
    DocumentRepository, JobRepository, ListJobsRequest, MatterRepository, SourceClient,
    SweepReport, UpsertBatchStats, UpsertMatterRequest, WitnessRepository,
};
