//! Extraction handler seam.
//!
//! The worker owns the lifecycle (claiming, progress, terminal transitions,
//! witness persistence); the handler owns only the per-document question
//! "which witnesses does this document name?". AI backends, OCR, and prompt
//! plumbing all live behind [`ExtractionHandler`].

use async_trait::async_trait;

use attest_core::{Document, ExtractedWitness, ProcessingJob, Result};

/// Progress callback invoked after each processed document.
pub type ProgressCallback = Box<dyn Fn(i32, i32) + Send + Sync>;

/// Context handed to the handler for one job.
pub struct JobContext {
    /// The claimed job, snapshot included.
    pub job: ProcessingJob,
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    pub fn new(job: ProcessingJob) -> Self {
        Self {
            job,
            progress_callback: None,
        }
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, i32) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report (processed, total) to the callback.
    pub fn report_progress(&self, processed: i32, total: i32) {
        if let Some(ref callback) = self.progress_callback {
            callback(processed, total);
        }
    }

    /// Index of the first snapshot member still unprocessed. Non-zero after a
    /// redispatch: the worker resumes, it does not restart.
    pub fn resume_index(&self) -> usize {
        self.job.processed_documents.max(0) as usize
    }
}

/// Per-document witness extraction.
#[async_trait]
pub trait ExtractionHandler: Send + Sync {
    /// Extract witnesses from one document. An error here fails the whole
    /// job; handlers should degrade to an empty list for documents that are
    /// merely unreadable.
    async fn extract(&self, ctx: &JobContext, document: &Document)
        -> Result<Vec<ExtractedWitness>>;
}

/// Handler that extracts nothing. For wiring tests and disabled deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpExtractor;

#[async_trait]
impl ExtractionHandler for NoOpExtractor {
    async fn extract(
        &self,
        _ctx: &JobContext,
        _document: &Document,
    ) -> Result<Vec<ExtractedWitness>> {
        Ok(Vec::new())
    }
}
