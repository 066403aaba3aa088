//! Error types for attest.

use thiserror::Error;

/// Result type alias using attest's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for attest operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A synchronization is already in flight for this matter and its lock
    /// is not stale. Callers should retry later.
    #[error("Sync already in progress for matter {0}")]
    Busy(uuid::Uuid),

    /// The practice-management integration is missing or inactive for this
    /// owner. The user must reconnect before processing can start.
    #[error("Practice-management source not connected")]
    NotConnected,

    /// A job snapshot came up empty. An empty job is never created; the user
    /// must pick a different scope.
    #[error("No documents found for the requested scope")]
    NoDocuments,

    /// The external source returned an error. The remaining record stream is
    /// aborted and the sync is marked failed.
    #[error("External API error: {0}")]
    ExternalApi(String),

    /// Matter not found
    #[error("Matter not found: {0}")]
    MatterNotFound(uuid::Uuid),

    /// Processing job not found
    #[error("Job not found: {0}")]
    JobNotFound(i64),

    /// A lock-state or job-state transition that should be impossible was
    /// attempted. Programming error, never silently ignored.
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::ExternalApi(e.to_string())
    }
}

impl Error {
    /// Whether the caller can recover by retrying later without changing the
    /// request (lock contention, transient source failures).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Busy(_) | Error::ExternalApi(_))
    }
}
