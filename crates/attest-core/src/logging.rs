//! Structured logging schema and field name constants for attest.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation tools can query by standardized field names across
//! every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-record iteration, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "sync", "db", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "lock", "reconciler", "snapshot", "worker", "sweep", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "begin_sync", "poll_stale", "reconcile_documents", "claim"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Matter UUID being operated on.
pub const MATTER_ID: &str = "matter_id";

/// Owner (user/organization) UUID.
pub const OWNER_ID: &str = "owner_id";

/// Processing job identifier (equal to its job number).
pub const JOB_ID: &str = "job_id";

/// Document UUID.
pub const DOCUMENT_ID: &str = "document_id";

/// External identifier at the practice-management source.
pub const EXTERNAL_ID: &str = "external_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of stale sync locks recovered by a poll.
pub const RECOVERED_COUNT: &str = "recovered_count";

/// Number of records inserted during reconciliation.
pub const INSERTED: &str = "inserted";

/// Number of records updated in place during reconciliation.
pub const UPDATED: &str = "updated";

/// Number of malformed or unassociated records skipped.
pub const SKIPPED: &str = "skipped";

/// Snapshot length / total documents for a job.
pub const TOTAL_DOCUMENTS: &str = "total_documents";

/// Documents processed so far for a job.
pub const PROCESSED_DOCUMENTS: &str = "processed_documents";
