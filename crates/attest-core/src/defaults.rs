//! Centralized default constants for the attest system.
//!
//! **This module is the single source of truth** for all shared default
//! values. All crates reference these constants instead of defining their own
//! magic numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

// =============================================================================
// SYNC LOCK
// =============================================================================

/// Stale-lock window for matter synchronization, in seconds (30 minutes).
///
/// A sync talks to a rate-limited external API and can legitimately run for
/// minutes; a SYNCING lock older than this is presumed abandoned by a crashed
/// worker and becomes claimable again.
pub const SYNC_STALE_TIMEOUT_SECS: i64 = 30 * 60;

// =============================================================================
// JOB LIFECYCLE
// =============================================================================

/// Default abandonment window for running jobs, in seconds (2 hours).
///
/// Deliberately longer than [`SYNC_STALE_TIMEOUT_SECS`]: extraction over a
/// large snapshot can legitimately run longer than a sync. Overridable via
/// `JOB_ABANDON_TIMEOUT_SECS`.
pub const JOB_ABANDON_TIMEOUT_SECS: i64 = 2 * 60 * 60;

/// Maximum pending+running jobs per owner before new jobs are admitted as
/// QUEUED instead of PENDING.
pub const JOB_ADMISSION_CAP: i64 = 8;

/// Maximum jobs a worker processes concurrently.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Worker polling interval when the queue is empty, in milliseconds.
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Interval between abandonment-sweep passes, in seconds.
pub const SWEEP_INTERVAL_SECS: u64 = 60;

/// Worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// RECONCILIATION
// =============================================================================

/// Records per reconciliation batch commit.
///
/// Bounds transaction size on large external result sets; a final partial
/// flush handles the remainder.
pub const RECONCILE_BATCH_SIZE: usize = 100;

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for job listings.
pub const PAGE_LIMIT: i64 = 50;

/// Default page offset.
pub const PAGE_OFFSET: i64 = 0;
