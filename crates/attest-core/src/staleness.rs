//! Clock/timeout policy: pure staleness computations.
//!
//! No state lives here. The persisted `sync_started_at` and
//! `last_activity_at` columns are the sole inputs; every caller passes `now`
//! explicitly so the policy stays deterministic under test.

use chrono::{DateTime, Duration, Utc};

use crate::defaults;

/// Cutoff before which a SYNCING lock is considered abandoned.
///
/// A matter whose `sync_started_at` is strictly older than this cutoff is
/// stale and claimable.
pub fn sync_stale_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::seconds(defaults::SYNC_STALE_TIMEOUT_SECS)
}

/// Whether a SYNCING lock started at `started_at` is stale as of `now`.
pub fn is_sync_stale(started_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    started_at < sync_stale_cutoff(now)
}

/// Cutoff before which a RUNNING job with no progress signal is considered
/// abandoned. `timeout_secs` is configurable (see `JOB_ABANDON_TIMEOUT_SECS`).
pub fn job_abandoned_cutoff(now: DateTime<Utc>, timeout_secs: i64) -> DateTime<Utc> {
    now - Duration::seconds(timeout_secs)
}

/// Whether a running job whose last progress report was `last_activity_at` is
/// abandoned as of `now`. Liveness only; resumability is the caller's check.
pub fn is_job_abandoned(
    last_activity_at: DateTime<Utc>,
    now: DateTime<Utc>,
    timeout_secs: i64,
) -> bool {
    last_activity_at < job_abandoned_cutoff(now, timeout_secs)
}
