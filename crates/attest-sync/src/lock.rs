//! Per-matter sync lock manager.
//!
//! Ensures at most one in-flight synchronization per matter and recovers
//! automatically from crashed synchronizations without operator intervention.
//! The actual atomicity lives in [`MatterRepository::try_begin_sync`]; this
//! layer owns the policy (stale window, recovery target) and the structured
//! logging around every transition.
//!
//! Stale recovery target is uniformly Idle: a stale SYNCING lock is treated
//! as claimable on the acquisition path and recovered to Idle on the poll
//! path. One policy, applied in one predicate.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use attest_core::{
    staleness, Error, MatterRepository, Result, SyncOutcome, SyncStatusReport,
};

/// Witness that a sync lock was acquired. Carried by the caller for the
/// duration of the synchronization and released through
/// [`SyncLockManager::end_sync`].
#[derive(Debug, Clone, Copy)]
pub struct SyncLease {
    pub matter_id: Uuid,
    pub acquired_at: DateTime<Utc>,
}

/// Owns the per-matter sync state machine.
pub struct SyncLockManager {
    matters: Arc<dyn MatterRepository>,
}

impl SyncLockManager {
    pub fn new(matters: Arc<dyn MatterRepository>) -> Self {
        Self { matters }
    }

    /// Acquire the sync lock for a matter.
    ///
    /// Succeeds from Idle and Failed, and from Syncing only when the held
    /// lock is stale (older than the 30-minute window). Returns
    /// [`Error::Busy`] when the lock is held and live.
    pub async fn begin_sync(&self, matter_id: Uuid) -> Result<SyncLease> {
        let now = Utc::now();
        let cutoff = staleness::sync_stale_cutoff(now);

        match self.matters.try_begin_sync(matter_id, now, cutoff).await? {
            Some(matter) => {
                // Transition functions are the only writers of the lock
                // columns, so a violated invariant here is a repository bug.
                debug_assert!(matter.lock_invariant_holds());

                info!(
                    subsystem = "sync",
                    component = "lock",
                    op = "begin_sync",
                    matter_id = %matter_id,
                    "Acquired sync lock"
                );
                Ok(SyncLease {
                    matter_id,
                    acquired_at: now,
                })
            }
            None => {
                // Distinguish a held lock from a matter that does not exist.
                match self.matters.get(matter_id).await? {
                    Some(_) => {
                        debug!(
                            subsystem = "sync",
                            component = "lock",
                            op = "begin_sync",
                            matter_id = %matter_id,
                            "Sync lock held and not stale"
                        );
                        Err(Error::Busy(matter_id))
                    }
                    None => Err(Error::MatterNotFound(matter_id)),
                }
            }
        }
    }

    /// Release the sync lock. Idempotent: safe to call even if the lease has
    /// already expired and been reclaimed.
    pub async fn end_sync(&self, matter_id: Uuid, outcome: SyncOutcome) -> Result<()> {
        let now = Utc::now();
        self.matters.end_sync(matter_id, outcome, now).await?;

        match outcome {
            SyncOutcome::Success => info!(
                subsystem = "sync",
                component = "lock",
                op = "end_sync",
                matter_id = %matter_id,
                "Released sync lock after successful sync"
            ),
            SyncOutcome::Failure => warn!(
                subsystem = "sync",
                component = "lock",
                op = "end_sync",
                matter_id = %matter_id,
                "Released sync lock after failed sync"
            ),
        }
        Ok(())
    }

    /// Recover every stale SYNCING matter of the owner. Best-effort
    /// background correction; returns how many locks were recovered.
    pub async fn poll_stale(&self, owner_id: Uuid) -> Result<i64> {
        let cutoff = staleness::sync_stale_cutoff(Utc::now());
        let recovered = self.matters.recover_stale(owner_id, cutoff).await?;

        if recovered > 0 {
            warn!(
                subsystem = "sync",
                component = "lock",
                op = "poll_stale",
                owner_id = %owner_id,
                recovered_count = recovered,
                "Recovered stale sync locks"
            );
        }
        Ok(recovered)
    }

    /// Aggregate sync view for an owner. Runs the stale poll first so the
    /// report never shows a crashed sync as forever in-flight.
    pub async fn status_report(&self, owner_id: Uuid) -> Result<SyncStatusReport> {
        let recovered_stale_count = self.poll_stale(owner_id).await?;
        let syncing_count = self.matters.syncing_count(owner_id).await?;

        Ok(SyncStatusReport {
            is_syncing: syncing_count > 0,
            syncing_count,
            recovered_stale_count,
        })
    }
}
