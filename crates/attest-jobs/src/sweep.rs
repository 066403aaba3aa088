//! Abandonment sweeper.
//!
//! A worker crash leaves jobs RUNNING with a frozen `last_activity_at`. The
//! sweeper periodically returns such jobs to the queue (or fails the
//! non-resumable ones) so no job is ever stuck RUNNING forever. Safe to run
//! on every node: the sweep is a conditional update, and two concurrent
//! sweeps just split the rows between them.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Notify};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use attest_core::{defaults, staleness, Error, JobRepository, Result, SweepReport};

/// Configuration for the abandonment sweeper.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Seconds between sweep passes.
    pub interval_secs: u64,
    /// Inactivity window after which a RUNNING job counts as abandoned.
    pub abandon_timeout_secs: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: defaults::SWEEP_INTERVAL_SECS,
            abandon_timeout_secs: defaults::JOB_ABANDON_TIMEOUT_SECS,
        }
    }
}

impl SweepConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `SWEEP_INTERVAL_SECS` | `60` | Seconds between sweep passes |
    /// | `JOB_ABANDON_TIMEOUT_SECS` | `7200` | Inactivity window before a running job is abandoned |
    pub fn from_env() -> Self {
        let interval_secs = std::env::var("SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::SWEEP_INTERVAL_SECS)
            .max(1);

        let abandon_timeout_secs = std::env::var("JOB_ABANDON_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::JOB_ABANDON_TIMEOUT_SECS)
            .max(1);

        Self {
            interval_secs,
            abandon_timeout_secs,
        }
    }

    /// Set the sweep interval.
    pub fn with_interval(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    /// Set the abandonment window.
    pub fn with_abandon_timeout(mut self, secs: i64) -> Self {
        self.abandon_timeout_secs = secs;
        self
    }
}

/// Handle for controlling a running sweeper.
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }
}

/// Periodic recovery of abandoned RUNNING jobs.
pub struct Sweeper {
    jobs: Arc<dyn JobRepository>,
    config: SweepConfig,
    /// Wake signal to nudge workers after a redispatch.
    wake: Option<Arc<Notify>>,
}

impl Sweeper {
    pub fn new(jobs: Arc<dyn JobRepository>, config: SweepConfig) -> Self {
        Self {
            jobs,
            config,
            wake: None,
        }
    }

    /// Attach a worker wake signal, notified when a sweep redispatches jobs.
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = Some(wake);
        self
    }

    /// Run one sweep pass now.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let cutoff = staleness::job_abandoned_cutoff(Utc::now(), self.config.abandon_timeout_secs);
        let report = self.jobs.sweep_abandoned(cutoff).await?;

        if !report.redispatched.is_empty() || !report.failed.is_empty() {
            warn!(
                subsystem = "jobs",
                component = "sweeper",
                op = "sweep",
                redispatched = report.redispatched.len(),
                failed = report.failed.len(),
                "Recovered abandoned jobs"
            );
            if !report.redispatched.is_empty() {
                if let Some(ref wake) = self.wake {
                    wake.notify_one();
                }
            }
        } else {
            debug!(
                subsystem = "jobs",
                component = "sweeper",
                op = "sweep",
                "No abandoned jobs"
            );
        }
        Ok(report)
    }

    /// Start the periodic sweep loop and return a handle for control.
    pub fn start(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let interval = Duration::from_secs(self.config.interval_secs);

        info!(
            interval_secs = self.config.interval_secs,
            abandon_timeout_secs = self.config.abandon_timeout_secs,
            "Abandonment sweeper started"
        );

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Abandonment sweeper received shutdown signal");
                        break;
                    }
                    _ = sleep(interval) => {
                        if let Err(e) = self.sweep_once().await {
                            error!(error = ?e, "Sweep pass failed");
                        }
                    }
                }
            }
            info!("Abandonment sweeper stopped");
        });

        SweeperHandle { shutdown_tx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_config_default() {
        let config = SweepConfig::default();
        assert_eq!(config.interval_secs, defaults::SWEEP_INTERVAL_SECS);
        assert_eq!(
            config.abandon_timeout_secs,
            defaults::JOB_ABANDON_TIMEOUT_SECS
        );
    }

    #[test]
    fn test_sweep_config_builder() {
        let config = SweepConfig::default()
            .with_interval(5)
            .with_abandon_timeout(600);
        assert_eq!(config.interval_secs, 5);
        assert_eq!(config.abandon_timeout_secs, 600);
    }
}
