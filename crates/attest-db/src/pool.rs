//! Connection pool setup.
//!
//! One pool per process, shared by every repository through [`crate::Database`].
//! Sizing matters here: the claim and lock statements hold row locks only for
//! a single statement, so the pool is tuned for many short acquisitions
//! rather than long-lived transactions.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use attest_core::{Error, Result};

/// Pool sizing and timeout configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on open connections.
    pub max_connections: u32,
    /// Connections kept warm when idle.
    pub min_connections: u32,
    /// Seconds to wait for a free connection before erroring.
    pub acquire_timeout_secs: u64,
    /// Seconds an idle connection may linger before being closed.
    pub idle_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout_secs: 30,
            idle_timeout_secs: 600,
        }
    }
}

impl PoolConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DATABASE_MAX_CONNECTIONS` | `10` | Upper bound on open connections |
    /// | `DATABASE_MIN_CONNECTIONS` | `1` | Connections kept warm when idle |
    /// | `DATABASE_ACQUIRE_TIMEOUT_SECS` | `30` | Wait for a free connection |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults.max_connections)
            .max(1);

        let min_connections = std::env::var("DATABASE_MIN_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults.min_connections)
            .min(max_connections);

        let acquire_timeout_secs = std::env::var("DATABASE_ACQUIRE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.acquire_timeout_secs)
            .max(1);

        Self {
            max_connections,
            min_connections,
            acquire_timeout_secs,
            ..defaults
        }
    }

    /// Set the maximum number of connections.
    pub fn with_max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    /// Set the number of connections kept warm.
    pub fn with_min_connections(mut self, n: u32) -> Self {
        self.min_connections = n;
        self
    }

    /// Set the acquire timeout.
    pub fn with_acquire_timeout(mut self, secs: u64) -> Self {
        self.acquire_timeout_secs = secs;
        self
    }
}

/// Connect with defaults.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

/// Connect with the given configuration, logging connect timing.
pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.acquire_timeout_secs, 30);
    }

    #[test]
    fn test_pool_config_builders() {
        let config = PoolConfig::default()
            .with_max_connections(20)
            .with_min_connections(5)
            .with_acquire_timeout(60);

        assert_eq!(config.max_connections, 20);
        assert_eq!(config.min_connections, 5);
        assert_eq!(config.acquire_timeout_secs, 60);
    }

    #[test]
    fn test_pool_config_from_env_defaults_without_vars() {
        // Env-var based from_env tests mutate process state; only the
        // unset-variable default path is safe to assert here.
        if std::env::var("DATABASE_MAX_CONNECTIONS").is_err()
            && std::env::var("DATABASE_MIN_CONNECTIONS").is_err()
            && std::env::var("DATABASE_ACQUIRE_TIMEOUT_SECS").is_err()
        {
            assert_eq!(PoolConfig::from_env(), PoolConfig::default());
        }
    }
}
