//! Composition root for a standalone extraction node: connects to Postgres,
//! starts the worker and the abandonment sweeper, and runs until Ctrl-C.
//!
//! ```sh
//! DATABASE_URL=postgres://localhost/attest cargo run -p attest-jobs --example run_worker
//! ```

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use attest_db::{Database, PoolConfig};
use attest_jobs::{NoOpExtractor, SweepConfig, Sweeper, WorkerBuilder, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing: LOG_FORMAT selects "json" or "text" (default).
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "attest_jobs=debug,attest_db=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env()).await?;
    let wake = db.jobs.job_notify();

    let worker = WorkerBuilder::new(db.clone())
        .with_config(WorkerConfig::from_env())
        .with_handler(NoOpExtractor)
        .build();
    let worker_handle = worker.start();

    let sweeper = Sweeper::new(Arc::new(db.jobs), SweepConfig::from_env()).with_wake(wake);
    let sweeper_handle = sweeper.start();

    info!("Extraction node running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    worker_handle.shutdown().await?;
    sweeper_handle.shutdown().await?;
    Ok(())
}
