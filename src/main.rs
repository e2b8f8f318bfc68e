use anyhow::Result;
use binder_catalog_sync::database_ops::worker_manager::{default_jobs, JobRunner};
use binder_catalog_sync::logging::{init_tracing, DEFAULT_FILTER};
use binder_catalog_sync::util::env;
use binder_catalog_sync::CatalogSync;
use chrono::Utc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing("catalog-worker", DEFAULT_FILTER)?;
    env::preflight_check(
        "catalog-worker",
        &[],
        &[
            "SUPABASE_DB_URL",
            "DATABASE_URL",
            "SCRYFALL_BASE_URL",
            "CATALOG_JOB_INTERVAL_SECS",
            "CATALOG_SWEEP_STALE_HOURS",
            "CATALOG_SWEEP_LIMIT",
        ],
    )?;

    let max_conns: u32 = env::env_parse("DB_MAX_CONNECTIONS", 5);
    let sync = CatalogSync::connect_from_env(max_conns).await?;
    let runner = JobRunner::new(sync.clone());

    let interval_secs: u64 = env::env_parse("CATALOG_JOB_INTERVAL_SECS", 0);
    if interval_secs == 0 {
        // one-shot
        run_once(&runner, &sync).await?;
        return Ok(());
    }
    info!(interval_secs, "catalog worker looping");
    loop {
        if let Err(e) = run_once(&runner, &sync).await {
            error!(error = ?e, "catalog jobs failed");
        }
        tokio::time::sleep(Duration::from_secs(interval_secs)).await;
    }
}

async fn run_once(runner: &JobRunner, sync: &CatalogSync) -> Result<()> {
    let start = Utc::now();
    runner.run_all(default_jobs(sync)).await?;
    info!(
        elapsed_ms = (Utc::now() - start).num_milliseconds(),
        "catalog jobs finished"
    );
    Ok(())
}
