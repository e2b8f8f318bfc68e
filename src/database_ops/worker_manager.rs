use anyhow::Result;
use futures::future::join_all;
use tracing::{error, info};

use crate::database_ops::catalog::{CatalogSync, RepriceScope};

#[async_trait::async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run(&self, sync: &CatalogSync) -> Result<()>;
}

pub struct JobRunner {
    sync: CatalogSync,
}

impl JobRunner {
    pub fn new(sync: CatalogSync) -> Self {
        Self { sync }
    }

    /// Run all jobs concurrently, logging outcomes. Returns first error if any.
    pub async fn run_all(&self, jobs: Vec<Box<dyn ScheduledJob>>) -> Result<()> {
        let mut tasks = Vec::with_capacity(jobs.len());
        for job in jobs {
            let sync = self.sync.clone();
            tasks.push(tokio::spawn(async move {
                info!(job = job.name(), "starting job");
                let res = job.run(&sync).await;
                match &res {
                    Ok(_) => info!(job = job.name(), "job finished"),
                    Err(e) => error!(job = job.name(), error = %e, "job failed"),
                }
                res
            }));
        }
        let mut first_err: Option<anyhow::Error> = None;
        for r in join_all(tasks).await {
            let err = match r {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(join_err) => anyhow::anyhow!(join_err),
            };
            first_err.get_or_insert(err);
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Refresh entities older than `stale_hours`.
pub struct SweepJob {
    pub stale_hours: i64,
    pub limit: i64,
}

#[async_trait::async_trait]
impl ScheduledJob for SweepJob {
    fn name(&self) -> &'static str {
        "stale_sweep"
    }
    async fn run(&self, sync: &CatalogSync) -> Result<()> {
        let refreshed = sync
            .refresh_stale_entities(self.stale_hours, self.limit)
            .await?;
        info!(refreshed, "sweep job done");
        Ok(())
    }
}

pub struct RepriceJob {
    pub scope: RepriceScope,
}

#[async_trait::async_trait]
impl ScheduledJob for RepriceJob {
    fn name(&self) -> &'static str {
        "reprice"
    }
    async fn run(&self, sync: &CatalogSync) -> Result<()> {
        let summary = sync.reprice(&self.scope).await?;
        info!(
            considered = summary.considered,
            updated = summary.updated,
            skipped = summary.skipped,
            "reprice job done"
        );
        Ok(())
    }
}

/// The jobs the worker binary runs each tick.
pub fn default_jobs(sync: &CatalogSync) -> Vec<Box<dyn ScheduledJob>> {
    let settings = sync.settings();
    vec![
        Box::new(SweepJob {
            stale_hours: settings.sweep_stale_hours,
            limit: settings.sweep_limit,
        }),
        Box::new(RepriceJob {
            scope: RepriceScope::default(),
        }),
    ]
}
