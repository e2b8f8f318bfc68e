use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::database_ops::catalog::{CatalogSync, RefreshOutcome};

/// One background refresh request.
#[derive(Debug, Clone)]
pub struct RefreshJob {
    pub entity_id: String,
    pub hint_name: Option<String>,
}

/// Handle for enqueuing fire-and-forget refreshes.
///
/// Jobs are drained by a single worker task that runs the freshness gate in
/// order. The worker stops once every handle is dropped and the queue is empty.
#[derive(Clone)]
pub struct RefreshQueue {
    tx: mpsc::Sender<RefreshJob>,
}

impl RefreshQueue {
    /// Spawn the worker on the current runtime.
    pub fn spawn(sync: CatalogSync, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<RefreshJob>(capacity.max(1));
        let handle = tokio::spawn(async move {
            let mut processed = 0usize;
            while let Some(job) = rx.recv().await {
                processed += 1;
                match sync
                    .ensure_fresh(&job.entity_id, job.hint_name.as_deref())
                    .await
                {
                    Ok(RefreshOutcome::Refreshed { print_count }) => {
                        debug!(entity_id = %job.entity_id, print_count, "background refresh done")
                    }
                    Ok(outcome) => {
                        debug!(entity_id = %job.entity_id, ?outcome, "background refresh not needed")
                    }
                    Err(e) => {
                        warn!(entity_id = %job.entity_id, error = %e, "background refresh failed")
                    }
                }
            }
            info!(processed, "refresh queue drained");
        });
        (Self { tx }, handle)
    }

    /// Queue a refresh without waiting. Returns false when the queue is full or closed.
    pub fn enqueue(&self, entity_id: &str, hint_name: Option<&str>) -> bool {
        let job = RefreshJob {
            entity_id: entity_id.to_string(),
            hint_name: hint_name.map(str::to_string),
        };
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                debug!(entity_id = %job.entity_id, "refresh queue full; dropping job");
                false
            }
            Err(TrySendError::Closed(job)) => {
                warn!(entity_id = %job.entity_id, "refresh queue closed; dropping job");
                false
            }
        }
    }
}
