use anyhow::{Context, Result};
use tracing::{debug, instrument, warn};

use super::model::CatalogPrint;
use super::CatalogSync;
use crate::orchestrator::RefreshQueue;

impl CatalogSync {
    /// Prints for an entity as stored locally, newest release first.
    ///
    /// A cold entity is refreshed inline so the first reader gets data. A warm one is
    /// returned immediately and a refresh is queued; the gate decides if it is needed.
    #[instrument(skip(self, queue))]
    pub async fn prints_for_entity(
        &self,
        entity_id: &str,
        queue: &RefreshQueue,
    ) -> Result<Vec<CatalogPrint>> {
        let entity_id = entity_id.trim();
        if entity_id.is_empty() {
            return Ok(Vec::new());
        }
        let prints = self
            .store
            .prints_for_entity(entity_id)
            .await
            .with_context(|| format!("load prints for {entity_id}"))?;
        if !prints.is_empty() {
            if !queue.enqueue(entity_id, None) {
                debug!("background refresh not queued");
            }
            return Ok(prints);
        }

        if let Err(e) = self.ensure_fresh(entity_id, None).await {
            warn!(error = %e, "inline refresh failed; returning what is cached");
        }
        self.store
            .prints_for_entity(entity_id)
            .await
            .with_context(|| format!("reload prints for {entity_id}"))
    }
}
