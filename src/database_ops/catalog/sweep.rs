use anyhow::{Context, Result};
use chrono::{Duration, SubsecRound, Utc};
use tracing::{debug, info, instrument, warn};

use super::freshness::stale_cutoff;
use super::CatalogSync;

impl CatalogSync {
    /// Refresh up to `limit` entities not synced within `stale_hours`, never-synced first.
    ///
    /// Each entity goes through the same lease as the freshness gate, so a sweep
    /// racing a live request crawls once. Returns how many entities were refreshed.
    #[instrument(skip(self))]
    pub async fn refresh_stale_entities(&self, stale_hours: i64, limit: i64) -> Result<usize> {
        if limit <= 0 {
            return Ok(0);
        }
        let now = Utc::now().trunc_subsecs(6);
        let cutoff = stale_cutoff(now, Duration::try_hours(stale_hours));
        let ids = self
            .store
            .stale_entity_ids(cutoff, limit)
            .await
            .context("list stale entities")?;
        debug!(candidates = ids.len(), %cutoff, "sweep candidates");

        let mut refreshed = 0usize;
        for entity_id in &ids {
            let previous = match self.store.entity_last_synced(entity_id).await {
                Ok(ts) => ts,
                Err(e) => {
                    warn!(entity_id = %entity_id, error = %e, "sweep read failed; skipping");
                    continue;
                }
            };
            match self
                .store
                .try_claim_refresh(entity_id, None, now, cutoff)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(entity_id = %entity_id, "claimed elsewhere; skipping");
                    continue;
                }
                Err(e) => {
                    warn!(entity_id = %entity_id, error = %e, "sweep claim failed; skipping");
                    continue;
                }
            }
            match self.refresh_claimed(entity_id, None).await {
                Ok(_) => refreshed += 1,
                Err(e) => {
                    warn!(entity_id = %entity_id, error = %e, "sweep refresh failed");
                    if let Err(release_err) =
                        self.store.release_claim(entity_id, now, previous).await
                    {
                        warn!(entity_id = %entity_id, error = %release_err, "could not hand back refresh claim");
                    }
                }
            }
        }
        info!(candidates = ids.len(), refreshed, "stale sweep finished");
        Ok(refreshed)
    }
}
