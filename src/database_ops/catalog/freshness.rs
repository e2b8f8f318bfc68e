use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use tracing::{debug, info, instrument, warn};

use super::CatalogSync;

/// What `ensure_fresh` did. Only `Refreshed` touched upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Blank entity id.
    Skipped,
    /// Synced within the staleness window.
    Fresh,
    /// Another caller claimed the refresh first.
    LeaseHeld,
    /// Storage could not be read or claimed; stale data is served instead.
    ReadFailed,
    Refreshed { print_count: i64 },
}

/// Rows synced at or before the returned instant are stale.
///
/// `window` is `None` when the configured window does not fit in a `Duration`.
/// Windows reaching past the epoch clamp to it, so only never-synced rows qualify.
pub fn stale_cutoff(now: DateTime<Utc>, window: Option<Duration>) -> DateTime<Utc> {
    window
        .and_then(|w| now.checked_sub_signed(w))
        .map_or(DateTime::<Utc>::UNIX_EPOCH, |c| c.max(DateTime::<Utc>::UNIX_EPOCH))
}

/// Stale when at least `stale_days` have passed since the last sync.
pub fn is_stale(
    last_synced_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    stale_days: i64,
) -> bool {
    let cutoff = stale_cutoff(now, Duration::try_days(stale_days));
    last_synced_at.map_or(true, |ts| ts <= cutoff)
}

impl CatalogSync {
    /// Refresh `entity_id` if its prints are stale and nobody else is already doing it.
    ///
    /// Uses the configured staleness window; see `ensure_fresh_within` for an explicit one.
    pub async fn ensure_fresh(
        &self,
        entity_id: &str,
        hint_name: Option<&str>,
    ) -> Result<RefreshOutcome> {
        self.ensure_fresh_within(entity_id, hint_name, self.settings.stale_days)
            .await
    }

    /// Storage read and claim failures fail open (`ReadFailed`). Crawl and metadata
    /// failures propagate, after the claim is handed back so the entity is retried.
    #[instrument(skip(self, hint_name), fields(entity_id = %entity_id))]
    pub async fn ensure_fresh_within(
        &self,
        entity_id: &str,
        hint_name: Option<&str>,
        stale_days: i64,
    ) -> Result<RefreshOutcome> {
        let entity_id = entity_id.trim();
        if entity_id.is_empty() {
            return Ok(RefreshOutcome::Skipped);
        }
        let hint_name = hint_name.map(str::trim).filter(|s| !s.is_empty());
        // Postgres keeps microseconds; the claim timestamp must round-trip exactly.
        let now = Utc::now().trunc_subsecs(6);

        let last_synced = match self.store.entity_last_synced(entity_id).await {
            Ok(ts) => ts,
            Err(e) => {
                warn!(error = %e, "freshness read failed; serving cached data");
                return Ok(RefreshOutcome::ReadFailed);
            }
        };
        if !is_stale(last_synced, now, stale_days) {
            return Ok(RefreshOutcome::Fresh);
        }

        let cutoff = stale_cutoff(now, Duration::try_days(stale_days));
        match self
            .store
            .try_claim_refresh(entity_id, hint_name, now, cutoff)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("refresh already claimed");
                return Ok(RefreshOutcome::LeaseHeld);
            }
            Err(e) => {
                warn!(error = %e, "refresh claim failed; serving cached data");
                return Ok(RefreshOutcome::ReadFailed);
            }
        }

        match self.refresh_claimed(entity_id, hint_name).await {
            Ok(print_count) => Ok(RefreshOutcome::Refreshed { print_count }),
            Err(e) => {
                if let Err(release_err) = self
                    .store
                    .release_claim(entity_id, now, last_synced)
                    .await
                {
                    warn!(error = %release_err, "could not hand back refresh claim");
                }
                Err(e)
            }
        }
    }

    /// Crawl then stamp metadata. Caller must hold the claim.
    pub(crate) async fn refresh_claimed(
        &self,
        entity_id: &str,
        hint_name: Option<&str>,
    ) -> Result<i64> {
        let crawled = self.crawl_prints(entity_id).await?;
        let meta = self
            .store
            .refresh_entity_metadata(entity_id, hint_name, Utc::now().trunc_subsecs(6))
            .await
            .with_context(|| format!("refresh metadata for {entity_id}"))?;
        info!(
            entity_id,
            crawled,
            print_count = meta.print_count,
            "entity refreshed"
        );
        Ok(meta.print_count)
    }
}
