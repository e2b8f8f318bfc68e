use anyhow::{Context, Result};
use chrono::Utc;
use itertools::Itertools;
use serde::Serialize;
use tracing::{debug, info, instrument};

use super::model::{Finish, PriceSnapshot, RepriceScope};
use super::CatalogSync;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepriceSummary {
    pub considered: usize,
    pub updated: usize,
    /// Listings whose print has no usable price for any fallback finish.
    pub skipped: usize,
}

fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Listing price for one unit, or `None` when nothing usable is on file.
pub fn compute_price(
    prices: &PriceSnapshot,
    finish: Finish,
    multiplier: Option<f64>,
) -> Option<f64> {
    let unit = prices.unit_price(finish)?;
    let price = match multiplier.filter(|m| m.is_finite() && *m > 0.0) {
        Some(m) => unit * m,
        None => unit,
    };
    Some(round_cents(price))
}

impl CatalogSync {
    /// Recompute `computed_price` for auto-priced listings in `scope`.
    ///
    /// Prices come from the local mirror in one batched read. The first failed
    /// listing write aborts the run; earlier writes stay committed.
    #[instrument(skip(self))]
    pub async fn reprice(&self, scope: &RepriceScope) -> Result<RepriceSummary> {
        if matches!(&scope.listing_ids, Some(ids) if ids.is_empty()) {
            return Ok(RepriceSummary::default());
        }
        let listings = self
            .store
            .auto_priced_listings(scope)
            .await
            .context("select auto-priced listings")?;
        if listings.is_empty() {
            debug!("no auto-priced listings in scope");
            return Ok(RepriceSummary::default());
        }

        let print_ids: Vec<String> = listings
            .iter()
            .map(|l| l.print_id.clone())
            .unique()
            .collect();
        let prices = self
            .store
            .print_prices(&print_ids)
            .await
            .context("load print prices")?;

        let now = Utc::now();
        let mut summary = RepriceSummary {
            considered: listings.len(),
            ..Default::default()
        };
        for listing in &listings {
            let computed = prices
                .get(&listing.print_id)
                .and_then(|p| compute_price(p, listing.finish, listing.multiplier));
            let Some(computed) = computed else {
                debug!(listing_id = %listing.listing_id, print_id = %listing.print_id, "no usable price");
                summary.skipped += 1;
                continue;
            };
            self.store
                .update_listing_price(&listing.listing_id, computed, now)
                .await?;
            summary.updated += 1;
        }
        info!(
            considered = summary.considered,
            updated = summary.updated,
            skipped = summary.skipped,
            "listings repriced"
        );
        Ok(summary)
    }
}
