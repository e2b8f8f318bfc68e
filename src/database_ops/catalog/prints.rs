use std::collections::{BTreeSet, HashSet};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::model::{CatalogPrint, PriceSnapshot};
use super::upstream::{SearchOutcome, SearchRequest, UpstreamCard};
use super::CatalogSync;

fn value_as_f64(v: &Value) -> Option<f64> {
    if let Some(n) = v.as_f64() {
        return Some(n);
    }
    if let Some(s) = v.as_str() {
        return s.trim().parse::<f64>().ok();
    }
    None
}

fn collector_number_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Map an upstream print onto the local row shape. `set_icon_uri` is filled later.
pub fn normalize_print(card: &UpstreamCard, entity_id: &str, now: DateTime<Utc>) -> CatalogPrint {
    let prices = card.prices.as_ref();
    let parse = |v: Option<&Value>| v.and_then(value_as_f64);
    let images = card.images();

    CatalogPrint {
        print_id: card.id.clone(),
        entity_id: entity_id.to_string(),
        name: card.name.clone(),
        set_code: card.set.trim().to_ascii_uppercase(),
        collector_number: collector_number_string(&card.collector_number),
        image_small: images.and_then(|i| i.small.clone()),
        image_normal: images.and_then(|i| i.normal.clone()),
        product_id: card.tcgplayer_id,
        prices: PriceSnapshot {
            usd: parse(prices.and_then(|p| p.usd.as_ref())),
            usd_foil: parse(prices.and_then(|p| p.usd_foil.as_ref())),
            usd_etched: parse(prices.and_then(|p| p.usd_etched.as_ref())),
        },
        prices_updated_at: now,
        set_icon_uri: None,
        released_at: card.released_at,
        synced_at: now,
        updated_at: now,
    }
}

impl CatalogSync {
    /// Fetch every printing of `entity_id` from upstream and upsert them in one batch.
    ///
    /// A 404 from the search means the entity has no prints and is not an error.
    /// Any other upstream failure aborts before anything is written.
    #[instrument(skip(self), fields(entity_id = %entity_id))]
    pub async fn crawl_prints(&self, entity_id: &str) -> Result<usize> {
        let now = Utc::now();
        let mut next = Some(SearchRequest::for_entity(entity_id));
        let mut prints: Vec<CatalogPrint> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut pages = 0usize;

        while let Some(request) = next.take() {
            let outcome = self
                .upstream
                .search(&request)
                .await
                .with_context(|| format!("crawl prints for {entity_id} (page {})", pages + 1))?;
            pages += 1;
            let page = match outcome {
                SearchOutcome::Page(page) => page,
                SearchOutcome::NotFound => {
                    debug!(pages, "upstream has no prints for entity");
                    break;
                }
            };
            for card in &page.data {
                // Reprint pages can overlap when upstream data shifts mid-crawl.
                if seen.insert(card.id.clone()) {
                    prints.push(normalize_print(card, entity_id, now));
                }
            }
            next = page.next_request();
        }

        if prints.is_empty() {
            info!(pages, "crawl finished with no prints");
            return Ok(0);
        }

        let set_codes: BTreeSet<&str> = prints.iter().map(|p| p.set_code.as_str()).collect();
        let icons = self.resolve_icons(set_codes).await;
        for p in &mut prints {
            p.set_icon_uri = icons.get(&p.set_code).cloned().flatten();
        }

        self.store
            .upsert_prints(&prints)
            .await
            .with_context(|| format!("upsert {} prints for {entity_id}", prints.len()))?;
        info!(pages, prints = prints.len(), "prints crawled");
        Ok(prints.len())
    }
}
