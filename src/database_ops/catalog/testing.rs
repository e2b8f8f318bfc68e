//! In-memory `CatalogStore` and scripted `CatalogUpstream` used by the unit tests.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use super::model::{
    CatalogPrint, EntityMetadata, Finish, ListingPriceInput, PriceSnapshot, RepriceScope,
};
use super::store::CatalogStore;
use super::upstream::{CatalogUpstream, SearchOutcome, SearchPage, SearchRequest, UpstreamCard};
use super::CatalogSync;
use crate::config::SyncSettings;
use crate::database_ops::catalog::set_icons::SetIconCache;

pub fn card(id: &str, oracle_id: &str, name: &str, set: &str) -> UpstreamCard {
    serde_json::from_value(json!({
        "id": id,
        "oracle_id": oracle_id,
        "name": name,
        "set": set.to_ascii_lowercase(),
        "collector_number": "1",
        "image_uris": {"small": format!("https://img.test/{id}/small.jpg"), "normal": format!("https://img.test/{id}/normal.jpg")},
        "tcgplayer_id": 1000,
        "released_at": "2020-01-01",
        "prices": {"usd": "0.50", "usd_foil": "2.00", "usd_etched": null}
    }))
    .expect("fixture card")
}

pub fn print_with_prices(print_id: &str, entity_id: &str, prices: PriceSnapshot) -> CatalogPrint {
    let now = Utc::now();
    CatalogPrint {
        print_id: print_id.to_string(),
        entity_id: entity_id.to_string(),
        name: format!("Card {entity_id}"),
        set_code: "TST".to_string(),
        collector_number: "1".to_string(),
        image_small: None,
        image_normal: None,
        product_id: None,
        prices,
        prices_updated_at: now,
        set_icon_uri: None,
        released_at: None,
        synced_at: now,
        updated_at: now,
    }
}

/// Upstream double. Queries map to a list of pages; `next_page` URLs encode the page index.
#[derive(Default)]
pub struct ScriptedUpstream {
    pages: HashMap<String, Vec<Vec<UpstreamCard>>>,
    fail_on_page: HashMap<String, usize>,
    set_icons: HashMap<String, String>,
    named: HashMap<String, UpstreamCard>,
    search_calls: AtomicUsize,
    set_calls: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<SearchRequest>>,
}

const NEXT_PAGE_BASE: &str = "https://upstream.test/cards/search";

impl ScriptedUpstream {
    pub fn with_pages(mut self, query: &str, pages: Vec<Vec<UpstreamCard>>) -> Self {
        self.pages.insert(query.to_string(), pages);
        self
    }

    pub fn with_entity_pages(self, entity_id: &str, pages: Vec<Vec<UpstreamCard>>) -> Self {
        self.with_pages(&format!("oracleid:{entity_id}"), pages)
    }

    /// Page `index` (0-based) of `query` answers with a server error.
    pub fn with_failure_on_page(mut self, query: &str, index: usize) -> Self {
        self.fail_on_page.insert(query.to_string(), index);
        self
    }

    pub fn with_set_icon(mut self, code: &str, uri: &str) -> Self {
        self.set_icons
            .insert(code.to_ascii_lowercase(), uri.to_string());
        self
    }

    pub fn with_named(mut self, name: &str, card: UpstreamCard) -> Self {
        self.named.insert(name.to_ascii_lowercase(), card);
        self
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self, code: &str) -> usize {
        let calls = self.set_calls.lock().unwrap();
        calls.get(code).copied().unwrap_or(0)
    }

    pub fn total_set_calls(&self) -> usize {
        self.set_calls.lock().unwrap().values().sum()
    }

    pub fn requests(&self) -> Vec<SearchRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn locate(request: &SearchRequest) -> Result<(String, usize)> {
        match request {
            SearchRequest::Query(q) => Ok((q.clone(), 0)),
            SearchRequest::NextPage(raw) => {
                let url = url::Url::parse(raw)?;
                let mut q = None;
                let mut page = None;
                for (k, v) in url.query_pairs() {
                    match k.as_ref() {
                        "q" => q = Some(v.into_owned()),
                        "page" => page = v.parse::<usize>().ok(),
                        _ => {}
                    }
                }
                match (q, page) {
                    (Some(q), Some(page)) => Ok((q, page)),
                    _ => bail!("unexpected next_page url {raw}"),
                }
            }
        }
    }
}

#[async_trait]
impl CatalogUpstream for ScriptedUpstream {
    async fn search(&self, request: &SearchRequest) -> Result<SearchOutcome> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let (query, index) = Self::locate(request)?;
        if self.fail_on_page.get(&query) == Some(&index) {
            bail!("upstream search failed: 500 Internal Server Error q={query} page={index}");
        }
        let Some(pages) = self.pages.get(&query) else {
            return Ok(SearchOutcome::NotFound);
        };
        let data = pages.get(index).cloned().unwrap_or_default();
        let has_more = index + 1 < pages.len();
        let next_page = has_more.then(|| {
            let mut url = url::Url::parse(NEXT_PAGE_BASE).expect("static url");
            url.query_pairs_mut()
                .append_pair("q", &query)
                .append_pair("page", &(index + 1).to_string());
            url.to_string()
        });
        Ok(SearchOutcome::Page(SearchPage {
            data,
            has_more,
            next_page,
        }))
    }

    async fn named_fuzzy(&self, name: &str) -> Result<Option<UpstreamCard>> {
        Ok(self.named.get(&name.to_ascii_lowercase()).cloned())
    }

    async fn set_icon_uri(&self, set_code: &str) -> Result<Option<String>> {
        *self
            .set_calls
            .lock()
            .unwrap()
            .entry(set_code.to_string())
            .or_insert(0) += 1;
        match self.set_icons.get(set_code) {
            Some(uri) => Ok(Some(uri.clone())),
            None => Err(anyhow!("scryfall set lookup failed: 404 Not Found")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemListing {
    pub id: String,
    pub binder_id: String,
    pub print_id: String,
    pub finish: Finish,
    pub auto_priced: bool,
    pub multiplier: Option<f64>,
    pub computed_price: Option<f64>,
    pub last_priced_at: Option<DateTime<Utc>>,
}

impl MemListing {
    pub fn auto(id: &str, binder_id: &str, print_id: &str, finish: Finish) -> Self {
        Self {
            id: id.to_string(),
            binder_id: binder_id.to_string(),
            print_id: print_id.to_string(),
            finish,
            auto_priced: true,
            multiplier: None,
            computed_price: None,
            last_priced_at: None,
        }
    }
}

#[derive(Default)]
struct MemState {
    entities: HashMap<String, EntityMetadata>,
    prints: BTreeMap<String, CatalogPrint>,
    listings: Vec<MemListing>,
    lease_attempts: usize,
    listing_updates: usize,
    fail_reads: bool,
    fail_upserts: bool,
    failing_listing: Option<String>,
}

/// Mirrors the Postgres store's semantics closely enough to pin the gate's behavior.
#[derive(Default)]
pub struct MemoryCatalogStore {
    state: Mutex<MemState>,
}

impl MemoryCatalogStore {
    pub fn seed_entity(&self, entity_id: &str, last_synced_at: Option<DateTime<Utc>>) {
        let mut s = self.state.lock().unwrap();
        s.entities.insert(
            entity_id.to_string(),
            EntityMetadata {
                entity_id: entity_id.to_string(),
                display_name: None,
                print_count: 0,
                last_synced_at,
            },
        );
    }

    pub fn seed_print(&self, print: CatalogPrint) {
        let mut s = self.state.lock().unwrap();
        s.entities
            .entry(print.entity_id.clone())
            .or_insert_with(|| EntityMetadata {
                entity_id: print.entity_id.clone(),
                display_name: None,
                print_count: 0,
                last_synced_at: None,
            });
        s.prints.insert(print.print_id.clone(), print);
    }

    pub fn seed_listing(&self, listing: MemListing) {
        self.state.lock().unwrap().listings.push(listing);
    }

    pub fn fail_reads(&self) {
        self.state.lock().unwrap().fail_reads = true;
    }

    pub fn fail_upserts(&self) {
        self.state.lock().unwrap().fail_upserts = true;
    }

    pub fn fail_listing_update(&self, listing_id: &str) {
        self.state.lock().unwrap().failing_listing = Some(listing_id.to_string());
    }

    pub fn entity(&self, entity_id: &str) -> Option<EntityMetadata> {
        self.state.lock().unwrap().entities.get(entity_id).cloned()
    }

    pub fn prints(&self) -> Vec<CatalogPrint> {
        self.state.lock().unwrap().prints.values().cloned().collect()
    }

    pub fn listing(&self, id: &str) -> Option<MemListing> {
        let s = self.state.lock().unwrap();
        s.listings.iter().find(|l| l.id == id).cloned()
    }

    pub fn lease_attempts(&self) -> usize {
        self.state.lock().unwrap().lease_attempts
    }

    pub fn listing_updates(&self) -> usize {
        self.state.lock().unwrap().listing_updates
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn entity_last_synced(&self, entity_id: &str) -> Result<Option<DateTime<Utc>>> {
        let s = self.state.lock().unwrap();
        if s.fail_reads {
            bail!("connection reset by peer");
        }
        Ok(s.entities.get(entity_id).and_then(|e| e.last_synced_at))
    }

    async fn try_claim_refresh(
        &self,
        entity_id: &str,
        hint_name: Option<&str>,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> Result<bool> {
        let mut s = self.state.lock().unwrap();
        s.lease_attempts += 1;
        let entry = s
            .entities
            .entry(entity_id.to_string())
            .or_insert_with(|| EntityMetadata {
                entity_id: entity_id.to_string(),
                display_name: hint_name.map(str::to_string),
                print_count: 0,
                last_synced_at: None,
            });
        match entry.last_synced_at {
            Some(ts) if ts > cutoff => Ok(false),
            _ => {
                entry.last_synced_at = Some(now);
                if entry.display_name.is_none() {
                    entry.display_name = hint_name.map(str::to_string);
                }
                Ok(true)
            }
        }
    }

    async fn release_claim(
        &self,
        entity_id: &str,
        claimed_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if let Some(e) = s.entities.get_mut(entity_id) {
            if e.last_synced_at == Some(claimed_at) {
                e.last_synced_at = previous;
            }
        }
        Ok(())
    }

    async fn upsert_prints(&self, prints: &[CatalogPrint]) -> Result<u64> {
        let mut s = self.state.lock().unwrap();
        if s.fail_upserts {
            bail!("duplicate key value violates unique constraint");
        }
        for p in prints {
            s.entities
                .entry(p.entity_id.clone())
                .or_insert_with(|| EntityMetadata {
                    entity_id: p.entity_id.clone(),
                    display_name: None,
                    print_count: 0,
                    last_synced_at: None,
                });
            s.prints.insert(p.print_id.clone(), p.clone());
        }
        Ok(prints.len() as u64)
    }

    async fn refresh_entity_metadata(
        &self,
        entity_id: &str,
        hint_name: Option<&str>,
        synced_at: DateTime<Utc>,
    ) -> Result<EntityMetadata> {
        let mut s = self.state.lock().unwrap();
        let count = s
            .prints
            .values()
            .filter(|p| p.entity_id == entity_id)
            .count() as i64;
        let first_name = s
            .prints
            .values()
            .find(|p| p.entity_id == entity_id)
            .map(|p| p.name.clone());
        let entry = s
            .entities
            .entry(entity_id.to_string())
            .or_insert_with(|| EntityMetadata {
                entity_id: entity_id.to_string(),
                display_name: None,
                print_count: 0,
                last_synced_at: None,
            });
        entry.print_count = count;
        if entry.display_name.is_none() {
            entry.display_name = hint_name.map(str::to_string).or(first_name);
        }
        entry.last_synced_at = Some(synced_at);
        Ok(entry.clone())
    }

    async fn stale_entity_ids(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<String>> {
        let s = self.state.lock().unwrap();
        let mut stale: Vec<&EntityMetadata> = s
            .entities
            .values()
            .filter(|e| e.last_synced_at.map_or(true, |ts| ts <= cutoff))
            .collect();
        stale.sort_by_key(|e| (e.last_synced_at.is_some(), e.last_synced_at));
        Ok(stale
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|e| e.entity_id.clone())
            .collect())
    }

    async fn prints_for_entity(&self, entity_id: &str) -> Result<Vec<CatalogPrint>> {
        let s = self.state.lock().unwrap();
        if s.fail_reads {
            bail!("connection reset by peer");
        }
        Ok(s.prints
            .values()
            .filter(|p| p.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn auto_priced_listings(&self, scope: &RepriceScope) -> Result<Vec<ListingPriceInput>> {
        let s = self.state.lock().unwrap();
        let ids: Option<HashSet<&String>> = scope.listing_ids.as_ref().map(|v| v.iter().collect());
        Ok(s.listings
            .iter()
            .filter(|l| l.auto_priced)
            .filter(|l| scope.binder_id.as_ref().map_or(true, |b| &l.binder_id == b))
            .filter(|l| ids.as_ref().map_or(true, |ids| ids.contains(&l.id)))
            .map(|l| ListingPriceInput {
                listing_id: l.id.clone(),
                print_id: l.print_id.clone(),
                finish: l.finish,
                multiplier: l.multiplier,
            })
            .collect())
    }

    async fn print_prices(&self, print_ids: &[String]) -> Result<HashMap<String, PriceSnapshot>> {
        let s = self.state.lock().unwrap();
        Ok(print_ids
            .iter()
            .filter_map(|id| s.prints.get(id).map(|p| (id.clone(), p.prices)))
            .collect())
    }

    async fn update_listing_price(
        &self,
        listing_id: &str,
        computed_price: f64,
        priced_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut s = self.state.lock().unwrap();
        if s.failing_listing.as_deref() == Some(listing_id) {
            bail!("update price for listing {listing_id}: statement timeout");
        }
        s.listing_updates += 1;
        if let Some(l) = s.listings.iter_mut().find(|l| l.id == listing_id) {
            l.computed_price = Some(computed_price);
            l.last_priced_at = Some(priced_at);
        }
        Ok(())
    }
}

/// Wires the fakes into a `CatalogSync` with a private icon cache.
pub fn harness(
    store: &Arc<MemoryCatalogStore>,
    upstream: &Arc<ScriptedUpstream>,
) -> CatalogSync {
    CatalogSync::new(
        store.clone(),
        upstream.clone(),
        Arc::new(SetIconCache::new()),
        SyncSettings::default(),
    )
}
