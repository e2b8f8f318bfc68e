use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use super::upstream::{SearchOutcome, SearchRequest};
use super::CatalogSync;

/// Insertion-ordered set of discovered entities, capped at `max`.
struct Discovered {
    max: usize,
    order: Vec<(String, String)>,
    seen: HashSet<String>,
}

impl Discovered {
    fn new(max: usize) -> Self {
        Self {
            max,
            order: Vec::with_capacity(max),
            seen: HashSet::with_capacity(max),
        }
    }

    fn is_full(&self) -> bool {
        self.order.len() >= self.max
    }

    /// First display name wins.
    fn offer(&mut self, entity_id: &str, name: &str) {
        if self.is_full() || entity_id.is_empty() || self.seen.contains(entity_id) {
            return;
        }
        self.seen.insert(entity_id.to_string());
        self.order.push((entity_id.to_string(), name.to_string()));
    }
}

impl CatalogSync {
    /// Discover up to `max_entities` oracle ids matching a free-text query and run
    /// each through the freshness gate, one at a time.
    ///
    /// Discovery errors stop pagination; gate failures are logged and skipped.
    #[instrument(skip(self))]
    pub async fn warm_for_query(&self, query: &str, max_entities: usize) -> Vec<String> {
        let query = query.trim();
        if query.is_empty() || max_entities == 0 {
            return Vec::new();
        }

        let mut found = Discovered::new(max_entities);
        let mut next = Some(SearchRequest::free_text(query));
        while let Some(request) = next.take() {
            let page = match self.upstream.search(&request).await {
                Ok(SearchOutcome::Page(page)) => page,
                Ok(SearchOutcome::NotFound) => {
                    debug!("no upstream matches");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "discovery search failed; stopping");
                    break;
                }
            };
            for card in &page.data {
                if let Some(entity_id) = card.entity_id() {
                    found.offer(entity_id, &card.name);
                }
            }
            if found.is_full() {
                break;
            }
            next = page.next_request();
        }

        for (entity_id, name) in &found.order {
            if let Err(e) = self.ensure_fresh(entity_id, Some(name)).await {
                warn!(entity_id = %entity_id, error = %e, "warm refresh failed");
            }
        }
        info!(discovered = found.order.len(), "query warmed");
        found.order.into_iter().map(|(id, _)| id).collect()
    }

    /// Resolve a card name with the upstream fuzzy lookup and make sure its oracle is fresh.
    ///
    /// `Ok(None)` when upstream does not recognise the name. A failed refresh is logged;
    /// the oracle id is still returned because cached prints may exist.
    #[instrument(skip(self))]
    pub async fn resolve_named(&self, name: &str) -> Result<Option<String>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let Some(card) = self
            .upstream
            .named_fuzzy(name)
            .await
            .with_context(|| format!("fuzzy lookup for {name:?}"))?
        else {
            debug!("no fuzzy match");
            return Ok(None);
        };
        let Some(entity_id) = card.entity_id().map(str::to_string) else {
            warn!(print_id = %card.id, "fuzzy match has no oracle id");
            return Ok(None);
        };
        if let Err(e) = self.ensure_fresh(&entity_id, Some(&card.name)).await {
            warn!(entity_id = %entity_id, error = %e, "named refresh failed");
        }
        Ok(Some(entity_id))
    }

    /// Warm by query; when that discovers nothing, treat the query as a card name.
    pub async fn warm_or_resolve(&self, query: &str, max_entities: usize) -> Vec<String> {
        let warmed = self.warm_for_query(query, max_entities).await;
        if !warmed.is_empty() {
            return warmed;
        }
        match self.resolve_named(query).await {
            Ok(found) => found.into_iter().collect(),
            Err(e) => {
                warn!(error = %e, "named fallback failed");
                Vec::new()
            }
        }
    }
}
