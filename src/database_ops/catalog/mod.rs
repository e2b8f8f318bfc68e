//! Local mirror of the upstream card catalog.
//!
//! Entities (oracle cards) are refreshed through a lease stored on
//! `catalog_entities.last_synced_at`; prints are crawled from the paginated
//! upstream search and batch-upserted; binder listings in auto-price mode are
//! repriced from the mirrored price columns.

pub mod freshness;
pub mod model;
pub mod prints;
pub mod read_path;
pub mod reprice;
pub mod set_icons;
pub mod store;
pub mod sweep;
pub mod upstream;
pub mod warmer;

#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashMap;
use std::sync::Arc;

pub use freshness::RefreshOutcome;
pub use model::{CatalogPrint, EntityMetadata, Finish, ListingPriceInput, PriceSnapshot, RepriceScope};
pub use reprice::RepriceSummary;
pub use set_icons::SetIconCache;
pub use store::{CatalogStore, PgCatalogStore};
pub use upstream::{CatalogUpstream, SearchOutcome, SearchPage, SearchRequest, UpstreamCard};

use anyhow::Result;

use crate::config::{ScryfallOptions, SyncSettings};
use crate::database_ops::db::Db;
use crate::database_ops::scryfall::ScryfallProvider;
use crate::util::env;

/// Entry point for every reconciliation operation. Cheap to clone.
#[derive(Clone)]
pub struct CatalogSync {
    store: Arc<dyn CatalogStore>,
    upstream: Arc<dyn CatalogUpstream>,
    icons: Arc<SetIconCache>,
    settings: SyncSettings,
}

impl CatalogSync {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        upstream: Arc<dyn CatalogUpstream>,
        icons: Arc<SetIconCache>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            upstream,
            icons,
            settings,
        }
    }

    /// Postgres store, Scryfall upstream and the process-wide icon memo, all from env.
    pub async fn connect_from_env(max_connections: u32) -> Result<Self> {
        let db = Db::connect(&env::db_url()?, max_connections).await?;
        let upstream = ScryfallProvider::new(&ScryfallOptions::from_env())?;
        Ok(Self::new(
            Arc::new(PgCatalogStore::new(db)),
            Arc::new(upstream),
            SetIconCache::global(),
            SyncSettings::from_env(),
        ))
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn store(&self) -> &dyn CatalogStore {
        self.store.as_ref()
    }

    /// Resolve set icons through the shared memo.
    pub async fn resolve_icons<I, S>(&self, set_codes: I) -> HashMap<String, Option<String>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.icons
            .resolve_icons(self.upstream.as_ref(), set_codes)
            .await
    }
}
