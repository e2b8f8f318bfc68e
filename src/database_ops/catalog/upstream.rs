use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;

/// One request against the paginated search endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchRequest {
    /// First page of a search; the provider adds `unique=prints&order=released&dir=desc`.
    Query(String),
    /// Absolute `next_page` URL handed back by the previous page.
    NextPage(String),
}

impl SearchRequest {
    pub fn for_entity(entity_id: &str) -> Self {
        SearchRequest::Query(format!("oracleid:{entity_id}"))
    }

    pub fn free_text(query: &str) -> Self {
        SearchRequest::Query(query.trim().to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub data: Vec<UpstreamCard>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_page: Option<String>,
}

impl SearchPage {
    /// Cursor for the following page, if upstream says there is one.
    pub fn next_request(&self) -> Option<SearchRequest> {
        if !self.has_more {
            return None;
        }
        self.next_page
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(|u| SearchRequest::NextPage(u.to_string()))
    }
}

#[derive(Debug, Clone)]
pub enum SearchOutcome {
    Page(SearchPage),
    /// 404: the query matched nothing. Not an error.
    NotFound,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageUris {
    #[serde(default)]
    pub small: Option<String>,
    #[serde(default)]
    pub normal: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CardFace {
    #[serde(default)]
    pub oracle_id: Option<String>,
    #[serde(default)]
    pub image_uris: Option<ImageUris>,
}

/// Prices arrive as decimal strings ("0.25") or null.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamPrices {
    #[serde(default)]
    pub usd: Option<Value>,
    #[serde(default)]
    pub usd_foil: Option<Value>,
    #[serde(default)]
    pub usd_etched: Option<Value>,
}

/// Print object as returned by the upstream card endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamCard {
    pub id: String,
    #[serde(default)]
    pub oracle_id: Option<String>,
    pub name: String,
    pub set: String,
    #[serde(default)]
    pub collector_number: Value,
    #[serde(default)]
    pub image_uris: Option<ImageUris>,
    #[serde(default)]
    pub card_faces: Vec<CardFace>,
    #[serde(default)]
    pub tcgplayer_id: Option<i64>,
    #[serde(default)]
    pub prices: Option<UpstreamPrices>,
    #[serde(default)]
    pub released_at: Option<NaiveDate>,
}

impl UpstreamCard {
    /// Reversible cards carry the oracle id on their faces only.
    pub fn entity_id(&self) -> Option<&str> {
        self.oracle_id
            .as_deref()
            .or_else(|| self.card_faces.iter().find_map(|f| f.oracle_id.as_deref()))
            .filter(|s| !s.trim().is_empty())
    }

    /// Top-level images, else the front face's (double-faced cards).
    pub fn images(&self) -> Option<&ImageUris> {
        self.image_uris
            .as_ref()
            .or_else(|| self.card_faces.iter().find_map(|f| f.image_uris.as_ref()))
    }
}

/// Upstream card catalog. `ScryfallProvider` is the HTTP implementation.
#[async_trait]
pub trait CatalogUpstream: Send + Sync {
    /// Non-success statuses other than 404 are errors.
    async fn search(&self, request: &SearchRequest) -> Result<SearchOutcome>;

    /// Best fuzzy match for a card name; `None` on 404.
    async fn named_fuzzy(&self, name: &str) -> Result<Option<UpstreamCard>>;

    /// Icon URI of a set, looked up by lower-case set code.
    async fn set_icon_uri(&self, set_code: &str) -> Result<Option<String>>;
}
