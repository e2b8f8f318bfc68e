use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::config::ScryfallOptions;
use crate::database_ops::catalog::upstream::{
    CatalogUpstream, SearchOutcome, SearchPage, SearchRequest, UpstreamCard,
};

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

/// Scryfall card catalog client.
/// Public API (base): https://api.scryfall.com/
///
/// Endpoints used:
/// - GET /cards/search?q=...&unique=prints&order=released&dir=desc - paged print search
/// - GET /cards/named?fuzzy=... - best single-card match
/// - GET /sets/{code} - set metadata (icon_svg_uri)
#[derive(Debug)]
pub struct ScryfallProvider {
    base_url: String,
    http: Client,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

#[derive(Debug, Deserialize)]
struct SetObject {
    #[serde(default)]
    icon_svg_uri: Option<String>,
}

impl ScryfallProvider {
    pub fn new(opts: &ScryfallOptions) -> Result<Self> {
        let http = Client::builder()
            .user_agent(opts.user_agent.as_str())
            .timeout(Duration::from_secs(opts.timeout_secs))
            .build()
            .context("build scryfall http client")?;

        Ok(Self {
            base_url: opts.base_url.trim_end_matches('/').to_string(),
            http,
            min_interval: Duration::from_millis(opts.min_interval_ms),
            last_request: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Spaces requests at least `min_interval` apart across all callers sharing this client.
    async fn pace(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn search_url(&self, request: &SearchRequest) -> Result<url::Url> {
        match request {
            SearchRequest::Query(q) => {
                let mut url = url::Url::parse(&format!("{}/cards/search", self.base_url))?;
                url.query_pairs_mut()
                    .append_pair("q", q)
                    .append_pair("unique", "prints")
                    .append_pair("order", "released")
                    .append_pair("dir", "desc")
                    .append_pair("include_extras", "false")
                    .append_pair("include_variations", "false");
                Ok(url)
            }
            SearchRequest::NextPage(next) => {
                url::Url::parse(next).with_context(|| format!("invalid next_page url {next}"))
            }
        }
    }

    async fn get(&self, url: url::Url) -> Result<reqwest::Response> {
        self.pace().await;
        let resp = self
            .http
            .get(url.clone())
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        Ok(resp)
    }

    async fn error_for(resp: reqwest::Response, what: &str) -> anyhow::Error {
        let status = resp.status();
        let url = resp.url().to_string();
        let body = truncate_for_log(resp.text().await.unwrap_or_default(), 2000);
        anyhow!("scryfall {what} failed: {status} url={url} body={body}")
    }
}

#[async_trait]
impl CatalogUpstream for ScryfallProvider {
    #[instrument(skip(self))]
    async fn search(&self, request: &SearchRequest) -> Result<SearchOutcome> {
        let url = self.search_url(request)?;
        let resp = self.get(url).await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            debug!("scryfall search returned 404");
            return Ok(SearchOutcome::NotFound);
        }
        if !status.is_success() {
            return Err(Self::error_for(resp, "search").await);
        }
        let page: SearchPage = resp.json().await.context("decode scryfall search page")?;
        debug!(
            cards = page.data.len(),
            has_more = page.has_more,
            "scryfall search page"
        );
        Ok(SearchOutcome::Page(page))
    }

    #[instrument(skip(self))]
    async fn named_fuzzy(&self, name: &str) -> Result<Option<UpstreamCard>> {
        let mut url = url::Url::parse(&format!("{}/cards/named", self.base_url))?;
        url.query_pairs_mut().append_pair("fuzzy", name);
        let resp = self.get(url).await?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Self::error_for(resp, "named lookup").await);
        }
        let card: UpstreamCard = resp.json().await.context("decode scryfall card")?;
        Ok(Some(card))
    }

    #[instrument(skip(self))]
    async fn set_icon_uri(&self, set_code: &str) -> Result<Option<String>> {
        let url = url::Url::parse(&format!(
            "{}/sets/{}",
            self.base_url,
            urlencode_path(set_code)
        ))?;
        let resp = self.get(url).await?;
        if !resp.status().is_success() {
            return Err(Self::error_for(resp, "set lookup").await);
        }
        let set: SetObject = resp.json().await.context("decode scryfall set")?;
        Ok(set.icon_svg_uri.filter(|s| !s.trim().is_empty()))
    }
}

/// Set codes are short alphanumerics, but promo codes can carry odd characters.
fn urlencode_path(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}
