use crate::util::env::{env_opt, env_parse};

/// Knobs for the reconciliation layer. Defaults match the production app.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Staleness window for the freshness gate, in days.
    pub stale_days: i64,
    /// Fan-out bound for query-driven warming.
    pub warm_max_entities: usize,
    /// Staleness threshold for the scheduled sweep, in hours.
    pub sweep_stale_hours: i64,
    pub sweep_limit: i64,
    pub refresh_queue_capacity: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            stale_days: 14,
            warm_max_entities: 10,
            sweep_stale_hours: 24,
            sweep_limit: 200,
            refresh_queue_capacity: 256,
        }
    }
}

/// A century; anything longer is a typo and would overflow date arithmetic.
const MAX_STALE_DAYS: i64 = 36_500;
const MAX_SWEEP_STALE_HOURS: i64 = MAX_STALE_DAYS * 24;

impl SyncSettings {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            stale_days: env_parse("CATALOG_STALE_DAYS", d.stale_days),
            warm_max_entities: env_parse("CATALOG_WARM_MAX_ENTITIES", d.warm_max_entities),
            sweep_stale_hours: env_parse("CATALOG_SWEEP_STALE_HOURS", d.sweep_stale_hours),
            sweep_limit: env_parse("CATALOG_SWEEP_LIMIT", d.sweep_limit),
            refresh_queue_capacity: env_parse(
                "CATALOG_REFRESH_QUEUE_CAPACITY",
                d.refresh_queue_capacity,
            ),
        }
        .bounded()
    }

    /// Pull every knob into its usable range.
    pub fn bounded(self) -> Self {
        Self {
            stale_days: self.stale_days.clamp(0, MAX_STALE_DAYS),
            sweep_stale_hours: self.sweep_stale_hours.clamp(0, MAX_SWEEP_STALE_HOURS),
            sweep_limit: self.sweep_limit.max(0),
            refresh_queue_capacity: self.refresh_queue_capacity.max(1),
            ..self
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScryfallOptions {
    pub base_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Minimum spacing between upstream requests; Scryfall asks for 50-100ms.
    pub min_interval_ms: u64,
}

impl Default for ScryfallOptions {
    fn default() -> Self {
        Self {
            base_url: "https://api.scryfall.com".to_string(),
            timeout_secs: 20,
            user_agent: concat!("binder-catalog-sync/", env!("CARGO_PKG_VERSION")).to_string(),
            min_interval_ms: 100,
        }
    }
}

impl ScryfallOptions {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            base_url: env_opt("SCRYFALL_BASE_URL").unwrap_or(d.base_url),
            timeout_secs: env_parse("SCRYFALL_TIMEOUT_SECS", d.timeout_secs).max(1),
            user_agent: env_opt("SCRYFALL_USER_AGENT").unwrap_or(d.user_agent),
            min_interval_ms: env_parse("SCRYFALL_MIN_INTERVAL_MS", d.min_interval_ms),
        }
    }
}
