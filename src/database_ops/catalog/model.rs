use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Physical treatment of a print. Each finish is priced independently upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Finish {
    Nonfoil,
    Foil,
    /// Alternate foil treatment; upstream calls it "etched".
    Etched,
}

impl Finish {
    /// Unknown values fall back to nonfoil, matching how listings are created.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "foil" => Finish::Foil,
            "etched" | "alt-foil" | "alt_foil" => Finish::Etched,
            _ => Finish::Nonfoil,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Finish::Nonfoil => "nonfoil",
            Finish::Foil => "foil",
            Finish::Etched => "etched",
        }
    }
}

/// Upstream price columns for one print, in USD.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub usd: Option<f64>,
    pub usd_foil: Option<f64>,
    pub usd_etched: Option<f64>,
}

fn usable(p: Option<f64>) -> Option<f64> {
    p.filter(|v| v.is_finite() && *v > 0.0)
}

impl PriceSnapshot {
    /// Price for `finish`, walking etched -> foil -> nonfoil when a tier is missing.
    pub fn unit_price(&self, finish: Finish) -> Option<f64> {
        let base = usable(self.usd);
        let foil = usable(self.usd_foil);
        match finish {
            Finish::Nonfoil => base,
            Finish::Foil => foil.or(base),
            Finish::Etched => usable(self.usd_etched).or(foil).or(base),
        }
    }
}

/// One printing of an oracle card as stored locally.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogPrint {
    pub print_id: String,
    pub entity_id: String,
    pub name: String,
    pub set_code: String,
    pub collector_number: String,
    pub image_small: Option<String>,
    pub image_normal: Option<String>,
    pub product_id: Option<i64>,
    pub prices: PriceSnapshot,
    pub prices_updated_at: DateTime<Utc>,
    pub set_icon_uri: Option<String>,
    pub released_at: Option<NaiveDate>,
    pub synced_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityMetadata {
    pub entity_id: String,
    pub display_name: Option<String>,
    pub print_count: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Narrowing for a reprice run. Both fields unset means every auto-priced listing.
#[derive(Debug, Clone, Default)]
pub struct RepriceScope {
    pub binder_id: Option<String>,
    pub listing_ids: Option<Vec<String>>,
}

/// What the repricer needs from an auto-priced binder listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingPriceInput {
    pub listing_id: String,
    pub print_id: String,
    pub finish: Finish,
    pub multiplier: Option<f64>,
}
