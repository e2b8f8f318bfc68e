use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, QueryBuilder, Row};
use tracing::{debug, instrument};

use super::model::{CatalogPrint, EntityMetadata, Finish, ListingPriceInput, PriceSnapshot, RepriceScope};
use crate::database_ops::db::Db;

/// Postgres caps a statement at 65535 bind parameters; 16 columns per print.
const UPSERT_CHUNK: usize = 1000;

/// Storage the reconciliation layer reads and mutates.
///
/// `try_claim_refresh` is the only operation that must be atomic: it is the
/// cross-process lease.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// `None` when the entity row is missing or has never been synced.
    async fn entity_last_synced(&self, entity_id: &str) -> Result<Option<DateTime<Utc>>>;

    /// Upsert the entity row and set `last_synced_at = now` only if it is null or
    /// `<= cutoff`. Returns whether this caller won the claim.
    async fn try_claim_refresh(
        &self,
        entity_id: &str,
        hint_name: Option<&str>,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> Result<bool>;

    /// Put `previous` back if the row still carries the claim made at `claimed_at`.
    async fn release_claim(
        &self,
        entity_id: &str,
        claimed_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// All-or-nothing batch upsert keyed by `print_id`. Returns rows written.
    async fn upsert_prints(&self, prints: &[CatalogPrint]) -> Result<u64>;

    /// Recount prints, fill the display name if missing, stamp `synced_at`.
    async fn refresh_entity_metadata(
        &self,
        entity_id: &str,
        hint_name: Option<&str>,
        synced_at: DateTime<Utc>,
    ) -> Result<EntityMetadata>;

    /// Never-synced first, then oldest.
    async fn stale_entity_ids(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<String>>;

    async fn prints_for_entity(&self, entity_id: &str) -> Result<Vec<CatalogPrint>>;

    async fn auto_priced_listings(&self, scope: &RepriceScope) -> Result<Vec<ListingPriceInput>>;

    async fn print_prices(&self, print_ids: &[String]) -> Result<HashMap<String, PriceSnapshot>>;

    async fn update_listing_price(
        &self,
        listing_id: &str,
        computed_price: f64,
        priced_at: DateTime<Utc>,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct PgCatalogStore {
    db: Db,
}

impl PgCatalogStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn print_from_row(r: &PgRow) -> Result<CatalogPrint> {
    Ok(CatalogPrint {
        print_id: r.try_get("print_id")?,
        entity_id: r.try_get("entity_id")?,
        name: r.try_get("name")?,
        set_code: r.try_get("set_code")?,
        collector_number: r.try_get("collector_number")?,
        image_small: r.try_get("image_small")?,
        image_normal: r.try_get("image_normal")?,
        product_id: r.try_get("product_id")?,
        prices: prices_from_row(r)?,
        prices_updated_at: r.try_get("prices_updated_at")?,
        set_icon_uri: r.try_get("set_icon_uri")?,
        released_at: r.try_get("released_at")?,
        synced_at: r.try_get("synced_at")?,
        updated_at: r.try_get("updated_at")?,
    })
}

fn prices_from_row(r: &PgRow) -> Result<PriceSnapshot> {
    Ok(PriceSnapshot {
        usd: r.try_get("price_usd")?,
        usd_foil: r.try_get("price_usd_foil")?,
        usd_etched: r.try_get("price_usd_etched")?,
    })
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    #[instrument(skip(self))]
    async fn entity_last_synced(&self, entity_id: &str) -> Result<Option<DateTime<Utc>>> {
        let ts: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
            "SELECT last_synced_at FROM catalog_entities WHERE entity_id = $1",
        )
        .bind(entity_id)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(ts.flatten())
    }

    #[instrument(skip(self))]
    async fn try_claim_refresh(
        &self,
        entity_id: &str,
        hint_name: Option<&str>,
        now: DateTime<Utc>,
        cutoff: DateTime<Utc>,
    ) -> Result<bool> {
        let claimed: Option<String> = sqlx::query_scalar(
            "INSERT INTO catalog_entities AS e (entity_id, display_name, last_synced_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (entity_id) DO UPDATE
                SET last_synced_at = EXCLUDED.last_synced_at,
                    display_name = COALESCE(e.display_name, EXCLUDED.display_name)
              WHERE e.last_synced_at IS NULL OR e.last_synced_at <= $4
             RETURNING e.entity_id",
        )
        .bind(entity_id)
        .bind(hint_name)
        .bind(now)
        .bind(cutoff)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(claimed.is_some())
    }

    #[instrument(skip(self))]
    async fn release_claim(
        &self,
        entity_id: &str,
        claimed_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE catalog_entities SET last_synced_at = $3
              WHERE entity_id = $1 AND last_synced_at = $2",
        )
        .bind(entity_id)
        .bind(claimed_at)
        .bind(previous)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, prints), fields(rows = prints.len()))]
    async fn upsert_prints(&self, prints: &[CatalogPrint]) -> Result<u64> {
        if prints.is_empty() {
            return Ok(0);
        }
        let mut tx = self.db.pool.begin().await?;

        // Prints reference their entity; a direct crawl may precede the first lease.
        let mut entity_ids: Vec<&str> = prints.iter().map(|p| p.entity_id.as_str()).collect();
        entity_ids.sort_unstable();
        entity_ids.dedup();
        sqlx::query(
            "INSERT INTO catalog_entities (entity_id)
             SELECT unnest($1::text[])
             ON CONFLICT (entity_id) DO NOTHING",
        )
        .bind(&entity_ids)
        .execute(&mut *tx)
        .await?;

        let mut written = 0u64;
        for chunk in prints.chunks(UPSERT_CHUNK) {
            let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
                "INSERT INTO catalog_prints (print_id, entity_id, name, set_code, collector_number, \
                 image_small, image_normal, product_id, price_usd, price_usd_foil, price_usd_etched, \
                 prices_updated_at, set_icon_uri, released_at, synced_at, updated_at) ",
            );
            qb.push_values(chunk, |mut b, p| {
                b.push_bind(&p.print_id)
                    .push_bind(&p.entity_id)
                    .push_bind(&p.name)
                    .push_bind(&p.set_code)
                    .push_bind(&p.collector_number)
                    .push_bind(&p.image_small)
                    .push_bind(&p.image_normal)
                    .push_bind(p.product_id)
                    .push_bind(p.prices.usd)
                    .push_bind(p.prices.usd_foil)
                    .push_bind(p.prices.usd_etched)
                    .push_bind(p.prices_updated_at)
                    .push_bind(&p.set_icon_uri)
                    .push_bind(p.released_at)
                    .push_bind(p.synced_at)
                    .push_bind(p.updated_at);
            });
            qb.push(
                " ON CONFLICT (print_id) DO UPDATE SET
                    entity_id = EXCLUDED.entity_id,
                    name = EXCLUDED.name,
                    set_code = EXCLUDED.set_code,
                    collector_number = EXCLUDED.collector_number,
                    image_small = EXCLUDED.image_small,
                    image_normal = EXCLUDED.image_normal,
                    product_id = EXCLUDED.product_id,
                    price_usd = EXCLUDED.price_usd,
                    price_usd_foil = EXCLUDED.price_usd_foil,
                    price_usd_etched = EXCLUDED.price_usd_etched,
                    prices_updated_at = EXCLUDED.prices_updated_at,
                    set_icon_uri = COALESCE(EXCLUDED.set_icon_uri, catalog_prints.set_icon_uri),
                    released_at = EXCLUDED.released_at,
                    synced_at = EXCLUDED.synced_at,
                    updated_at = EXCLUDED.updated_at",
            );
            let res = qb.build().persistent(false).execute(&mut *tx).await?;
            written += res.rows_affected();
        }
        tx.commit().await.context("commit print upsert")?;
        debug!(written, "prints upserted");
        Ok(written)
    }

    #[instrument(skip(self))]
    async fn refresh_entity_metadata(
        &self,
        entity_id: &str,
        hint_name: Option<&str>,
        synced_at: DateTime<Utc>,
    ) -> Result<EntityMetadata> {
        let row = sqlx::query(
            "INSERT INTO catalog_entities AS e (entity_id, display_name, print_count, last_synced_at)
             VALUES (
                $1,
                COALESCE($2, (SELECT p.name FROM catalog_prints p WHERE p.entity_id = $1
                              ORDER BY p.released_at DESC NULLS LAST, p.print_id LIMIT 1)),
                (SELECT count(*)::int FROM catalog_prints WHERE entity_id = $1),
                $3
             )
             ON CONFLICT (entity_id) DO UPDATE
                SET print_count = EXCLUDED.print_count,
                    display_name = COALESCE(e.display_name, EXCLUDED.display_name),
                    last_synced_at = EXCLUDED.last_synced_at
             RETURNING e.entity_id, e.display_name, e.print_count::int8 AS print_count, e.last_synced_at",
        )
        .bind(entity_id)
        .bind(hint_name)
        .bind(synced_at)
        .fetch_one(&self.db.pool)
        .await?;
        Ok(EntityMetadata {
            entity_id: row.try_get("entity_id")?,
            display_name: row.try_get("display_name")?,
            print_count: row.try_get("print_count")?,
            last_synced_at: row.try_get("last_synced_at")?,
        })
    }

    #[instrument(skip(self))]
    async fn stale_entity_ids(&self, cutoff: DateTime<Utc>, limit: i64) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar(
            "SELECT entity_id FROM catalog_entities
              WHERE last_synced_at IS NULL OR last_synced_at <= $1
              ORDER BY last_synced_at ASC NULLS FIRST
              LIMIT $2",
        )
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(ids)
    }

    #[instrument(skip(self))]
    async fn prints_for_entity(&self, entity_id: &str) -> Result<Vec<CatalogPrint>> {
        let rows = sqlx::query(
            "SELECT print_id, entity_id, name, set_code, collector_number, image_small, image_normal,
                    product_id, price_usd, price_usd_foil, price_usd_etched, prices_updated_at,
                    set_icon_uri, released_at, synced_at, updated_at
               FROM catalog_prints
              WHERE entity_id = $1
              ORDER BY released_at DESC NULLS LAST, set_code, collector_number",
        )
        .bind(entity_id)
        .fetch_all(&self.db.pool)
        .await?;
        rows.iter().map(print_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn auto_priced_listings(&self, scope: &RepriceScope) -> Result<Vec<ListingPriceInput>> {
        let rows = sqlx::query(
            "SELECT id, print_id, finish, price_multiplier::float8 AS price_multiplier
               FROM binder_listings
              WHERE price_mode = 'auto'
                AND ($1::text IS NULL OR binder_id = $1)
                AND ($2::text[] IS NULL OR id = ANY($2))",
        )
        .bind(scope.binder_id.as_deref())
        .bind(scope.listing_ids.as_deref())
        .fetch_all(&self.db.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            let finish: Option<String> = r.try_get("finish")?;
            out.push(ListingPriceInput {
                listing_id: r.try_get("id")?,
                print_id: r.try_get("print_id")?,
                finish: Finish::parse(finish.as_deref().unwrap_or_default()),
                multiplier: r.try_get("price_multiplier")?,
            });
        }
        Ok(out)
    }

    #[instrument(skip(self, print_ids), fields(ids = print_ids.len()))]
    async fn print_prices(&self, print_ids: &[String]) -> Result<HashMap<String, PriceSnapshot>> {
        if print_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            "SELECT print_id, price_usd, price_usd_foil, price_usd_etched
               FROM catalog_prints
              WHERE print_id = ANY($1)",
        )
        .bind(print_ids)
        .fetch_all(&self.db.pool)
        .await?;

        let mut out = HashMap::with_capacity(rows.len());
        for r in &rows {
            out.insert(r.try_get("print_id")?, prices_from_row(r)?);
        }
        Ok(out)
    }

    #[instrument(skip(self))]
    async fn update_listing_price(
        &self,
        listing_id: &str,
        computed_price: f64,
        priced_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE binder_listings SET computed_price = $2, last_priced_at = $3 WHERE id = $1",
        )
        .bind(listing_id)
        .bind(computed_price)
        .bind(priced_at)
        .execute(&self.db.pool)
        .await
        .with_context(|| format!("update price for listing {listing_id}"))?;
        Ok(())
    }
}
