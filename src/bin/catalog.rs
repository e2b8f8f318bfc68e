use anyhow::{bail, Result};
use binder_catalog_sync::database_ops::catalog::RepriceScope;
use binder_catalog_sync::logging::{init_tracing, DEFAULT_FILTER};
use binder_catalog_sync::util::env;
use binder_catalog_sync::CatalogSync;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "catalog", version, about = "Card catalog cache admin CLI")]
struct Cli {
    /// Optional override for max pool connections
    #[arg(long, global = true, default_value_t = 5)]
    max_connections: u32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Run the freshness gate for one oracle id
    Ensure {
        entity_id: String,
        /// Display name to store if the entity is new
        #[arg(long)]
        name: Option<String>,
        /// Override CATALOG_STALE_DAYS
        #[arg(long)]
        stale_days: Option<i64>,
    },
    /// Crawl and upsert every print of an oracle id, ignoring the lease
    Crawl { entity_id: String },
    /// Discover oracles for a free-text query and refresh them
    Warm {
        query: String,
        /// Fan-out bound (defaults to CATALOG_WARM_MAX_ENTITIES)
        #[arg(long)]
        max: Option<usize>,
        /// Fall back to a fuzzy name lookup when nothing is discovered
        #[arg(long, default_value_t = false)]
        fallback_named: bool,
    },
    /// Resolve a card name with the fuzzy lookup and refresh its oracle
    Named { name: String },
    /// Refresh entities not synced within the threshold
    Sweep {
        /// Defaults to CATALOG_SWEEP_STALE_HOURS
        #[arg(long)]
        stale_hours: Option<i64>,
        /// Defaults to CATALOG_SWEEP_LIMIT
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Recompute prices for auto-priced listings
    Reprice {
        #[arg(long)]
        binder_id: Option<String>,
        /// Comma-separated listing ids
        #[arg(long, value_delimiter = ',')]
        listing_ids: Option<Vec<String>>,
    },
    /// Resolve set icon URIs
    Icons {
        #[arg(required = true)]
        set_codes: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env::init_env();
    init_tracing("catalog", DEFAULT_FILTER)?;

    let cli = Cli::parse();
    let sync = CatalogSync::connect_from_env(cli.max_connections).await?;

    match cli.command {
        Commands::Ensure {
            entity_id,
            name,
            stale_days,
        } => {
            let stale_days = stale_days.unwrap_or(sync.settings().stale_days);
            if stale_days < 0 {
                bail!("--stale-days must be >= 0");
            }
            let outcome = sync
                .ensure_fresh_within(&entity_id, name.as_deref(), stale_days)
                .await?;
            info!(entity_id = %entity_id, ?outcome, "ensure: completed");
        }
        Commands::Crawl { entity_id } => {
            let written = sync.crawl_prints(&entity_id).await?;
            info!(entity_id = %entity_id, written, "crawl: completed");
        }
        Commands::Warm {
            query,
            max,
            fallback_named,
        } => {
            let max = max.unwrap_or(sync.settings().warm_max_entities);
            let ids = if fallback_named {
                sync.warm_or_resolve(&query, max).await
            } else {
                sync.warm_for_query(&query, max).await
            };
            println!("{}", serde_json::to_string_pretty(&ids)?);
        }
        Commands::Named { name } => match sync.resolve_named(&name).await? {
            Some(entity_id) => println!("{entity_id}"),
            None => bail!("no card matches {name:?}"),
        },
        Commands::Sweep { stale_hours, limit } => {
            let stale_hours = stale_hours.unwrap_or(sync.settings().sweep_stale_hours);
            let limit = limit.unwrap_or(sync.settings().sweep_limit);
            let refreshed = sync.refresh_stale_entities(stale_hours, limit).await?;
            info!(refreshed, stale_hours, limit, "sweep: completed");
        }
        Commands::Reprice {
            binder_id,
            listing_ids,
        } => {
            let summary = sync
                .reprice(&RepriceScope {
                    binder_id,
                    listing_ids,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Icons { set_codes } => {
            let icons: BTreeMap<_, _> = sync.resolve_icons(&set_codes).await.into_iter().collect();
            println!("{}", serde_json::to_string_pretty(&icons)?);
        }
    }
    Ok(())
}
