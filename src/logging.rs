use anyhow::{Context, Result};
use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Filter used when `RUST_LOG` is unset: crate logs at info, sqlx statement
/// logging kept at warn so per-row upserts do not flood the output.
pub const DEFAULT_FILTER: &str = "info,binder_catalog_sync=info,sqlx=warn";

/// Sets up the global tracing subscriber with a fmt formatter and env filter.
///
/// `RUST_LOG` wins over `default_filter`. Both binaries go through this helper
/// so worker and CLI output share the same shape.
pub fn init_tracing(bin: &str, default_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(default_filter)
            .with_context(|| format!("invalid default log filter {default_filter:?}"))?,
    };

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))?;

    tracing::debug!(target: "bootstrap", bin, "tracing initialized");
    Ok(())
}
