//! Capsule ledger service binary
//!
//! Usage: `capsule-ledger [config.toml]`. Without a path, configuration is
//! read from `CAPSULE_LEDGER_*` environment variables.

use anyhow::Context;
use capsule_ledger::{Config, LedgerHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => Config::from_env().context("failed to load config from environment")?,
    };

    tracing::info!(data_dir = %config.data_dir.display(), "Starting capsule ledger");

    let handle = LedgerHandle::open(config)
        .await
        .context("failed to open ledger")?;

    let info = serde_json::to_string(&handle.service_info())?;
    let summary = serde_json::to_string(&handle.market_summary().await?)?;
    tracing::info!(service = %info, market = %summary, "Ledger opened successfully");

    tokio::signal::ctrl_c().await?;

    let metrics = handle.ledger().metrics().render()?;
    tracing::debug!(metrics = %metrics, "final metrics");
    tracing::info!("Shutting down capsule ledger");
    Ok(())
}
