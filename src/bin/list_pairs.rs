//! Pair Catalogue
//!
//! Enumerates the factory's pairs, drops blacklisted and degenerate ones
//! and writes the rest as a JSON array of pair summaries (canonical
//! orientation, base/quote assets, verified flag). The output can be fed
//! back to `backfill-trades --pairs-file`.
//!
//! Usage:
//!     cargo run --release --bin list-pairs -- --exchange UniswapV2 --output pairs.json

use anyhow::{Context, Result};
use clap::Parser;
use dex_history_backfill::config::BackfillToml;
use dex_history_backfill::store::ChainBlockSource;
use dex_history_backfill::{AlloyChainClient, HistoryScraper};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "list-pairs", about = "List the tradable pairs of a V2 factory as JSON")]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Exchange (UniswapV2, SushiSwap, PancakeSwap, Dfyn); overrides the config
    #[arg(short, long, env = "BACKFILL_EXCHANGE")]
    exchange: Option<String>,

    /// Write the catalogue here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenv::dotenv().ok();
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => BackfillToml::load(path)?,
        None => BackfillToml::for_exchange(args.exchange.as_deref().unwrap_or("UniswapV2")),
    };
    if let Some(name) = &args.exchange {
        cfg.exchange.name = name.clone();
    }

    let exchange = cfg.exchange()?;
    let endpoints = cfg.endpoints()?;
    let mut settings = cfg.scraper_settings()?;
    settings.scrape = false;

    info!("Listing pairs of {} factory {:?}", exchange, settings.factory);
    let rest = Arc::new(AlloyChainClient::connect_http(&endpoints.rest, "rest").await?);
    let scraper = HistoryScraper::new(
        Arc::clone(&rest),
        None,
        ChainBlockSource::new(Arc::clone(&rest)),
        cfg.pair_filter()?,
        cfg.reference_tokens(),
        settings,
    );

    let pairs = scraper.fetch_available_pairs().await?;
    let json = serde_json::to_string_pretty(&pairs)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {} pairs to {}", pairs.len(), path.display());
        }
        None => println!("{}", json),
    }

    if let Err(e) = scraper.close().await {
        warn!("scraper closed with error: {}", e);
    }
    Ok(())
}
