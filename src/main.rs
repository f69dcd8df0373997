//! Historical Trade Backfill
//!
//! Discovers the pairs of a Uniswap V2 style factory, registers them (all,
//! a `--pair` subset, or the catalogue written by `list-pairs`) and streams
//! every historical swap as a normalized trade, one JSON object per line.
//!
//! Usage:
//!     cargo run --release --bin backfill-trades -- --config config/backfill.toml
//!     cargo run --release --bin backfill-trades -- --exchange sushiswap --pair UNI-WETH --no-db
//!     cargo run --release --bin backfill-trades -- --pairs-file pairs.json --output trades.jsonl
//!
//! Notes:
//!     - Endpoints come from ETH_URI_REST / ETH_URI_WS (per-chain variants
//!       for BSC and Polygon) or the [rpc] section
//!     - Block timestamps are cached in Postgres (POSTGRES_* env) unless
//!       --no-db is given
//!     - A --pairs-file catalogue must carry each pool `address`; the
//!       backfill resolves those pools directly
//!     - Ctrl-C stops the workers and exits after the session closes

use anyhow::{Context, Result};
use clap::Parser;
use dex_history_backfill::config::BackfillToml;
use dex_history_backfill::registry::PairRegistry;
use dex_history_backfill::scraper::available_pairs;
use dex_history_backfill::store::{BlockSource, ChainBlockSource, PostgresBlockStore, PostgresConnectOptions};
use dex_history_backfill::{AlloyChainClient, ExchangePair, HistoryScraper};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

// ── CLI Arguments ───────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "backfill-trades", about = "Backfill historical V2 swaps as normalized trades")]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Exchange (UniswapV2, SushiSwap, PancakeSwap, Dfyn); overrides the config
    #[arg(short, long, env = "BACKFILL_EXCHANGE")]
    exchange: Option<String>,

    /// First block to scan (default: exchange genesis)
    #[arg(long)]
    from_block: Option<u64>,

    /// Last block to scan (default: head at start)
    #[arg(long)]
    to_block: Option<u64>,

    /// Only scrape these pairs (canonical name, e.g. UNI-WETH); repeatable
    #[arg(long = "pair")]
    pairs: Vec<String>,

    /// Pair catalogue from list-pairs; skips on-chain discovery
    #[arg(long)]
    pairs_file: Option<PathBuf>,

    /// Write trades here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Read block timestamps from the node instead of Postgres
    #[arg(long)]
    no_db: bool,
}

fn load_pairs_file(path: &Path) -> Result<Vec<ExchangePair>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pairs file: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse pairs JSON: {}", path.display()))
}

// ── Main ────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    // stdout may carry trades, logs go to stderr
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
    if args.from_block.is_some() {
        cfg.exchange.genesis_block = args.from_block;
    }
    if args.to_block.is_some() {
        cfg.backfill.to_block = args.to_block;
    }

    let exchange = cfg.exchange()?;
    let endpoints = cfg.endpoints()?;
    let settings = cfg.scraper_settings()?;
    let filter = cfg.pair_filter()?;
    let references = cfg.reference_tokens();

    info!("===========================================");
    info!("   DEX History Backfill");
    info!("===========================================");
    info!("Exchange: {} ({})", exchange, exchange.blockchain());
    info!("Factory: {:?}", settings.factory);
    info!(
        "Blocks: {} - {}",
        settings.backfill.from_block,
        settings
            .backfill
            .to_block
            .map_or_else(|| "head".to_string(), |b| b.to_string())
    );
    info!(
        "Workers: {}, window: {} blocks",
        settings.backfill.concurrency, settings.backfill.scan.window_size
    );

    // Dial failures are fatal
    let rest = Arc::new(AlloyChainClient::connect_http(&endpoints.rest, "rest").await?);
    let ws = match &endpoints.ws {
        Some(url) => Some(Arc::new(AlloyChainClient::connect_ws(url, "ws").await?)),
        None => None,
    };

    let store = if cfg.store.enabled && !args.no_db {
        let options = PostgresConnectOptions::from_env();
        info!("Block store: {}", options.display_url());
        let store = PostgresBlockStore::new(options, cfg.reconnect_delay(), Arc::clone(&rest), exchange.blockchain());
        store.init_schema().await.context("Failed to prepare blockdata table")?;
        Some(Arc::new(store))
    } else {
        info!("Block store: node headers");
        None
    };
    let blocks: Arc<dyn BlockSource> = match &store {
        Some(store) => Arc::clone(store) as Arc<dyn BlockSource>,
        None => Arc::new(ChainBlockSource::new(Arc::clone(&rest))),
    };

    // Discover before the session starts so registration beats the settle delay
    let registry = Arc::new(
        PairRegistry::new(Arc::clone(&rest), settings.factory)
            .with_discovery_concurrency(settings.discovery_concurrency),
    );
    let mut pairs = match &args.pairs_file {
        Some(path) => load_pairs_file(path)?,
        None => available_pairs(&registry, &filter, &references, exchange).await?,
    };
    if !args.pairs.is_empty() {
        pairs.retain(|p| args.pairs.contains(&p.foreign_name));
    }
    info!("Pairs to scrape: {}", pairs.len());

    let mut scraper = HistoryScraper::with_registry(registry, rest, ws, blocks, filter, references, settings);
    let mut handles = Vec::with_capacity(pairs.len());
    for pair in pairs {
        match scraper.scrape_pair(pair).await {
            Ok(handle) => handles.push(handle),
            Err(e) => {
                error!("cannot register pairs: {}", e);
                break;
            }
        }
    }

    let mut out: Box<dyn Write + Send> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };

    let started = Instant::now();
    let mut trades = scraper.take_trades().context("trade stream already taken")?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut written = 0u64;
    loop {
        tokio::select! {
            trade = trades.recv() => match trade {
                Some(trade) => {
                    serde_json::to_writer(&mut out, &trade)?;
                    out.write_all(b"\n")?;
                    written += 1;
                    if written % 10_000 == 0 {
                        info!("{} trades written", written);
                    }
                }
                None => break,
            },
            _ = &mut ctrl_c => {
                info!("Ctrl-C received, shutting down");
                break;
            }
        }
    }
    out.flush()?;
    drop(trades);

    if let Err(e) = scraper.close().await {
        warn!("scraper closed with error: {}", e);
    }
    if let Some(store) = store {
        store.close().await;
    }

    info!("===========================================");
    info!("   Backfill Complete");
    info!("===========================================");
    info!("Pairs registered: {}", handles.len());
    info!("Trades written:   {}", written);
    info!("Duration:         {:.1}s", started.elapsed().as_secs_f64());
    Ok(())
}
