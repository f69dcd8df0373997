//! DEX History Backfill Library
//!
//! Rebuilds the historical trade tape of a Uniswap V2 style exchange from
//! `Swap` logs: pair discovery, windowed log scanning, decimal-correct
//! normalization and a bounded trade stream with graceful shutdown.

pub mod backfill;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod emitter;
pub mod errors;
pub mod filters;
pub mod normalizer;
pub mod registry;
pub mod scanner;
pub mod scraper;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use backfill::{BackfillConfig, BackfillStats};
pub use chain::{AlloyChainClient, ChainClient};
pub use config::BackfillToml;
pub use emitter::{TradeSink, TradeStream};
pub use errors::{ChainError, LookupError, NormalizeError, ScanError, ScraperError, StoreError};
pub use scraper::{HistoryScraper, PairScraper, ScraperSettings, ScraperStatus};
pub use types::{Asset, Exchange, ExchangePair, NormalizedTrade, Pair, RawSwapEvent, Token};
