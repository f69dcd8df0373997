//! Configuration
//!
//! TOML file with `[exchange]`, `[rpc]`, `[backfill]`, `[filters]` and
//! `[store]` sections. Everything but the exchange name has a default;
//! factory, genesis block and launch delay fall back to the exchange
//! preset. Endpoint URLs come from the environment (`.env` honored) when
//! set, otherwise from `[rpc]`.

use crate::backfill::BackfillConfig;
use crate::filters::{PairFilter, ReferenceTokens, DEFAULT_REFERENCE_SYMBOLS};
use crate::scanner::ScanPolicy;
use crate::scraper::ScraperSettings;
use crate::types::Exchange;
use alloy::primitives::Address;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level TOML configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct BackfillToml {
    pub exchange: ExchangeSection,
    #[serde(default)]
    pub rpc: RpcSection,
    #[serde(default)]
    pub backfill: BackfillSection,
    #[serde(default)]
    pub filters: FiltersSection,
    #[serde(default)]
    pub store: StoreSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSection {
    pub name: String,
    pub factory: Option<String>,
    pub genesis_block: Option<u64>,
    pub launch_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcSection {
    pub rest_url: Option<String>,
    pub ws_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackfillSection {
    #[serde(default = "default_window_size")]
    pub window_size: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_discovery_concurrency")]
    pub discovery_concurrency: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    pub to_block: Option<u64>,
}

fn default_window_size() -> u64 { 1000 }
fn default_concurrency() -> usize { 5 }
fn default_settle_ms() -> u64 { 4000 }
fn default_retry_delay_ms() -> u64 { 5000 }
fn default_max_retry_delay_ms() -> u64 { 60_000 }
fn default_max_retries() -> u32 { 8 }
fn default_discovery_concurrency() -> usize { 16 }
fn default_channel_capacity() -> usize { 1 }

impl Default for BackfillSection {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            concurrency: default_concurrency(),
            settle_ms: default_settle_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            max_retries: default_max_retries(),
            discovery_concurrency: default_discovery_concurrency(),
            channel_capacity: default_channel_capacity(),
            to_block: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FiltersSection {
    pub blacklist_file: Option<PathBuf>,
    pub reverse_tokens_file: Option<PathBuf>,
    #[serde(default = "default_reference_symbols")]
    pub reference_symbols: Vec<String>,
}

fn default_reference_symbols() -> Vec<String> {
    DEFAULT_REFERENCE_SYMBOLS.iter().map(|s| s.to_string()).collect()
}

impl Default for FiltersSection {
    fn default() -> Self {
        Self {
            blacklist_file: None,
            reverse_tokens_file: None,
            reference_symbols: default_reference_symbols(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

fn default_true() -> bool { true }
fn default_reconnect_delay_ms() -> u64 { 5000 }

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

/// Resolved node endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub rest: String,
    pub ws: Option<String>,
}

impl BackfillToml {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse TOML configuration")
    }

    /// Defaults only, for running without a config file
    pub fn for_exchange(name: &str) -> Self {
        Self {
            exchange: ExchangeSection {
                name: name.to_string(),
                factory: None,
                genesis_block: None,
                launch_delay_ms: None,
            },
            rpc: RpcSection::default(),
            backfill: BackfillSection::default(),
            filters: FiltersSection::default(),
            store: StoreSection::default(),
        }
    }

    pub fn exchange(&self) -> Result<Exchange> {
        self.exchange
            .name
            .parse::<Exchange>()
            .with_context(|| format!("Invalid [exchange] name '{}'", self.exchange.name))
    }

    pub fn factory(&self) -> Result<Address> {
        match &self.exchange.factory {
            Some(f) => f
                .trim()
                .parse::<Address>()
                .with_context(|| format!("Invalid factory address '{}'", f)),
            None => Ok(self.exchange()?.default_factory()),
        }
    }

    /// Endpoints from the process environment, falling back to `[rpc]`
    pub fn endpoints(&self) -> Result<Endpoints> {
        self.endpoints_with(|key| std::env::var(key).ok())
    }

    pub fn endpoints_with<F>(&self, lookup: F) -> Result<Endpoints>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (rest_var, ws_var) = self.exchange()?.endpoint_env_vars();
        let pick = |var: &str, fallback: &Option<String>| {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .or_else(|| fallback.clone())
        };
        let rest = pick(rest_var, &self.rpc.rest_url)
            .ok_or_else(|| anyhow!("{} not set and no [rpc] rest_url configured", rest_var))?;
        let ws = pick(ws_var, &self.rpc.ws_url);
        Ok(Endpoints { rest, ws })
    }

    pub fn scraper_settings(&self) -> Result<ScraperSettings> {
        let exchange = self.exchange()?;
        let b = &self.backfill;
        Ok(ScraperSettings {
            exchange,
            factory: self.factory()?,
            backfill: BackfillConfig {
                from_block: self
                    .exchange
                    .genesis_block
                    .unwrap_or_else(|| exchange.default_genesis_block()),
                to_block: b.to_block,
                concurrency: b.concurrency,
                launch_delay: Duration::from_millis(
                    self.exchange
                        .launch_delay_ms
                        .unwrap_or_else(|| exchange.default_launch_delay_ms()),
                ),
                scan: ScanPolicy {
                    window_size: b.window_size,
                    retry_delay: Duration::from_millis(b.retry_delay_ms),
                    max_retry_delay: Duration::from_millis(b.max_retry_delay_ms),
                    max_retries: b.max_retries,
                },
            },
            settle_delay: Duration::from_millis(b.settle_ms),
            channel_capacity: b.channel_capacity,
            discovery_concurrency: b.discovery_concurrency,
            reverse_tokens_file: self.filters.reverse_tokens_file.clone(),
            scrape: true,
        })
    }

    /// Blacklist from `[filters] blacklist_file`; length rule only when unset
    pub fn pair_filter(&self) -> Result<PairFilter> {
        match &self.filters.blacklist_file {
            Some(path) => PairFilter::load(path),
            None => Ok(PairFilter::default()),
        }
    }

    pub fn reference_tokens(&self) -> ReferenceTokens {
        ReferenceTokens::new(&self.filters.reference_symbols)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.store.reconnect_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[exchange]
name = "PancakeSwap"
genesis_block = 7000000

[rpc]
rest_url = "http://localhost:8545"

[backfill]
window_size = 500
concurrency = 3
max_retries = 2
to_block = 7100000

[filters]
reverse_tokens_file = "config/reverse_tokens.json"
reference_symbols = ["WBNB", "BUSD"]

[store]
enabled = false
"#;

    #[test]
    fn test_parse_full() {
        let cfg = BackfillToml::parse(FULL).unwrap();
        let settings = cfg.scraper_settings().unwrap();

        assert_eq!(settings.exchange, Exchange::PancakeSwap);
        assert_eq!(settings.factory, Exchange::PancakeSwap.default_factory());
        assert_eq!(settings.backfill.from_block, 7_000_000);
        assert_eq!(settings.backfill.to_block, Some(7_100_000));
        assert_eq!(settings.backfill.concurrency, 3);
        assert_eq!(settings.backfill.launch_delay, Duration::from_millis(200));
        assert_eq!(settings.backfill.scan.window_size, 500);
        assert_eq!(settings.backfill.scan.max_retries, 2);
        assert_eq!(settings.backfill.scan.retry_delay, Duration::from_secs(5));
        assert_eq!(settings.settle_delay, Duration::from_secs(4));
        assert_eq!(settings.channel_capacity, 1);
        assert!(!cfg.store.enabled);
        assert!(cfg.reference_tokens().contains("wbnb"));
        assert!(!cfg.reference_tokens().contains("WETH"));
    }

    #[test]
    fn test_minimal_uses_presets() {
        let cfg = BackfillToml::parse("[exchange]\nname = \"UniswapV2\"\n").unwrap();
        let settings = cfg.scraper_settings().unwrap();
        assert_eq!(settings.backfill.from_block, 10_000_000);
        assert_eq!(settings.backfill.scan.window_size, 1000);
        assert_eq!(settings.discovery_concurrency, 16);
        assert!(cfg.store.enabled);
        assert_eq!(cfg.reconnect_delay(), Duration::from_secs(5));
        assert!(cfg.reference_tokens().contains("USDC"));
    }

    #[test]
    fn test_unknown_exchange() {
        let cfg = BackfillToml::for_exchange("curve");
        assert!(cfg.scraper_settings().is_err());
    }

    #[test]
    fn test_factory_override() {
        let mut cfg = BackfillToml::for_exchange("sushiswap");
        cfg.exchange.factory = Some("0x00000000000000000000000000000000000000ff".to_string());
        assert_eq!(cfg.factory().unwrap(), Address::with_last_byte(0xff));
    }

    #[test]
    fn test_endpoints_env_overrides_file() {
        let cfg = BackfillToml::parse(FULL).unwrap();

        let from_file = cfg.endpoints_with(|_| None).unwrap();
        assert_eq!(from_file.rest, "http://localhost:8545");
        assert_eq!(from_file.ws, None);

        let from_env = cfg
            .endpoints_with(|key| match key {
                "ETH_URI_REST_BSC" => Some("http://bsc:8545".to_string()),
                "ETH_URI_WS_BSC" => Some("ws://bsc:8546".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(from_env.rest, "http://bsc:8545");
        assert_eq!(from_env.ws.as_deref(), Some("ws://bsc:8546"));
    }

    #[test]
    fn test_missing_rest_endpoint() {
        let cfg = BackfillToml::for_exchange("UniswapV2");
        let err = cfg.endpoints_with(|_| None).unwrap_err();
        assert!(err.to_string().contains("ETH_URI_REST"));
    }
}
