//! Core data structures
//!
//! Tokens and pairs as resolved from the pool factory, raw swap logs as
//! returned by the node, and the normalized trades streamed to consumers.
//!
//! Orientation convention: after canonicalization `token0` is the base
//! (the asset being priced) and `token1` is the quote (the pricing unit).
//! `price` is quote per one base, `volume` is base units moved.

use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::ScraperError;

// ── Exchanges ───────────────────────────────────────────────────────────

/// Uniswap V2 style exchanges the backfill knows presets for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    UniswapV2,
    SushiSwap,
    PancakeSwap,
    Dfyn,
}

impl Exchange {
    /// Factory contract the pair universe is enumerated from
    pub fn default_factory(&self) -> Address {
        match self {
            Exchange::UniswapV2 => alloy::primitives::address!("0x5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f"),
            Exchange::SushiSwap => alloy::primitives::address!("0xC0AEe478e3658e2610c5F7A4A2E1777cE9e4f2Ac"),
            Exchange::PancakeSwap => alloy::primitives::address!("0xcA143Ce32Fe78f1f7019d7d551a6402fC5350c73"),
            Exchange::Dfyn => alloy::primitives::address!("0xE7Fb3e833eFE5F9c441105EB65Ef8b261266423B"),
        }
    }

    /// First block worth scanning
    pub fn default_genesis_block(&self) -> u64 {
        match self {
            Exchange::UniswapV2 => 10_000_000,
            Exchange::SushiSwap => 10_794_229,
            Exchange::PancakeSwap => 6_809_737,
            Exchange::Dfyn => 0,
        }
    }

    /// Delay between worker launches, in milliseconds
    pub fn default_launch_delay_ms(&self) -> u64 {
        match self {
            Exchange::UniswapV2 => 500,
            Exchange::SushiSwap => 500,
            Exchange::PancakeSwap => 200,
            Exchange::Dfyn => 100,
        }
    }

    pub fn blockchain(&self) -> &'static str {
        match self {
            Exchange::UniswapV2 | Exchange::SushiSwap => "Ethereum",
            Exchange::PancakeSwap => "BinanceSmartChain",
            Exchange::Dfyn => "Polygon",
        }
    }

    /// Environment variables for the (rest, ws) endpoints
    pub fn endpoint_env_vars(&self) -> (&'static str, &'static str) {
        match self {
            Exchange::UniswapV2 | Exchange::SushiSwap => ("ETH_URI_REST", "ETH_URI_WS"),
            Exchange::PancakeSwap => ("ETH_URI_REST_BSC", "ETH_URI_WS_BSC"),
            Exchange::Dfyn => ("ETH_URI_REST_POLYGON", "ETH_URI_WS_POLYGON"),
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Exchange::UniswapV2 => write!(f, "UniswapV2"),
            Exchange::SushiSwap => write!(f, "SushiSwap"),
            Exchange::PancakeSwap => write!(f, "PanCakeSwap"),
            Exchange::Dfyn => write!(f, "DFYN"),
        }
    }
}

impl FromStr for Exchange {
    type Err = ScraperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uniswapv2" | "uniswap" => Ok(Exchange::UniswapV2),
            "sushiswap" => Ok(Exchange::SushiSwap),
            "pancakeswap" => Ok(Exchange::PancakeSwap),
            "dfyn" => Ok(Exchange::Dfyn),
            other => Err(ScraperError::UnknownExchange(other.to_string())),
        }
    }
}

// ── Tokens and pairs ────────────────────────────────────────────────────

/// ERC20 metadata. Immutable once resolved; cached by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

/// A V2 pool and its two tokens.
///
/// `inverted` is set when token0/token1 were swapped relative to the pool
/// contract's own ordering, so raw swap amounts must be swapped too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pair {
    pub address: Address,
    pub token0: Token,
    pub token1: Token,
    pub name: String,
    #[serde(default)]
    pub inverted: bool,
}

impl Pair {
    /// Pair in pool ordering, named "symbol0-symbol1"
    pub fn new(address: Address, token0: Token, token1: Token) -> Self {
        let name = display_name(&token0, &token1);
        Self {
            address,
            token0,
            token1,
            name,
            inverted: false,
        }
    }

    /// Same pool with base and quote exchanged
    pub fn flipped(&self) -> Self {
        Self {
            address: self.address,
            token0: self.token1.clone(),
            token1: self.token0.clone(),
            name: display_name(&self.token1, &self.token0),
            inverted: !self.inverted,
        }
    }
}

fn display_name(token0: &Token, token1: &Token) -> String {
    format!("{}-{}", token0.symbol, token1.symbol)
}

// ── Raw swaps ───────────────────────────────────────────────────────────

/// One `Swap` log in native token units, pool ordering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSwapEvent {
    pub tx_hash: B256,
    pub block_number: u64,
    pub log_index: u64,
    pub pool: Address,
    pub amount0_in: U256,
    pub amount0_out: U256,
    pub amount1_in: U256,
    pub amount1_out: U256,
}

// ── Normalized output ───────────────────────────────────────────────────

/// Token identity as published downstream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
    pub blockchain: String,
}

impl Asset {
    pub fn from_token(token: &Token, blockchain: &str) -> Self {
        Self {
            address: token.address.to_checksum(None),
            symbol: token.symbol.clone(),
            name: token.name.clone(),
            decimals: token.decimals,
            blockchain: blockchain.to_string(),
        }
    }
}

/// Pair summary for the external pair catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePair {
    pub symbol: String,
    pub foreign_name: String,
    /// Pool contract; the backfill resolves registered pairs through it
    pub address: Address,
    pub exchange: String,
    pub verified: bool,
    pub base_token: Asset,
    pub quote_token: Asset,
}

impl ExchangePair {
    pub fn from_pair(pair: &Pair, exchange: &str, blockchain: &str) -> Self {
        Self {
            symbol: pair.token0.symbol.clone(),
            foreign_name: pair.name.clone(),
            address: pair.address,
            exchange: exchange.to_string(),
            verified: true,
            base_token: Asset::from_token(&pair.token0, blockchain),
            quote_token: Asset::from_token(&pair.token1, blockchain),
        }
    }
}

/// Decimal-scaled trade. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTrade {
    pub symbol: String,
    pub pair: String,
    /// Quote units per one base unit
    pub price: f64,
    /// Base units; negative when base was sold into the pool
    pub volume: f64,
    pub base_token: Asset,
    pub quote_token: Asset,
    pub time: DateTime<Utc>,
    pub block_number: u64,
    pub foreign_trade_id: String,
    pub source: String,
    pub verified_pair: bool,
}

impl NormalizedTrade {
    /// Re-quote the trade in the opposite direction.
    ///
    /// Base and quote are exchanged, the price is inverted and the volume is
    /// re-expressed in the new base token with the opposite sign.
    /// Returns `None` for a zero price, which has no inverse.
    pub fn reversed(&self) -> Option<Self> {
        if self.price == 0.0 {
            return None;
        }
        Some(Self {
            symbol: self.quote_token.symbol.clone(),
            pair: format!("{}-{}", self.quote_token.symbol, self.base_token.symbol),
            price: 1.0 / self.price,
            volume: -self.price * self.volume,
            base_token: self.quote_token.clone(),
            quote_token: self.base_token.clone(),
            time: self.time,
            block_number: self.block_number,
            foreign_trade_id: self.foreign_trade_id.clone(),
            source: self.source.clone(),
            verified_pair: self.verified_pair,
        })
    }
}
