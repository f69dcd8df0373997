//! Pair Blacklist
//!
//! Rejects degenerate pairs before they are scanned or published:
//! symbols shorter than two characters, blacklisted symbols, and
//! blacklisted token addresses.
//!
//! Config file: config/blacklist.json
//!
//! ```json
//! { "symbols": ["SCAM"], "addresses": ["0x..."] }
//! ```

use crate::types::{NormalizedTrade, Pair, Token};
use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// Shortest symbol accepted for either side of a pair
pub const MIN_SYMBOL_LEN: usize = 2;

// ---------------------------------------------------------------------------
// JSON structure
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
pub struct BlacklistFile {
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Why a pair was excluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ShortSymbol(String),
    BlacklistedSymbol(String),
    BlacklistedAddress(Address),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SkipReason::ShortSymbol(s) => write!(f, "symbol '{}' too short", s),
            SkipReason::BlacklistedSymbol(s) => write!(f, "symbol {} is blacklisted", s),
            SkipReason::BlacklistedAddress(a) => write!(f, "address {} is blacklisted", a),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PairFilter {
    /// Uppercased symbols
    symbols: HashSet<String>,
    addresses: HashSet<Address>,
}

impl PairFilter {
    /// Load from a JSON file. Unparseable addresses are logged and skipped.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read blacklist file: {}", path.display()))?;
        let raw: BlacklistFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse blacklist JSON: {}", path.display()))?;
        Ok(Self::from_config(raw))
    }

    pub fn from_config(raw: BlacklistFile) -> Self {
        let symbols: HashSet<String> = raw.symbols.iter().map(|s| s.trim().to_uppercase()).collect();
        let addresses: HashSet<Address> = raw
            .addresses
            .iter()
            .filter_map(|a| match a.trim().parse::<Address>() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    warn!("Blacklist: ignoring invalid address '{}': {}", a, e);
                    None
                }
            })
            .collect();

        info!(
            "Blacklist loaded: {} symbols, {} addresses",
            symbols.len(),
            addresses.len()
        );

        Self { symbols, addresses }
    }

    pub fn is_symbol_blacklisted(&self, symbol: &str) -> bool {
        self.symbols.contains(&symbol.trim().to_uppercase())
    }

    pub fn is_address_blacklisted(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    fn check_token(&self, token: &Token) -> Option<SkipReason> {
        if token.symbol.chars().count() < MIN_SYMBOL_LEN {
            return Some(SkipReason::ShortSymbol(token.symbol.clone()));
        }
        if self.is_symbol_blacklisted(&token.symbol) {
            return Some(SkipReason::BlacklistedSymbol(token.symbol.clone()));
        }
        None
    }

    /// `Some(reason)` if the pair must not be scanned or published.
    /// Symbol checks run before address checks for both sides.
    pub fn check(&self, pair: &Pair) -> Option<SkipReason> {
        if let Some(reason) = self.check_token(&pair.token0).or_else(|| self.check_token(&pair.token1)) {
            return Some(reason);
        }
        [pair.token0.address, pair.token1.address]
            .into_iter()
            .find(|a| self.is_address_blacklisted(a))
            .map(SkipReason::BlacklistedAddress)
    }

    /// Last check before emission
    pub fn admits_trade(&self, trade: &NormalizedTrade) -> bool {
        [&trade.base_token, &trade.quote_token].iter().all(|asset| {
            asset.symbol.chars().count() >= MIN_SYMBOL_LEN
                && !self.is_symbol_blacklisted(&asset.symbol)
                && asset
                    .address
                    .parse::<Address>()
                    .map(|a| !self.is_address_blacklisted(&a))
                    .unwrap_or(true)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
