//! Quote direction rules
//!
//! `ReferenceTokens` decides pair orientation: a reference token (wrapped
//! native, stablecoins) belongs on the quote side. `ReverseTokens` lists
//! quote-token addresses whose trades are re-quoted after normalization so
//! every trade of a given base token prices in the same direction.

use crate::types::Pair;
use alloy::primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_REFERENCE_SYMBOLS: &[&str] = &[
    "WETH", "WBNB", "WMATIC", "USDC", "USDT", "DAI", "BUSD", "WBTC",
];

#[derive(Debug, Clone)]
pub struct ReferenceTokens {
    symbols: HashSet<String>,
}

impl ReferenceTokens {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            symbols: symbols.into_iter().map(|s| s.as_ref().to_uppercase()).collect(),
        }
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains(&symbol.to_uppercase())
    }

    /// Put the reference token on the quote side.
    ///
    /// Flips only when token0 is a reference token and token1 is not, so the
    /// result depends on the two tokens alone and applying it twice is a no-op.
    pub fn canonicalize(&self, pair: Pair) -> Pair {
        if self.contains(&pair.token0.symbol) && !self.contains(&pair.token1.symbol) {
            pair.flipped()
        } else {
            pair
        }
    }
}

impl Default for ReferenceTokens {
    fn default() -> Self {
        Self::new(DEFAULT_REFERENCE_SYMBOLS)
    }
}

#[derive(Debug, Deserialize)]
struct ReverseTokensFile {
    tokens: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReverseTokens {
    addresses: HashSet<Address>,
}

impl ReverseTokens {
    pub fn new(addresses: impl IntoIterator<Item = Address>) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
        }
    }

    /// Load `{"tokens": ["0x..."]}`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read reverse tokens file: {}", path.display()))?;
        let raw: ReverseTokensFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse reverse tokens JSON: {}", path.display()))?;

        let addresses: HashSet<Address> = raw
            .tokens
            .iter()
            .filter_map(|t| match t.trim().parse::<Address>() {
                Ok(a) => Some(a),
                Err(e) => {
                    warn!("Reverse tokens: ignoring invalid address '{}': {}", t, e);
                    None
                }
            })
            .collect();
        info!("Reverse tokens loaded: {}", addresses.len());
        Ok(Self { addresses })
    }

    /// Missing or broken file means no reversals
    pub fn load_or_empty<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(t) => t,
            Err(e) => {
                warn!("error getting tokens for which pairs should be reversed: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::addr;
    use crate::types::Token;
    use std::io::Write;

    fn token(n: u8, symbol: &str) -> Token {
        Token {
            address: addr(n),
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            decimals: 18,
        }
    }

    #[test]
    fn test_reference_token_moves_to_quote() {
        let refs = ReferenceTokens::default();
        let pair = Pair::new(addr(1), token(2, "WETH"), token(3, "UNI"));
        let canon = refs.canonicalize(pair);
        assert_eq!(canon.name, "UNI-WETH");
        assert!(canon.inverted);
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let refs = ReferenceTokens::default();
        for (a, b) in [("WETH", "UNI"), ("UNI", "WETH"), ("USDC", "WETH"), ("AAVE", "LINK")] {
            let pair = Pair::new(addr(1), token(2, a), token(3, b));
            let once = refs.canonicalize(pair);
            let twice = refs.canonicalize(once.clone());
            assert_eq!(once, twice, "{}-{}", a, b);
        }
    }

    #[test]
    fn test_two_reference_tokens_keep_pool_order() {
        let refs = ReferenceTokens::default();
        let pair = Pair::new(addr(1), token(2, "USDC"), token(3, "WETH"));
        assert_eq!(refs.canonicalize(pair.clone()), pair);
    }

    #[test]
    fn test_load_reverse_tokens() {
        let dir = std::env::temp_dir().join(format!("reverse_tokens_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("reverse_tokens.json");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(
            f,
            r#"{{"tokens": ["0x0000000000000000000000000000000000000007", "bogus"]}}"#
        )
        .unwrap();

        let tokens = ReverseTokens::load(&path).unwrap();
        assert_eq!(tokens.len(), 1);
        assert!(tokens.contains(&addr(7)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_reverse_file_is_empty() {
        let tokens = ReverseTokens::load_or_empty("/nonexistent/reverse_tokens.json");
        assert!(tokens.is_empty());
    }
}
