//! Error taxonomy
//!
//! - `ChainError`: what the node client reports, already classified into
//!   "result too large" vs transient so callers never match on strings.
//! - `LookupError`: pair/token metadata resolution; the pair is skipped.
//! - `ScanError`: terminal failure of a windowed scan.
//! - `NormalizeError`: one swap could not become a trade; the scan goes on.
//! - `StoreError`: block metadata store.
//! - `ScraperError`: session-level, stored in the shared error slot.

use alloy::primitives::Address;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// Result set or payload exceeded the node's limit; shrink and retry
    #[error("query result too large: {0}")]
    ResultTooLarge(String),

    #[error("transient rpc failure: {0}")]
    Transient(String),

    #[error("client closed")]
    Closed,

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Node messages that mean the query must be narrowed
const RESULT_TOO_LARGE_MARKERS: &[&str] = &[
    "query returned more than 10000 results",
    "log response size exceeded",
    "response size exceeded",
    "query exceeds max results",
];

impl ChainError {
    /// Classify a raw node/transport error message
    pub fn from_rpc_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if RESULT_TOO_LARGE_MARKERS.iter().any(|m| lower.contains(m)) {
            ChainError::ResultTooLarge(message)
        } else {
            ChainError::Transient(message)
        }
    }
}

/// Which metadata read failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStage {
    PairCount,
    PairAddress,
    PairTokens,
    TokenSymbol,
    TokenName,
    TokenDecimals,
}

impl std::fmt::Display for LookupStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LookupStage::PairCount => "allPairsLength",
            LookupStage::PairAddress => "allPairs",
            LookupStage::PairTokens => "token0/token1",
            LookupStage::TokenSymbol => "symbol",
            LookupStage::TokenName => "name",
            LookupStage::TokenDecimals => "decimals",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("lookup of {target} failed at {stage}: {source}")]
pub struct LookupError {
    pub target: String,
    pub stage: LookupStage,
    #[source]
    pub source: ChainError,
}

impl LookupError {
    pub fn new(target: impl Into<String>, stage: LookupStage, source: ChainError) -> Self {
        Self {
            target: target.into(),
            stage,
            source,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScanError {
    #[error("blocks {from}-{to}: gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        from: u64,
        to: u64,
        attempts: u32,
        last: ChainError,
    },

    /// A single-block window still exceeds the node's result limit
    #[error("block {block}: result too large even for a single-block window")]
    WindowExhausted { block: u64 },

    #[error("chain client closed")]
    ClientClosed,

    #[error("scan cancelled by shutdown")]
    Cancelled,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum NormalizeError {
    #[error("unknown pool {0}")]
    UnknownPool(Address, #[source] LookupError),

    #[error("block {block}: {source}")]
    BlockLookup {
        block: u64,
        #[source]
        source: StoreError,
    },

    #[error("ambiguous swap in tx {tx}: base in={base_in} out={base_out}")]
    AmbiguousSwap { tx: String, base_in: f64, base_out: f64 },

    #[error("zero price in tx {0}")]
    ZeroPrice(String),

    #[error("cannot scale amount by 10^{decimals}: {reason}")]
    UnitScaling { decimals: u8, reason: String },

    #[error("block {block}: timestamp {timestamp} out of range")]
    InvalidTimestamp { block: u64, timestamp: u64 },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connect(String),

    #[error("store query failed: {0}")]
    Query(String),

    #[error("block {0} not found")]
    MissingBlock(u64),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScraperError {
    #[error("scraper already closed")]
    AlreadyClosed,

    #[error("scraper is closed")]
    Closed,

    #[error("no pairs to scrape provided")]
    NoPairs,

    #[error("unknown exchange: {0}")]
    UnknownExchange(String),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classifies_size_limit_messages() {
        let e = ChainError::from_rpc_message(
            "server returned an error response: error code -32005: query returned more than 10000 results",
        );
        assert!(matches!(e, ChainError::ResultTooLarge(_)));

        let e = ChainError::from_rpc_message("Log response size exceeded. You can make eth_getLogs requests with up to a 2K block range");
        assert!(matches!(e, ChainError::ResultTooLarge(_)));
    }

    #[test]
    fn test_other_messages_are_transient() {
        let e = ChainError::from_rpc_message("connection reset by peer");
        assert!(matches!(e, ChainError::Transient(_)));
        let e = ChainError::from_rpc_message("429 Too Many Requests");
        assert!(matches!(e, ChainError::Transient(_)));
    }

    #[test]
    fn test_lookup_error_display() {
        let e = LookupError::new("pair #3", LookupStage::TokenDecimals, ChainError::Transient("timeout".into()));
        assert_eq!(
            e.to_string(),
            "lookup of pair #3 failed at decimals: transient rpc failure: timeout"
        );
    }
}
