//! Pair Registry
//!
//! Resolves trading-pair metadata from the V2 factory and caches it for the
//! process lifetime. Thread-safe via DashMap; pairs are keyed by pool
//! address and by display name, tokens by address, and factory indices
//! map to pool addresses.
//!
//! Resolution reads token0/token1 from the pool, then symbol, name and
//! decimals of each token. Any failed read aborts the pair and nothing
//! partial is cached.

use crate::chain::ChainClient;
use crate::errors::{LookupError, LookupStage};
use crate::types::{Pair, Token};
use alloy::primitives::Address;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default cap on concurrent pair resolutions during discovery
pub const DEFAULT_DISCOVERY_CONCURRENCY: usize = 16;

pub struct PairRegistry<C> {
    client: Arc<C>,
    factory: Address,
    discovery_concurrency: usize,
    tokens: DashMap<Address, Token>,
    indices: DashMap<u64, Address>,
    pairs_by_address: DashMap<Address, Pair>,
    pairs_by_name: DashMap<String, Pair>,
}

impl<C: ChainClient> PairRegistry<C> {
    pub fn new(client: Arc<C>, factory: Address) -> Self {
        Self {
            client,
            factory,
            discovery_concurrency: DEFAULT_DISCOVERY_CONCURRENCY,
            tokens: DashMap::new(),
            indices: DashMap::new(),
            pairs_by_address: DashMap::new(),
            pairs_by_name: DashMap::new(),
        }
    }

    pub fn with_discovery_concurrency(mut self, n: usize) -> Self {
        self.discovery_concurrency = n.max(1);
        self
    }

    pub fn factory(&self) -> Address {
        self.factory
    }

    /// Number of pairs the factory has created
    pub async fn pair_count(&self) -> Result<u64, LookupError> {
        self.client
            .pair_count(self.factory)
            .await
            .map_err(|e| LookupError::new(format!("factory {}", self.factory), LookupStage::PairCount, e))
    }

    /// Pair number `index` in factory creation order
    pub async fn resolve_pair_by_index(&self, index: u64) -> Result<Pair, LookupError> {
        let cached = self.indices.get(&index).map(|entry| *entry);
        let address = match cached {
            Some(address) => address,
            None => {
                debug!("Get pair ID: {}", index);
                let address = self
                    .client
                    .pair_address(self.factory, index)
                    .await
                    .map_err(|e| LookupError::new(format!("pair #{}", index), LookupStage::PairAddress, e))?;
                self.indices.insert(index, address);
                address
            }
        };
        self.resolve_pair_by_address(address).await
    }

    /// Pair at pool `address`, from cache when already resolved
    pub async fn resolve_pair_by_address(&self, address: Address) -> Result<Pair, LookupError> {
        if let Some(pair) = self.cached_pair(&address) {
            return Ok(pair);
        }

        let (address0, address1) = self
            .client
            .pair_tokens(address)
            .await
            .map_err(|e| LookupError::new(format!("pool {}", address), LookupStage::PairTokens, e))?;

        let (token0, token1) = tokio::try_join!(self.resolve_token(address0), self.resolve_token(address1))?;

        let pair = Pair::new(address, token0, token1);
        self.pairs_by_name.insert(pair.name.clone(), pair.clone());
        self.pairs_by_address.insert(address, pair.clone());
        Ok(pair)
    }

    /// Token metadata, from cache when already resolved
    pub async fn resolve_token(&self, address: Address) -> Result<Token, LookupError> {
        if let Some(token) = self.tokens.get(&address) {
            return Ok(token.clone());
        }

        let target = format!("token {}", address);
        let (symbol, name, decimals) = tokio::join!(
            self.client.token_symbol(address),
            self.client.token_name(address),
            self.client.token_decimals(address),
        );
        let token = Token {
            address,
            symbol: symbol.map_err(|e| LookupError::new(&target, LookupStage::TokenSymbol, e))?,
            name: name.map_err(|e| LookupError::new(&target, LookupStage::TokenName, e))?,
            decimals: decimals.map_err(|e| LookupError::new(&target, LookupStage::TokenDecimals, e))?,
        };
        self.tokens.insert(address, token.clone());
        Ok(token)
    }

    /// Resolve every pair the factory knows.
    ///
    /// Resolutions run at most `discovery_concurrency` at a time. A pair
    /// that fails to resolve is logged and left out; only a failed pair
    /// count fails the call. Result is in factory index order.
    pub async fn list_all_pairs(&self) -> Result<Vec<Pair>, LookupError> {
        let count = self.pair_count().await?;
        info!("Found {} pairs on factory {:?}", count, self.factory);

        let pairs: Vec<Pair> = stream::iter(0..count)
            .map(|index| async move { (index, self.resolve_pair_by_index(index).await) })
            .buffered(self.discovery_concurrency)
            .filter_map(|(index, result)| async move {
                match result {
                    Ok(pair) => Some(pair),
                    Err(e) => {
                        warn!("error retrieving pair by ID {}: {}", index, e);
                        None
                    }
                }
            })
            .collect()
            .await;

        info!("Resolved {}/{} pairs", pairs.len(), count);
        Ok(pairs)
    }

    pub fn cached_pair(&self, address: &Address) -> Option<Pair> {
        self.pairs_by_address.get(address).map(|entry| entry.clone())
    }

    /// Lookup by pool-order display name ("symbol0-symbol1")
    pub fn pair_by_name(&self, name: &str) -> Option<Pair> {
        self.pairs_by_name.get(name).map(|entry| entry.clone())
    }

    /// (tokens, pairs) currently cached
    pub fn stats(&self) -> (usize, usize) {
        (self.tokens.len(), self.pairs_by_address.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ChainError;
    use crate::testing::{addr, MockChainClient};
    use std::sync::atomic::Ordering;

    fn client() -> MockChainClient {
        MockChainClient::new(1_000)
            .with_token(addr(10), "UNI", 18)
            .with_token(addr(11), "WETH", 18)
            .with_token(addr(12), "USDC", 6)
            .with_pair(addr(1), addr(10), addr(11))
            .with_pair(addr(2), addr(12), addr(11))
    }

    #[tokio::test]
    async fn test_resolve_pair_by_index() {
        let registry = PairRegistry::new(Arc::new(client()), addr(0xff));
        let pair = registry.resolve_pair_by_index(1).await.unwrap();
        assert_eq!(pair.address, addr(2));
        assert_eq!(pair.name, "USDC-WETH");
        assert_eq!(pair.token0.decimals, 6);
        assert_eq!(pair.token1.decimals, 18);
        assert_eq!(pair.token0.name, "USDC Token");
    }

    #[tokio::test]
    async fn test_resolution_is_cached() {
        let client = Arc::new(client());
        let registry = PairRegistry::new(Arc::clone(&client), addr(0xff));
        registry.resolve_pair_by_address(addr(1)).await.unwrap();
        let calls = client.metadata_calls.load(Ordering::SeqCst);
        registry.resolve_pair_by_index(0).await.unwrap();
        assert_eq!(client.metadata_calls.load(Ordering::SeqCst), calls);
        assert!(registry.pair_by_name("UNI-WETH").is_some());
        assert_eq!(registry.stats(), (2, 1));
    }

    #[tokio::test]
    async fn test_failed_token_read_is_not_cached() {
        let mut mock = client();
        mock.failing_tokens.push(addr(10));
        let registry = PairRegistry::new(Arc::new(mock), addr(0xff));

        let err = registry.resolve_pair_by_address(addr(1)).await.unwrap_err();
        assert_eq!(err.stage, LookupStage::TokenSymbol);
        assert!(matches!(err.source, ChainError::Transient(_)));
        assert!(registry.cached_pair(&addr(1)).is_none());
        assert!(registry.pair_by_name("UNI-WETH").is_none());
    }

    #[tokio::test]
    async fn test_list_all_pairs_skips_failures() {
        // third pair points at a token with no contract
        let mock = client().with_pair(addr(3), addr(10), addr(99));
        let registry = PairRegistry::new(Arc::new(mock), addr(0xff)).with_discovery_concurrency(2);

        let pairs = registry.list_all_pairs().await.unwrap();
        let names: Vec<_> = pairs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["UNI-WETH", "USDC-WETH"]);
    }

    #[tokio::test]
    async fn test_pair_count_failure_propagates() {
        let mock = client();
        mock.close();
        let registry = PairRegistry::new(Arc::new(mock), addr(0xff));
        let err = registry.list_all_pairs().await.unwrap_err();
        assert_eq!(err.stage, LookupStage::PairCount);
        assert_eq!(err.source, ChainError::Closed);
    }
}
