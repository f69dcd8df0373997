//! alloy-backed ChainClient
//!
//! Wraps an erased alloy provider (HTTP or WebSocket). Contract reads go
//! through the `sol!` bindings in `contracts`; log queries use a plain
//! eth_getLogs filter on the V2 `Swap` topic.

use crate::chain::ChainClient;
use crate::contracts::{IUniswapV2Factory, IUniswapV2Pair, IERC20};
use crate::errors::ChainError;
use crate::types::RawSwapEvent;
use alloy::primitives::{Address, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub struct AlloyChainClient {
    provider: DynProvider,
    label: String,
    closed: AtomicBool,
}

impl AlloyChainClient {
    /// Dial over HTTP and verify the connection with a head-block read
    pub async fn connect_http(url: &str, label: &str) -> Result<Self> {
        let provider = ProviderBuilder::new()
            .connect_http(url.parse().with_context(|| format!("Invalid RPC URL for {}", label))?)
            .erased();
        Self::verified(provider, label).await
    }

    /// Dial over WebSocket and verify the connection with a head-block read
    pub async fn connect_ws(url: &str, label: &str) -> Result<Self> {
        let provider = ProviderBuilder::new()
            .connect_ws(WsConnect::new(url))
            .await
            .with_context(|| format!("Failed to dial {} websocket", label))?
            .erased();
        Self::verified(provider, label).await
    }

    async fn verified(provider: DynProvider, label: &str) -> Result<Self> {
        let head = provider
            .get_block_number()
            .await
            .with_context(|| format!("Failed to connect {} client", label))?;
        info!("{} client connected, head block {}", label, head);
        Ok(Self {
            provider,
            label: label.to_string(),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), ChainError> {
        if self.closed.load(Ordering::Acquire) {
            Err(ChainError::Closed)
        } else {
            Ok(())
        }
    }

    fn decode_swap(log: &Log) -> Result<RawSwapEvent, ChainError> {
        let decoded = log
            .log_decode::<IUniswapV2Pair::Swap>()
            .map_err(|e| ChainError::Decode(e.to_string()))?;
        let swap = &decoded.inner.data;
        Ok(RawSwapEvent {
            tx_hash: log.transaction_hash.unwrap_or_default(),
            block_number: log
                .block_number
                .ok_or_else(|| ChainError::Decode("log without block number".to_string()))?,
            log_index: log.log_index.unwrap_or_default(),
            pool: log.address(),
            amount0_in: swap.amount0In,
            amount0_out: swap.amount0Out,
            amount1_in: swap.amount1In,
            amount1_out: swap.amount1Out,
        })
    }
}

fn rpc_error(e: impl std::fmt::Display) -> ChainError {
    ChainError::from_rpc_message(e.to_string())
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn latest_block(&self) -> Result<u64, ChainError> {
        self.ensure_open()?;
        self.provider.get_block_number().await.map_err(rpc_error)
    }

    async fn pair_count(&self, factory: Address) -> Result<u64, ChainError> {
        self.ensure_open()?;
        let count = IUniswapV2Factory::new(factory, &self.provider)
            .allPairsLength()
            .call()
            .await
            .map_err(rpc_error)?;
        u64::try_from(count).map_err(|_| ChainError::Decode(format!("pair count {} overflows u64", count)))
    }

    async fn pair_address(&self, factory: Address, index: u64) -> Result<Address, ChainError> {
        self.ensure_open()?;
        IUniswapV2Factory::new(factory, &self.provider)
            .allPairs(U256::from(index))
            .call()
            .await
            .map_err(rpc_error)
    }

    async fn pair_tokens(&self, pool: Address) -> Result<(Address, Address), ChainError> {
        self.ensure_open()?;
        let pair = IUniswapV2Pair::new(pool, &self.provider);
        let token0_call = pair.token0();
        let token1_call = pair.token1();
        let (token0, token1) = tokio::join!(token0_call.call(), token1_call.call());
        Ok((token0.map_err(rpc_error)?, token1.map_err(rpc_error)?))
    }

    async fn token_symbol(&self, token: Address) -> Result<String, ChainError> {
        self.ensure_open()?;
        IERC20::new(token, &self.provider)
            .symbol()
            .call()
            .await
            .map_err(rpc_error)
    }

    async fn token_name(&self, token: Address) -> Result<String, ChainError> {
        self.ensure_open()?;
        IERC20::new(token, &self.provider)
            .name()
            .call()
            .await
            .map_err(rpc_error)
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError> {
        self.ensure_open()?;
        IERC20::new(token, &self.provider)
            .decimals()
            .call()
            .await
            .map_err(rpc_error)
    }

    async fn swap_logs(&self, pool: Address, from: u64, to: u64) -> Result<Vec<RawSwapEvent>, ChainError> {
        self.ensure_open()?;
        debug!("{}: eth_getLogs {:?} blocks {}-{}", self.label, pool, from, to);

        let filter = Filter::new()
            .address(pool)
            .event_signature(IUniswapV2Pair::Swap::SIGNATURE_HASH)
            .from_block(from)
            .to_block(to);

        let logs = self.provider.get_logs(&filter).await.map_err(rpc_error)?;

        let mut swaps = Vec::with_capacity(logs.len());
        for log in &logs {
            match Self::decode_swap(log) {
                Ok(swap) => swaps.push(swap),
                // malformed logs are dropped, never retried
                Err(e) => warn!("{}: skipping undecodable log in blocks {}-{}: {}", self.label, from, to, e),
            }
        }
        Ok(swaps)
    }

    async fn block_timestamp(&self, block: u64) -> Result<Option<u64>, ChainError> {
        self.ensure_open()?;
        let header = self
            .provider
            .get_block_by_number(block.into())
            .await
            .map_err(rpc_error)?;
        Ok(header.map(|b| b.header.timestamp))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("{} client closed", self.label);
        }
    }
}
