//! Scripted collaborators for unit tests

use crate::chain::ChainClient;
use crate::errors::{ChainError, StoreError};
use crate::store::{BlockMetadata, BlockSource};
use crate::types::RawSwapEvent;
use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn addr(n: u8) -> Address {
    Address::with_last_byte(n)
}

pub fn swap(pool: Address, block: u64, a0_in: u128, a0_out: u128, a1_in: u128, a1_out: u128) -> RawSwapEvent {
    RawSwapEvent {
        tx_hash: B256::with_last_byte(block as u8),
        block_number: block,
        log_index: 0,
        pool,
        amount0_in: U256::from(a0_in),
        amount0_out: U256::from(a0_out),
        amount1_in: U256::from(a1_in),
        amount1_out: U256::from(a1_out),
    }
}

#[derive(Clone)]
pub struct MockToken {
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

/// In-memory node. Log queries consume scripted failures first, then
/// answer from the stored swaps; every queried window is recorded.
#[derive(Default)]
pub struct MockChainClient {
    pub head: u64,
    pub pairs: Vec<Address>,
    pub pair_tokens: HashMap<Address, (Address, Address)>,
    pub tokens: HashMap<Address, MockToken>,
    pub swaps: Vec<RawSwapEvent>,
    pub timestamps: HashMap<u64, u64>,
    /// Windows wider than this fail with `ResultTooLarge`
    pub max_window: Option<u64>,
    pub log_failures: Mutex<VecDeque<ChainError>>,
    pub failing_tokens: Vec<Address>,
    pub queried: Mutex<Vec<(u64, u64)>>,
    pub metadata_calls: AtomicUsize,
    pub closed: AtomicBool,
}

impl MockChainClient {
    pub fn new(head: u64) -> Self {
        Self {
            head,
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: Address, symbol: &str, decimals: u8) -> Self {
        self.tokens.insert(
            token,
            MockToken {
                symbol: symbol.to_string(),
                name: format!("{} Token", symbol),
                decimals,
            },
        );
        self
    }

    pub fn with_pair(mut self, pool: Address, token0: Address, token1: Address) -> Self {
        self.pairs.push(pool);
        self.pair_tokens.insert(pool, (token0, token1));
        self
    }

    pub fn with_swaps(mut self, swaps: Vec<RawSwapEvent>) -> Self {
        self.swaps.extend(swaps);
        self
    }

    pub fn with_timestamp(mut self, block: u64, ts: u64) -> Self {
        self.timestamps.insert(block, ts);
        self
    }

    pub fn fail_next_logs(&self, errors: Vec<ChainError>) {
        self.log_failures.lock().unwrap().extend(errors);
    }

    pub fn queried_windows(&self) -> Vec<(u64, u64)> {
        self.queried.lock().unwrap().clone()
    }

    fn check_open(&self) -> Result<(), ChainError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ChainError::Closed)
        } else {
            Ok(())
        }
    }

    fn token(&self, token: Address) -> Result<&MockToken, ChainError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_tokens.contains(&token) {
            return Err(ChainError::Transient("execution reverted".to_string()));
        }
        self.tokens
            .get(&token)
            .ok_or_else(|| ChainError::Transient(format!("no contract at {}", token)))
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn latest_block(&self) -> Result<u64, ChainError> {
        self.check_open()?;
        Ok(self.head)
    }

    async fn pair_count(&self, _factory: Address) -> Result<u64, ChainError> {
        self.check_open()?;
        Ok(self.pairs.len() as u64)
    }

    async fn pair_address(&self, _factory: Address, index: u64) -> Result<Address, ChainError> {
        self.check_open()?;
        self.pairs
            .get(index as usize)
            .copied()
            .ok_or_else(|| ChainError::Transient(format!("allPairs({}) reverted", index)))
    }

    async fn pair_tokens(&self, pool: Address) -> Result<(Address, Address), ChainError> {
        self.check_open()?;
        self.pair_tokens
            .get(&pool)
            .copied()
            .ok_or_else(|| ChainError::Transient(format!("no pool at {}", pool)))
    }

    async fn token_symbol(&self, token: Address) -> Result<String, ChainError> {
        self.check_open()?;
        self.token(token).map(|t| t.symbol.clone())
    }

    async fn token_name(&self, token: Address) -> Result<String, ChainError> {
        self.check_open()?;
        self.token(token).map(|t| t.name.clone())
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError> {
        self.check_open()?;
        self.token(token).map(|t| t.decimals)
    }

    async fn swap_logs(&self, pool: Address, from: u64, to: u64) -> Result<Vec<RawSwapEvent>, ChainError> {
        self.check_open()?;
        self.queried.lock().unwrap().push((from, to));
        if let Some(err) = self.log_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if let Some(max) = self.max_window {
            if to - from + 1 > max {
                return Err(ChainError::from_rpc_message("query returned more than 10000 results"));
            }
        }
        Ok(self
            .swaps
            .iter()
            .filter(|s| s.pool == pool && s.block_number >= from && s.block_number <= to)
            .cloned()
            .collect())
    }

    async fn block_timestamp(&self, block: u64) -> Result<Option<u64>, ChainError> {
        self.check_open()?;
        Ok(self.timestamps.get(&block).copied())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Block source answering `timestamp = base + block * 12`, counting lookups
pub struct MockBlockSource {
    pub base: u64,
    pub missing: Vec<u64>,
    pub lookups: AtomicUsize,
}

impl MockBlockSource {
    pub fn new(base: u64) -> Self {
        Self {
            base,
            missing: Vec::new(),
            lookups: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BlockSource for MockBlockSource {
    async fn block_metadata(&self, number: u64) -> Result<BlockMetadata, StoreError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.missing.contains(&number) {
            return Err(StoreError::MissingBlock(number));
        }
        Ok(BlockMetadata {
            number,
            timestamp: self.base + number * 12,
        })
    }
}
