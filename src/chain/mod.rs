//! Chain client boundary
//!
//! Everything the backfill needs from a node: factory/pair/token reads,
//! `Swap` log queries over a block range, and block headers. Errors come
//! back already classified (`ChainError::ResultTooLarge` vs `Transient`).

pub mod alloy_client;

pub use alloy_client::AlloyChainClient;

use crate::errors::ChainError;
use crate::types::RawSwapEvent;
use alloy::primitives::Address;
use async_trait::async_trait;

#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Current head block number
    async fn latest_block(&self) -> Result<u64, ChainError>;

    /// `allPairsLength()` on the factory
    async fn pair_count(&self, factory: Address) -> Result<u64, ChainError>;

    /// `allPairs(index)` on the factory
    async fn pair_address(&self, factory: Address, index: u64) -> Result<Address, ChainError>;

    /// `(token0(), token1())` on the pool
    async fn pair_tokens(&self, pool: Address) -> Result<(Address, Address), ChainError>;

    async fn token_symbol(&self, token: Address) -> Result<String, ChainError>;

    async fn token_name(&self, token: Address) -> Result<String, ChainError>;

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError>;

    /// All `Swap` logs of `pool` in the inclusive range `[from, to]`
    async fn swap_logs(&self, pool: Address, from: u64, to: u64) -> Result<Vec<RawSwapEvent>, ChainError>;

    /// Header timestamp (unix seconds), `None` if the node does not know the block
    async fn block_timestamp(&self, block: u64) -> Result<Option<u64>, ChainError>;

    /// Release the connection; later calls fail with `ChainError::Closed`
    fn close(&self);
}
