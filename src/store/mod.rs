//! Block metadata store
//!
//! Resolves a block number to its header timestamp. Sources stack:
//! `BlockCache` in front of `PostgresBlockStore` (or `ChainBlockSource`
//! when no database is configured).

pub mod postgres;
pub mod resilient;

pub use postgres::{BlockTable, PgBlockTable, PgConnector, PostgresBlockStore, PostgresConnectOptions};
pub use resilient::{Connector, ResilientConnection};

use crate::chain::ChainClient;
use crate::errors::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub number: u64,
    /// Unix seconds
    pub timestamp: u64,
}

#[async_trait]
pub trait BlockSource: Send + Sync + 'static {
    async fn block_metadata(&self, number: u64) -> Result<BlockMetadata, StoreError>;
}

#[async_trait]
impl<S: BlockSource + ?Sized> BlockSource for Arc<S> {
    async fn block_metadata(&self, number: u64) -> Result<BlockMetadata, StoreError> {
        (**self).block_metadata(number).await
    }
}

// ── Chain-backed source ─────────────────────────────────────────────────

/// Reads the header straight from the node
pub struct ChainBlockSource<C> {
    client: Arc<C>,
}

impl<C: ChainClient> ChainBlockSource<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: ChainClient> BlockSource for ChainBlockSource<C> {
    async fn block_metadata(&self, number: u64) -> Result<BlockMetadata, StoreError> {
        match self.client.block_timestamp(number).await? {
            Some(timestamp) => Ok(BlockMetadata { number, timestamp }),
            None => Err(StoreError::MissingBlock(number)),
        }
    }
}

// ── Per-block cache ─────────────────────────────────────────────────────

/// Memoizes successful lookups for the process lifetime. Failures are
/// not cached, so a later lookup of the same block tries again.
pub struct BlockCache<S> {
    inner: S,
    blocks: DashMap<u64, BlockMetadata>,
}

impl<S: BlockSource> BlockCache<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            blocks: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[async_trait]
impl<S: BlockSource> BlockSource for BlockCache<S> {
    async fn block_metadata(&self, number: u64) -> Result<BlockMetadata, StoreError> {
        if let Some(meta) = self.blocks.get(&number) {
            return Ok(*meta);
        }
        let meta = self.inner.block_metadata(number).await?;
        debug!("cached block {} at {}", number, meta.timestamp);
        self.blocks.insert(number, meta);
        Ok(meta)
    }
}
