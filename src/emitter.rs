//! Trade Emission Pipeline
//!
//! One bounded mpsc channel shared by every worker. `emit` waits for a free
//! slot, so a slow consumer throttles all producers alike. With the default
//! capacity of 1 a worker can be at most one trade ahead of the consumer.
//!
//! Order across workers is whatever the channel contention produces.

use crate::types::NormalizedTrade;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1;

/// Create the producer and consumer ends
pub fn trade_channel(capacity: usize) -> (TradeSink, TradeStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        TradeSink {
            tx,
            emitted: Arc::new(AtomicU64::new(0)),
        },
        TradeStream { rx },
    )
}

/// Producer end, cloned into each worker
#[derive(Clone)]
pub struct TradeSink {
    tx: mpsc::Sender<NormalizedTrade>,
    emitted: Arc<AtomicU64>,
}

impl TradeSink {
    /// Wait until the consumer has room. Returns false once the consumer
    /// is gone.
    pub async fn emit(&self, trade: NormalizedTrade) -> bool {
        if self.tx.send(trade).await.is_err() {
            return false;
        }
        self.emitted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Trades accepted by the channel across all clones
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer end. Ends after every sink has been dropped.
pub struct TradeStream {
    rx: mpsc::Receiver<NormalizedTrade>,
}

impl TradeStream {
    pub async fn recv(&mut self) -> Option<NormalizedTrade> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> ReceiverStream<NormalizedTrade> {
        ReceiverStream::new(self.rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Asset;
    use chrono::DateTime;
    use futures::StreamExt;
    use std::time::Duration;

    fn trade(block: u64) -> NormalizedTrade {
        let asset = |symbol: &str| Asset {
            address: String::new(),
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            decimals: 18,
            blockchain: "Ethereum".to_string(),
        };
        NormalizedTrade {
            symbol: "UNI".to_string(),
            pair: "UNI-WETH".to_string(),
            price: 0.004,
            volume: 10.0,
            base_token: asset("UNI"),
            quote_token: asset("WETH"),
            time: DateTime::from_timestamp(1_600_000_000, 0).unwrap(),
            block_number: block,
            foreign_trade_id: format!("0x{:x}", block),
            source: "UniswapV2".to_string(),
            verified_pair: true,
        }
    }

    #[tokio::test]
    async fn test_emit_and_receive_in_order() {
        let (sink, stream) = trade_channel(4);
        for b in [1, 2, 3] {
            assert!(sink.emit(trade(b)).await);
        }
        drop(sink);

        let blocks: Vec<u64> = stream.into_stream().map(|t| t.block_number).collect().await;
        assert_eq!(blocks, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_full_channel_blocks_producer() {
        let (sink, mut stream) = trade_channel(DEFAULT_CHANNEL_CAPACITY);
        assert!(sink.emit(trade(1)).await);

        let blocked = tokio::time::timeout(Duration::from_millis(20), sink.emit(trade(2))).await;
        assert!(blocked.is_err(), "second emit should wait for the consumer");

        assert_eq!(stream.recv().await.map(|t| t.block_number), Some(1));
        assert!(sink.emit(trade(3)).await);
        assert_eq!(stream.recv().await.map(|t| t.block_number), Some(3));
        assert_eq!(sink.emitted(), 2);
    }

    #[tokio::test]
    async fn test_emit_after_consumer_dropped() {
        let (sink, stream) = trade_channel(1);
        drop(stream);
        assert!(sink.is_closed());
        assert!(!sink.emit(trade(1)).await);
        assert_eq!(sink.emitted(), 0);
    }

    #[tokio::test]
    async fn test_clones_share_counter() {
        let (sink, mut stream) = trade_channel(8);
        let other = sink.clone();
        sink.emit(trade(1)).await;
        other.emit(trade(2)).await;
        assert_eq!(sink.emitted(), 2);
        drop((sink, other));
        assert!(stream.recv().await.is_some());
        assert!(stream.recv().await.is_some());
        assert!(stream.recv().await.is_none());
    }
}
