//! Swap Normalizer
//!
//! Turns a raw `Swap` log into a `NormalizedTrade`:
//!
//! 1. pool address → cached `Pair`, canonicalized so the reference token
//!    is the quote (raw amounts are swapped along when the pair flips)
//! 2. each amount scaled by its token's decimals
//! 3. price = quote per base, volume = signed base amount
//! 4. block number → timestamp via the block store
//! 5. re-quote when the quote token is on the reverse list
//!
//! Every failure is per event; the caller logs it and keeps scanning.

use crate::chain::ChainClient;
use crate::errors::NormalizeError;
use crate::filters::{ReferenceTokens, ReverseTokens};
use crate::registry::PairRegistry;
use crate::store::BlockSource;
use crate::types::{Asset, Exchange, NormalizedTrade, RawSwapEvent};
use alloy::primitives::utils::format_units;
use alloy::primitives::U256;
use chrono::DateTime;
use std::sync::Arc;

/// `raw / 10^decimals` as the nearest f64.
///
/// `format_units` renders the exact decimal text, so large raw amounts
/// never overflow and representable ratios come out exact. Fails for
/// more than 77 decimals.
pub fn scale_amount(raw: U256, decimals: u8) -> Result<f64, NormalizeError> {
    let unit_error = |reason: String| NormalizeError::UnitScaling { decimals, reason };
    format_units(raw, decimals)
        .map_err(|e| unit_error(e.to_string()))?
        .parse::<f64>()
        .map_err(|e| unit_error(e.to_string()))
}

/// Scaled amounts of one swap, already in base/quote orientation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwapAmounts {
    pub base_in: f64,
    pub base_out: f64,
    pub quote_in: f64,
    pub quote_out: f64,
}

impl SwapAmounts {
    /// `(price, volume)`, or `None` when the base side did not move in
    /// exactly one direction.
    ///
    /// - base left the pool: bought `base_out` for `quote_in`, volume > 0
    /// - base entered the pool: sold `base_in` for `quote_out`, volume < 0
    pub fn price_volume(&self) -> Option<(f64, f64)> {
        let (price, volume) = match (self.base_in > 0.0, self.base_out > 0.0) {
            (false, true) => (self.quote_in / self.base_out, self.base_out),
            (true, false) => (self.quote_out / self.base_in, -self.base_in),
            _ => return None,
        };
        price.is_finite().then_some((price, volume))
    }
}

pub struct SwapNormalizer<C, S> {
    registry: Arc<PairRegistry<C>>,
    blocks: S,
    references: ReferenceTokens,
    reverse: ReverseTokens,
    exchange: Exchange,
}

impl<C: ChainClient, S: BlockSource> SwapNormalizer<C, S> {
    pub fn new(
        registry: Arc<PairRegistry<C>>,
        blocks: S,
        references: ReferenceTokens,
        reverse: ReverseTokens,
        exchange: Exchange,
    ) -> Self {
        Self {
            registry,
            blocks,
            references,
            reverse,
            exchange,
        }
    }

    pub fn registry(&self) -> &Arc<PairRegistry<C>> {
        &self.registry
    }

    pub fn references(&self) -> &ReferenceTokens {
        &self.references
    }

    pub async fn normalize(&self, event: &RawSwapEvent) -> Result<NormalizedTrade, NormalizeError> {
        let pair = self
            .registry
            .resolve_pair_by_address(event.pool)
            .await
            .map_err(|e| NormalizeError::UnknownPool(event.pool, e))?;
        let pair = self.references.canonicalize(pair);
        let tx = format!("{:#x}", event.tx_hash);

        let (base, quote) = (&pair.token0, &pair.token1);
        let (base_in, base_out, quote_in, quote_out) = if pair.inverted {
            (event.amount1_in, event.amount1_out, event.amount0_in, event.amount0_out)
        } else {
            (event.amount0_in, event.amount0_out, event.amount1_in, event.amount1_out)
        };
        let amounts = SwapAmounts {
            base_in: scale_amount(base_in, base.decimals)?,
            base_out: scale_amount(base_out, base.decimals)?,
            quote_in: scale_amount(quote_in, quote.decimals)?,
            quote_out: scale_amount(quote_out, quote.decimals)?,
        };

        let (price, volume) = amounts.price_volume().ok_or_else(|| NormalizeError::AmbiguousSwap {
            tx: tx.clone(),
            base_in: amounts.base_in,
            base_out: amounts.base_out,
        })?;
        if price == 0.0 {
            return Err(NormalizeError::ZeroPrice(tx));
        }

        let block = self
            .blocks
            .block_metadata(event.block_number)
            .await
            .map_err(|source| NormalizeError::BlockLookup {
                block: event.block_number,
                source,
            })?;
        let time = i64::try_from(block.timestamp)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .ok_or(NormalizeError::InvalidTimestamp {
                block: event.block_number,
                timestamp: block.timestamp,
            })?;

        let blockchain = self.exchange.blockchain();
        let trade = NormalizedTrade {
            symbol: base.symbol.clone(),
            pair: pair.name.clone(),
            price,
            volume,
            base_token: Asset::from_token(base, blockchain),
            quote_token: Asset::from_token(quote, blockchain),
            time,
            block_number: event.block_number,
            foreign_trade_id: tx.clone(),
            source: self.exchange.to_string(),
            verified_pair: true,
        };

        if self.reverse.contains(&quote.address) {
            return trade.reversed().ok_or(NormalizeError::ZeroPrice(tx));
        }
        Ok(trade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ChainError, LookupStage, StoreError};
    use crate::testing::{addr, swap, MockBlockSource, MockChainClient};

    const E18: u128 = 1_000_000_000_000_000_000;

    // pool 1: UNI(18)/USDC(6) in pool order, pool 2: WETH(18)/UNI(18) which flips
    fn registry() -> Arc<PairRegistry<MockChainClient>> {
        let client = MockChainClient::new(1_000)
            .with_token(addr(10), "UNI", 18)
            .with_token(addr(11), "USDC", 6)
            .with_token(addr(12), "WETH", 18)
            .with_pair(addr(1), addr(10), addr(11))
            .with_pair(addr(2), addr(12), addr(10));
        Arc::new(PairRegistry::new(Arc::new(client), addr(0xff)))
    }

    fn normalizer(reverse: ReverseTokens) -> SwapNormalizer<MockChainClient, MockBlockSource> {
        SwapNormalizer::new(
            registry(),
            MockBlockSource::new(1_600_000_000),
            ReferenceTokens::default(),
            reverse,
            Exchange::UniswapV2,
        )
    }

    #[test]
    fn test_scale_amount_exact() {
        assert_eq!(scale_amount(U256::from(E18), 18).unwrap(), 1.0);
        assert_eq!(scale_amount(U256::from(2_500_000u64), 6).unwrap(), 2.5);
        assert_eq!(scale_amount(U256::ZERO, 18).unwrap(), 0.0);
        assert_eq!(scale_amount(U256::from(42u64), 0).unwrap(), 42.0);
        assert_eq!(scale_amount(U256::from(5u64), 1).unwrap(), 0.5);
    }

    #[test]
    fn test_scale_amount_huge_values() {
        let v = scale_amount(U256::MAX, 18).unwrap();
        assert!(v.is_finite());
        assert!((v / 1.157920892373162e59 - 1.0).abs() < 1e-12);
        assert!(scale_amount(U256::from(1u64), 77).unwrap() > 0.0);
    }

    #[test]
    fn test_scale_amount_rejects_oversized_decimals() {
        let err = scale_amount(U256::from(1u64), 78).unwrap_err();
        assert!(matches!(err, NormalizeError::UnitScaling { decimals: 78, .. }));
        assert!(scale_amount(U256::from(1u64), 255).is_err());
    }

    #[test]
    fn test_price_volume_directions() {
        let bought = SwapAmounts {
            base_in: 0.0,
            base_out: 4.0,
            quote_in: 10.0,
            quote_out: 0.0,
        };
        assert_eq!(bought.price_volume(), Some((2.5, 4.0)));

        let sold = SwapAmounts {
            base_in: 4.0,
            base_out: 0.0,
            quote_in: 0.0,
            quote_out: 10.0,
        };
        assert_eq!(sold.price_volume(), Some((2.5, -4.0)));
    }

    #[test]
    fn test_price_volume_ambiguous() {
        let both = SwapAmounts {
            base_in: 1.0,
            base_out: 1.0,
            quote_in: 1.0,
            quote_out: 0.0,
        };
        assert_eq!(both.price_volume(), None);

        let neither = SwapAmounts {
            base_in: 0.0,
            base_out: 0.0,
            quote_in: 1.0,
            quote_out: 1.0,
        };
        assert_eq!(neither.price_volume(), None);
    }

    #[tokio::test]
    async fn test_normalize_sell() {
        // 1 UNI in, 2.5 USDC out
        let event = swap(addr(1), 100, E18, 0, 0, 2_500_000);
        let trade = normalizer(ReverseTokens::default()).normalize(&event).await.unwrap();

        assert_eq!(trade.symbol, "UNI");
        assert_eq!(trade.pair, "UNI-USDC");
        assert_eq!(trade.price, 2.5);
        assert_eq!(trade.volume, -1.0);
        assert_eq!(trade.base_token.symbol, "UNI");
        assert_eq!(trade.quote_token.symbol, "USDC");
        assert_eq!(trade.time.timestamp(), 1_600_000_000 + 1_200);
        assert_eq!(trade.block_number, 100);
        assert_eq!(trade.source, "UniswapV2");
        assert_eq!(trade.base_token.blockchain, "Ethereum");
        assert!(trade.verified_pair);
        assert!(trade.foreign_trade_id.starts_with("0x"));
    }

    #[tokio::test]
    async fn test_normalize_flipped_pool_swaps_amounts() {
        // pool order WETH/UNI: 0.01 WETH in (amount0), 4 UNI out (amount1)
        let event = swap(addr(2), 100, E18 / 100, 0, 0, 4 * E18);
        let trade = normalizer(ReverseTokens::default()).normalize(&event).await.unwrap();

        assert_eq!(trade.pair, "UNI-WETH");
        assert_eq!(trade.symbol, "UNI");
        assert_eq!(trade.price, 0.0025);
        assert_eq!(trade.volume, 4.0);
    }

    #[tokio::test]
    async fn test_reverse_rule_inverts_price() {
        let event = swap(addr(1), 100, E18, 0, 0, 2_500_000);
        let plain = normalizer(ReverseTokens::default()).normalize(&event).await.unwrap();
        let reversed = normalizer(ReverseTokens::new([addr(11)])).normalize(&event).await.unwrap();

        assert_eq!(reversed.base_token, plain.quote_token);
        assert_eq!(reversed.quote_token, plain.base_token);
        assert_eq!(reversed.symbol, "USDC");
        assert_eq!(reversed.pair, "USDC-UNI");
        assert_eq!(reversed.price, 1.0 / plain.price);
        assert_eq!(reversed.volume, 2.5);
        assert_eq!(reversed.time, plain.time);
    }

    #[tokio::test]
    async fn test_zero_price_rejected() {
        // UNI leaves the pool, nothing paid for it
        let event = swap(addr(1), 100, 0, E18, 0, 0);
        let err = normalizer(ReverseTokens::default()).normalize(&event).await.unwrap_err();
        assert!(matches!(err, NormalizeError::ZeroPrice(_)));
    }

    #[tokio::test]
    async fn test_ambiguous_swap_rejected() {
        let event = swap(addr(1), 100, E18, E18, 2_500_000, 0);
        let err = normalizer(ReverseTokens::default()).normalize(&event).await.unwrap_err();
        assert!(matches!(err, NormalizeError::AmbiguousSwap { base_in, base_out, .. } if base_in == 1.0 && base_out == 1.0));
    }

    #[tokio::test]
    async fn test_unknown_pool() {
        let event = swap(addr(9), 100, E18, 0, 0, 2_500_000);
        let err = normalizer(ReverseTokens::default()).normalize(&event).await.unwrap_err();
        match err {
            NormalizeError::UnknownPool(pool, lookup) => {
                assert_eq!(pool, addr(9));
                assert_eq!(lookup.stage, LookupStage::PairTokens);
                assert!(matches!(lookup.source, ChainError::Transient(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_block_lookup_failure() {
        let mut blocks = MockBlockSource::new(0);
        blocks.missing.push(100);
        let normalizer = SwapNormalizer::new(
            registry(),
            blocks,
            ReferenceTokens::default(),
            ReverseTokens::default(),
            Exchange::UniswapV2,
        );
        let event = swap(addr(1), 100, E18, 0, 0, 2_500_000);
        assert_eq!(
            normalizer.normalize(&event).await.unwrap_err(),
            NormalizeError::BlockLookup {
                block: 100,
                source: StoreError::MissingBlock(100)
            }
        );
    }

    #[tokio::test]
    async fn test_oversized_decimals_rejected() {
        let client = MockChainClient::new(1_000)
            .with_token(addr(10), "UNI", 18)
            .with_token(addr(14), "WIDE", 80)
            .with_pair(addr(4), addr(14), addr(10));
        let normalizer = SwapNormalizer::new(
            Arc::new(PairRegistry::new(Arc::new(client), addr(0xff))),
            MockBlockSource::new(0),
            ReferenceTokens::default(),
            ReverseTokens::default(),
            Exchange::UniswapV2,
        );
        let event = swap(addr(4), 100, E18, 0, 0, E18);
        let err = normalizer.normalize(&event).await.unwrap_err();
        assert!(matches!(err, NormalizeError::UnitScaling { decimals: 80, .. }));
    }
}
