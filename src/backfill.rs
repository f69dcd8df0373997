//! Backfill Scheduler
//!
//! Reads the chain head once, snapshots the registered pairs and runs
//! `concurrency` workers over them. Worker `k` owns snapshot positions
//! `k, k+n, k+2n, ...` and for each pair drives scan → normalize →
//! filter → emit from `from_block` to the captured head.
//!
//! Registered pairs are resolved through their pool address, so the
//! factory is never enumerated here. A pair that fails to resolve, fails
//! the blacklist, or was withdrawn before its turn is skipped. Scan
//! failures end that pair only; the scheduler reports counts, not errors.

use crate::chain::ChainClient;
use crate::emitter::TradeSink;
use crate::errors::{ChainError, NormalizeError};
use crate::filters::PairFilter;
use crate::normalizer::SwapNormalizer;
use crate::scanner::{shutdown_requested, ScanPolicy, WindowedScanner};
use crate::store::BlockSource;
use crate::types::ExchangePair;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub from_block: u64,
    /// Upper bound; clamped to the head block read at start
    pub to_block: Option<u64>,
    pub concurrency: usize,
    pub launch_delay: Duration,
    pub scan: ScanPolicy,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            from_block: 0,
            to_block: None,
            concurrency: DEFAULT_CONCURRENCY,
            launch_delay: Duration::from_millis(500),
            scan: ScanPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillStats {
    pub pairs_scanned: u64,
    pub pairs_skipped: u64,
    pub swaps_seen: u64,
    pub trades_emitted: u64,
    pub trades_dropped: u64,
    pub scan_failures: u64,
}

impl BackfillStats {
    pub fn merge(&mut self, other: &BackfillStats) {
        self.pairs_scanned += other.pairs_scanned;
        self.pairs_skipped += other.pairs_skipped;
        self.swaps_seen += other.swaps_seen;
        self.trades_emitted += other.trades_emitted;
        self.trades_dropped += other.trades_dropped;
        self.scan_failures += other.scan_failures;
    }
}

pub struct BackfillScheduler<C, S> {
    client: Arc<C>,
    scanner: WindowedScanner<C>,
    normalizer: Arc<SwapNormalizer<C, S>>,
    filter: Arc<PairFilter>,
    registrations: Arc<DashMap<String, ExchangePair>>,
    sink: TradeSink,
    shutdown: watch::Receiver<bool>,
    config: BackfillConfig,
}

enum PairOutcome {
    Done,
    /// Consumer gone or shutdown requested
    Stop,
}

impl<C: ChainClient, S: BlockSource> BackfillScheduler<C, S> {
    pub fn new(
        client: Arc<C>,
        normalizer: Arc<SwapNormalizer<C, S>>,
        filter: Arc<PairFilter>,
        registrations: Arc<DashMap<String, ExchangePair>>,
        sink: TradeSink,
        shutdown: watch::Receiver<bool>,
        config: BackfillConfig,
    ) -> Self {
        let scanner = WindowedScanner::new(Arc::clone(&client), config.scan.clone(), shutdown.clone());
        Self {
            client,
            scanner,
            normalizer,
            filter,
            registrations,
            sink,
            shutdown,
            config,
        }
    }

    /// Run every worker to completion and return the summed counts.
    /// Only a failed head read fails the call.
    pub async fn run(self) -> Result<BackfillStats, ChainError> {
        let started = Instant::now();
        let head = self.client.latest_block().await?;
        let end = self.config.to_block.map_or(head, |to| to.min(head));
        let start = self.config.from_block;

        let mut pairs: Vec<ExchangePair> = self.registrations.iter().map(|entry| entry.value().clone()).collect();
        pairs.sort_by(|a, b| a.foreign_name.cmp(&b.foreign_name));
        let pairs = Arc::new(pairs);
        let workers = self.config.concurrency.max(1).min(pairs.len().max(1));

        info!(
            "Backfill: {} registered pairs, blocks {}-{} (head {}), {} workers",
            pairs.len(),
            start,
            end,
            head,
            workers
        );

        let scheduler = Arc::new(self);
        let mut shutdown = scheduler.shutdown.clone();
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            if worker > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(scheduler.config.launch_delay) => {}
                    _ = shutdown_requested(&mut shutdown) => break,
                }
            }
            let s = Arc::clone(&scheduler);
            let pairs = Arc::clone(&pairs);
            handles.push(tokio::spawn(async move {
                s.run_worker(worker, workers, &pairs, start, end).await
            }));
        }
        drop(scheduler);

        let mut total = BackfillStats::default();
        for result in futures::future::join_all(handles).await {
            match result {
                Ok(stats) => total.merge(&stats),
                Err(e) => error!("backfill worker panicked: {}", e),
            }
        }

        info!("===========================================");
        info!("   Backfill Complete");
        info!("===========================================");
        info!("Pairs scanned:   {}", total.pairs_scanned);
        info!("Pairs skipped:   {}", total.pairs_skipped);
        info!("Swaps seen:      {}", total.swaps_seen);
        info!("Trades emitted:  {}", total.trades_emitted);
        info!("Trades dropped:  {}", total.trades_dropped);
        info!("Scan failures:   {}", total.scan_failures);
        info!("Duration:        {:.1}s", started.elapsed().as_secs_f64());
        Ok(total)
    }

    async fn run_worker(
        &self,
        worker: usize,
        workers: usize,
        pairs: &[ExchangePair],
        start: u64,
        end: u64,
    ) -> BackfillStats {
        let mut stats = BackfillStats::default();
        for summary in pairs.iter().skip(worker).step_by(workers) {
            if *self.shutdown.borrow() {
                break;
            }
            if let PairOutcome::Stop = self.backfill_pair(summary, start, end, &mut stats).await {
                break;
            }
        }
        info!(
            "worker {} done: {} pairs scanned, {} trades emitted",
            worker, stats.pairs_scanned, stats.trades_emitted
        );
        stats
    }

    async fn backfill_pair(&self, summary: &ExchangePair, start: u64, end: u64, stats: &mut BackfillStats) -> PairOutcome {
        if !self.registrations.contains_key(&summary.foreign_name) {
            debug!("pair {} withdrawn", summary.foreign_name);
            stats.pairs_skipped += 1;
            return PairOutcome::Done;
        }
        let pair = match self.normalizer.registry().resolve_pair_by_address(summary.address).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("error getting pair {} at {:?}: {}", summary.foreign_name, summary.address, e);
                stats.pairs_skipped += 1;
                return PairOutcome::Done;
            }
        };
        if let Some(reason) = self.filter.check(&pair) {
            info!("skip pair {}: {}", pair.name, reason);
            stats.pairs_skipped += 1;
            return PairOutcome::Done;
        }
        let pair = self.normalizer.references().canonicalize(pair);
        if pair.name != summary.foreign_name {
            debug!("pair {} registered as {}", pair.name, summary.foreign_name);
        }

        info!("scanning {} ({:?}) blocks {}-{}", pair.name, pair.address, start, end);
        stats.pairs_scanned += 1;

        let mut swaps = self.scanner.scan(pair.address, start, end);
        while let Some(item) = swaps.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    error!("scan of {} stopped: {}", pair.name, e);
                    stats.scan_failures += 1;
                    return PairOutcome::Done;
                }
            };
            stats.swaps_seen += 1;

            let trade = match self.normalizer.normalize(&event).await {
                Ok(trade) => trade,
                Err(NormalizeError::ZeroPrice(tx)) => {
                    info!("{}: price 0 in tx {}, dropped", pair.name, tx);
                    stats.trades_dropped += 1;
                    continue;
                }
                Err(e) => {
                    warn!("{} block {}: {}", pair.name, event.block_number, e);
                    stats.trades_dropped += 1;
                    continue;
                }
            };
            if !self.filter.admits_trade(&trade) {
                stats.trades_dropped += 1;
                continue;
            }

            let mut shutdown = self.shutdown.clone();
            tokio::select! {
                sent = self.sink.emit(trade) => {
                    if !sent {
                        warn!("trade consumer gone, stopping");
                        return PairOutcome::Stop;
                    }
                    stats.trades_emitted += 1;
                }
                _ = shutdown_requested(&mut shutdown) => return PairOutcome::Stop,
            }
        }
        PairOutcome::Done
    }
}
