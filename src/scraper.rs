//! Scraper session
//!
//! `HistoryScraper` owns the remote clients, the pair registrations and
//! the trade channel. Lifecycle:
//!
//! ```text
//! Created --settle delay--> Running --close()--> ShuttingDown --ack--> Closed
//! ```
//!
//! The main loop starts at construction, waits the settle delay so callers
//! can register pairs through `scrape_pair`, runs one backfill, drops the
//! trade sink (ending the consumer stream) and acknowledges. `close()`
//! closes both clients, signals shutdown and waits for that acknowledgment.

use crate::backfill::{BackfillConfig, BackfillScheduler};
use crate::chain::ChainClient;
use crate::emitter::{trade_channel, TradeSink, TradeStream, DEFAULT_CHANNEL_CAPACITY};
use crate::errors::{ChainError, ScraperError};
use crate::filters::{PairFilter, ReferenceTokens, ReverseTokens};
use crate::normalizer::SwapNormalizer;
use crate::registry::{PairRegistry, DEFAULT_DISCOVERY_CONCURRENCY};
use crate::scanner::shutdown_requested;
use crate::store::{BlockCache, BlockSource};
use crate::types::{Exchange, ExchangePair};
use alloy::primitives::Address;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tracing::{error, info, warn};

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScraperStatus {
    Created,
    Running,
    ShuttingDown,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ScraperSettings {
    pub exchange: Exchange,
    pub factory: Address,
    pub backfill: BackfillConfig,
    /// Wait before the backfill starts, for pair registration
    pub settle_delay: Duration,
    pub channel_capacity: usize,
    pub discovery_concurrency: usize,
    /// `{"tokens": [...]}`; missing file means no reversals
    pub reverse_tokens_file: Option<PathBuf>,
    /// Start the main loop. Off for discovery-only sessions.
    pub scrape: bool,
}

impl ScraperSettings {
    pub fn for_exchange(exchange: Exchange) -> Self {
        Self {
            exchange,
            factory: exchange.default_factory(),
            backfill: BackfillConfig {
                from_block: exchange.default_genesis_block(),
                launch_delay: Duration::from_millis(exchange.default_launch_delay_ms()),
                ..Default::default()
            },
            settle_delay: DEFAULT_SETTLE_DELAY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            discovery_concurrency: DEFAULT_DISCOVERY_CONCURRENCY,
            reverse_tokens_file: None,
            scrape: true,
        }
    }
}

struct SessionState {
    status: ScraperStatus,
    error: Option<ScraperError>,
}

struct Session<C> {
    exchange: Exchange,
    rest: Arc<C>,
    ws: Option<Arc<C>>,
    registry: Arc<PairRegistry<C>>,
    filter: Arc<PairFilter>,
    references: ReferenceTokens,
    registrations: Arc<DashMap<String, ExchangePair>>,
    state: RwLock<SessionState>,
    shutdown: watch::Sender<bool>,
    done: Mutex<Option<oneshot::Receiver<()>>>,
}

impl<C: ChainClient> Session<C> {
    async fn record_error(&self, err: ScraperError) {
        self.state.write().await.error = Some(err);
    }

    async fn last_error(&self) -> Option<ScraperError> {
        self.state.read().await.error.clone()
    }
}

pub struct HistoryScraper<C> {
    session: Arc<Session<C>>,
    trades: Option<TradeStream>,
}

impl<C: ChainClient> HistoryScraper<C> {
    /// Build the session and, when `settings.scrape` is set, start the
    /// main loop. Must be called inside a tokio runtime.
    pub fn new<S: BlockSource>(
        rest: Arc<C>,
        ws: Option<Arc<C>>,
        blocks: S,
        filter: PairFilter,
        references: ReferenceTokens,
        settings: ScraperSettings,
    ) -> Self {
        let registry = Arc::new(
            PairRegistry::new(Arc::clone(&rest), settings.factory)
                .with_discovery_concurrency(settings.discovery_concurrency),
        );
        Self::with_registry(registry, rest, ws, blocks, filter, references, settings)
    }

    /// Same as `new`, reusing a registry that may already hold resolved pairs
    pub fn with_registry<S: BlockSource>(
        registry: Arc<PairRegistry<C>>,
        rest: Arc<C>,
        ws: Option<Arc<C>>,
        blocks: S,
        filter: PairFilter,
        references: ReferenceTokens,
        settings: ScraperSettings,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let (sink, trades) = trade_channel(settings.channel_capacity);
        let (ack, done) = if settings.scrape {
            let (ack, done) = oneshot::channel();
            (Some(ack), Some(done))
        } else {
            (None, None)
        };

        let session = Arc::new(Session {
            exchange: settings.exchange,
            rest,
            ws,
            registry,
            filter: Arc::new(filter),
            references,
            registrations: Arc::new(DashMap::new()),
            state: RwLock::new(SessionState {
                status: ScraperStatus::Created,
                error: None,
            }),
            shutdown,
            done: Mutex::new(done),
        });

        if let Some(ack) = ack {
            tokio::spawn(main_loop(Arc::clone(&session), blocks, sink, ack, settings));
        }

        Self {
            session,
            trades: Some(trades),
        }
    }

    /// Consumer end of the trade channel. Only the first call gets it.
    pub fn take_trades(&mut self) -> Option<TradeStream> {
        self.trades.take()
    }

    pub async fn status(&self) -> ScraperStatus {
        self.session.state.read().await.status
    }

    /// Last session-level error
    pub async fn error(&self) -> Option<ScraperError> {
        self.session.last_error().await
    }

    pub fn registry(&self) -> &Arc<PairRegistry<C>> {
        &self.session.registry
    }

    /// Register a pair for backfill under its canonical name.
    ///
    /// Fails with the recorded session error, if any, or when the session
    /// is shutting down.
    pub async fn scrape_pair(&self, pair: ExchangePair) -> Result<PairScraper<C>, ScraperError> {
        let state = self.session.state.read().await;
        if let Some(err) = &state.error {
            return Err(err.clone());
        }
        if matches!(state.status, ScraperStatus::ShuttingDown | ScraperStatus::Closed) {
            return Err(ScraperError::Closed);
        }
        self.session
            .registrations
            .insert(pair.foreign_name.clone(), pair.clone());
        info!("registered pair {}", pair.foreign_name);
        Ok(PairScraper {
            session: Arc::clone(&self.session),
            pair,
        })
    }

    /// Every resolvable pair on the factory that passes the blacklist,
    /// canonicalized and marked verified
    pub async fn fetch_available_pairs(&self) -> Result<Vec<ExchangePair>, ScraperError> {
        let session = &self.session;
        available_pairs(&session.registry, &session.filter, &session.references, session.exchange).await
    }

    /// Close both clients, stop the workers and wait for the main loop.
    ///
    /// Returns the last recorded error. A second call fails with
    /// `AlreadyClosed` and touches nothing.
    pub async fn close(&self) -> Result<(), ScraperError> {
        {
            let mut state = self.session.state.write().await;
            if matches!(state.status, ScraperStatus::ShuttingDown | ScraperStatus::Closed) {
                return Err(ScraperError::AlreadyClosed);
            }
            state.status = ScraperStatus::ShuttingDown;
        }

        self.session.rest.close();
        if let Some(ws) = &self.session.ws {
            ws.close();
        }
        self.session.shutdown.send_replace(true);

        let done = self.session.done.lock().await.take();
        if let Some(done) = done {
            if done.await.is_err() {
                warn!("main loop ended without acknowledging shutdown");
            }
        }

        let mut state = self.session.state.write().await;
        state.status = ScraperStatus::Closed;
        info!("{} scraper closed", self.session.exchange);
        match &state.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Resolve the factory's pairs, drop those failing the blacklist or
/// carrying a zero token address, and summarize the rest in canonical
/// orientation
pub async fn available_pairs<C: ChainClient>(
    registry: &PairRegistry<C>,
    filter: &PairFilter,
    references: &ReferenceTokens,
    exchange: Exchange,
) -> Result<Vec<ExchangePair>, ScraperError> {
    let pairs = registry.list_all_pairs().await?;
    let name = exchange.to_string();
    let blockchain = exchange.blockchain();

    let available: Vec<ExchangePair> = pairs
        .into_iter()
        .filter(|pair| {
            if pair.token0.address == Address::ZERO || pair.token1.address == Address::ZERO {
                return false;
            }
            match filter.check(pair) {
                Some(reason) => {
                    info!("skip pair {}: {}", pair.name, reason);
                    false
                }
                None => true,
            }
        })
        .map(|pair| ExchangePair::from_pair(&references.canonicalize(pair), &name, blockchain))
        .collect();

    info!("{} available pairs on {}", available.len(), name);
    Ok(available)
}

async fn main_loop<C: ChainClient, S: BlockSource>(
    session: Arc<Session<C>>,
    blocks: S,
    sink: TradeSink,
    ack: oneshot::Sender<()>,
    settings: ScraperSettings,
) {
    let reverse = settings
        .reverse_tokens_file
        .as_ref()
        .map(ReverseTokens::load_or_empty)
        .unwrap_or_default();

    let mut shutdown = session.shutdown.subscribe();
    let settled = tokio::select! {
        _ = tokio::time::sleep(settings.settle_delay) => true,
        _ = shutdown_requested(&mut shutdown) => false,
    };

    if settled {
        {
            let mut state = session.state.write().await;
            if state.status == ScraperStatus::Created {
                state.status = ScraperStatus::Running;
            }
        }
        run_backfill(&session, blocks, sink, reverse, shutdown, settings).await;
    }

    let _ = ack.send(());
}

async fn run_backfill<C: ChainClient, S: BlockSource>(
    session: &Arc<Session<C>>,
    blocks: S,
    sink: TradeSink,
    reverse: ReverseTokens,
    shutdown: watch::Receiver<bool>,
    settings: ScraperSettings,
) {
    if session.registrations.is_empty() {
        error!("no pairs to scrape provided");
        session.record_error(ScraperError::NoPairs).await;
        return;
    }

    info!(
        "{}: backfilling {} registered pairs, {} reverse tokens",
        session.exchange,
        session.registrations.len(),
        reverse.len()
    );

    let normalizer = Arc::new(SwapNormalizer::new(
        Arc::clone(&session.registry),
        BlockCache::new(blocks),
        session.references.clone(),
        reverse,
        session.exchange,
    ));
    let scheduler = BackfillScheduler::new(
        Arc::clone(&session.rest),
        normalizer,
        Arc::clone(&session.filter),
        Arc::clone(&session.registrations),
        sink,
        shutdown.clone(),
        settings.backfill,
    );

    match scheduler.run().await {
        Ok(stats) => info!("{}: backfill finished, {} trades emitted", session.exchange, stats.trades_emitted),
        // closing the clients fails in-flight calls; not a session error
        Err(ChainError::Closed) if *shutdown.borrow() => {}
        Err(e) => {
            error!("{}: backfill failed: {}", session.exchange, e);
            session.record_error(ScraperError::Chain(e)).await;
        }
    }
}

/// Handle for one registered pair
pub struct PairScraper<C> {
    session: Arc<Session<C>>,
    pair: ExchangePair,
}

impl<C: ChainClient> PairScraper<C> {
    pub fn pair(&self) -> &ExchangePair {
        &self.pair
    }

    /// Session-level error, shared by every pair of the session
    pub async fn error(&self) -> Option<ScraperError> {
        self.session.last_error().await
    }

    /// Withdraw the registration. Pairs already being scanned finish.
    pub fn close(&self) {
        self.session.registrations.remove(&self.pair.foreign_name);
    }
}
