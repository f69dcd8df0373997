//! Windowed Log Scanner
//!
//! Walks `[start, end]` in inclusive sub-windows of `window_size` blocks,
//! one eth_getLogs query per window, and yields the `Swap` events lazily.
//!
//! Retry policy per window:
//! - result too large: halve the window (`end = start + (end - start) / 2`)
//!   and query again from the same start; nothing from the failed attempt
//!   is emitted
//! - transient failure: wait with capped exponential backoff and query the
//!   identical window again, up to `max_retries` times
//!
//! After a successful window the next one starts at `end + 1` with the
//! default width again. Events come out in block order.

use crate::chain::ChainClient;
use crate::errors::{ChainError, ScanError};
use crate::types::RawSwapEvent;
use alloy::primitives::Address;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

// ── Constants ───────────────────────────────────────────────────────────

/// Blocks per eth_getLogs query
pub const DEFAULT_WINDOW_SIZE: u64 = 1000;

/// First wait after a transient failure
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

pub const DEFAULT_MAX_RETRIES: u32 = 8;

// ── Policy ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ScanPolicy {
    pub window_size: u64,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub max_retries: u32,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ScanPolicy {
    /// Wait before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_delay
            .checked_mul(factor)
            .unwrap_or(self.max_retry_delay)
            .min(self.max_retry_delay)
    }
}

// ── Cursor ──────────────────────────────────────────────────────────────

/// Per-worker scan position. Owned by one scan, never shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowCursor {
    start: u64,
    end: u64,
    target: u64,
    width: u64,
    done: bool,
}

impl WindowCursor {
    pub fn new(start: u64, target: u64, width: u64) -> Self {
        let width = width.max(1);
        Self {
            start,
            end: window_end(start, target, width),
            target,
            width,
            done: start > target,
        }
    }

    /// Current inclusive window
    pub fn window(&self) -> (u64, u64) {
        (self.start, self.end)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Halve the current window. Returns false when it is already a single block.
    pub fn shrink(&mut self) -> bool {
        if self.end <= self.start {
            return false;
        }
        self.end = self.start + (self.end - self.start) / 2;
        true
    }

    /// Move past the current window, restoring the default width
    pub fn advance(&mut self) {
        if self.end >= self.target {
            self.done = true;
            return;
        }
        self.start = self.end + 1;
        self.end = window_end(self.start, self.target, self.width);
    }
}

fn window_end(start: u64, target: u64, width: u64) -> u64 {
    start.saturating_add(width - 1).min(target)
}

// ── Scanner ─────────────────────────────────────────────────────────────

pub struct WindowedScanner<C> {
    client: Arc<C>,
    policy: ScanPolicy,
    shutdown: watch::Receiver<bool>,
}

impl<C> Clone for WindowedScanner<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            policy: self.policy.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<C: ChainClient> WindowedScanner<C> {
    pub fn new(client: Arc<C>, policy: ScanPolicy, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            client,
            policy,
            shutdown,
        }
    }

    /// Lazy, non-restartable sequence of the pool's swaps in `[start, end]`.
    ///
    /// A terminal failure is yielded once as `Err` and ends the stream.
    pub fn scan(&self, pool: Address, start: u64, end: u64) -> BoxStream<'static, Result<RawSwapEvent, ScanError>> {
        let state = ScanState {
            scanner: self.clone(),
            pool,
            cursor: WindowCursor::new(start, end, self.policy.window_size),
        };

        stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            if state.cursor.is_done() {
                return None;
            }
            match state.scanner.fetch_window(state.pool, &mut state.cursor).await {
                Ok(events) => {
                    state.cursor.advance();
                    let batch: Vec<_> = events.into_iter().map(Ok).collect();
                    Some((batch, Some(state)))
                }
                Err(e) => Some((vec![Err(e)], None)),
            }
        })
        .flat_map(stream::iter)
        .boxed()
    }

    /// Query the cursor's window until it succeeds, shrinking it on
    /// result-size errors. On success the cursor still points at the
    /// window that was fetched.
    async fn fetch_window(&mut self, pool: Address, cursor: &mut WindowCursor) -> Result<Vec<RawSwapEvent>, ScanError> {
        let mut attempts = 0u32;
        loop {
            if *self.shutdown.borrow() {
                return Err(ScanError::Cancelled);
            }

            let (from, to) = cursor.window();
            debug!("get swaps from {} to {} for {:?}", from, to, pool);

            match self.client.swap_logs(pool, from, to).await {
                Ok(mut events) => {
                    events.sort_by_key(|e| (e.block_number, e.log_index));
                    return Ok(events);
                }
                Err(ChainError::ResultTooLarge(msg)) => {
                    if !cursor.shrink() {
                        return Err(ScanError::WindowExhausted { block: from });
                    }
                    let (_, new_to) = cursor.window();
                    info!(
                        "Result too large for blocks {}-{}, retrying {}-{}: {}",
                        from, to, from, new_to, msg
                    );
                }
                Err(ChainError::Closed) => return Err(ScanError::ClientClosed),
                Err(e) => {
                    attempts += 1;
                    if attempts > self.policy.max_retries {
                        return Err(ScanError::RetriesExhausted {
                            from,
                            to,
                            attempts,
                            last: e,
                        });
                    }
                    let delay = self.policy.backoff(attempts);
                    warn!(
                        "get swaps for {:?} blocks {}-{} failed (retry {}/{} in {:?}): {}",
                        pool, from, to, attempts, self.policy.max_retries, delay, e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_requested(&mut self.shutdown) => return Err(ScanError::Cancelled),
                    }
                }
            }
        }
    }
}

/// Resolves once the flag turns true. A dropped sender never resolves.
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

struct ScanState<C> {
    scanner: WindowedScanner<C>,
    pool: Address,
    cursor: WindowCursor,
}
