//! Resilient external connection
//!
//! Lazy singleton over any `Connector`: the connection is opened on first
//! use, health-checked on every acquire, and on loss closed and re-dialed
//! after a fixed delay. Acquire blocks through an outage instead of
//! failing fast.

use crate::errors::StoreError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{info, warn};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How to open, health-check and close one kind of connection
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Label for logs
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<Self::Connection, StoreError>;

    async fn is_alive(&self, conn: &mut Self::Connection) -> bool;

    async fn close(&self, conn: Self::Connection);
}

pub struct ResilientConnection<K: Connector> {
    connector: K,
    slot: Mutex<Option<K::Connection>>,
    reconnect_delay: Duration,
    connects: AtomicU64,
}

impl<K: Connector> ResilientConnection<K> {
    pub fn new(connector: K, reconnect_delay: Duration) -> Self {
        Self {
            connector,
            slot: Mutex::new(None),
            reconnect_delay,
            connects: AtomicU64::new(0),
        }
    }

    /// Successful dials so far, including the first
    pub fn connect_count(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }

    /// Exclusive handle to a live connection.
    ///
    /// Loops until a connection passes the health check; holders are
    /// serialized by the slot lock.
    pub async fn acquire(&self) -> MappedMutexGuard<'_, K::Connection> {
        let mut slot = self.slot.lock().await;
        loop {
            let alive = match slot.as_mut() {
                Some(conn) => self.connector.is_alive(conn).await,
                None => false,
            };

            if !alive {
                if let Some(conn) = slot.take() {
                    warn!(
                        "{} connection lost, reconnecting in {:?}",
                        self.connector.name(),
                        self.reconnect_delay
                    );
                    self.connector.close(conn).await;
                    tokio::time::sleep(self.reconnect_delay).await;
                }
                *slot = Some(self.dial().await);
            }

            match MutexGuard::try_map(slot, Option::as_mut) {
                Ok(conn) => return conn,
                Err(guard) => slot = guard,
            }
        }
    }

    /// Drop the current connection, if any
    pub async fn close(&self) {
        if let Some(conn) = self.slot.lock().await.take() {
            self.connector.close(conn).await;
            info!("{} connection closed", self.connector.name());
        }
    }

    async fn dial(&self) -> K::Connection {
        loop {
            match self.connector.connect().await {
                Ok(conn) => {
                    let n = self.connects.fetch_add(1, Ordering::Relaxed) + 1;
                    info!("{} connected (connection #{})", self.connector.name(), n);
                    return conn;
                }
                Err(e) => {
                    warn!(
                        "{} connect failed: {} (retrying in {:?})",
                        self.connector.name(),
                        e,
                        self.reconnect_delay
                    );
                    tokio::time::sleep(self.reconnect_delay).await;
                }
            }
        }
    }
}
