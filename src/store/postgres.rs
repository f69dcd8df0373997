//! Postgres-backed block store
//!
//! Table `blockdata` maps (blockchain, block_number) to the header
//! timestamp. A miss is fetched from the node and written back, so the
//! table fills up as the backfill progresses.

use super::resilient::{Connector, ResilientConnection};
use super::{BlockMetadata, BlockSource};
use crate::chain::ChainClient;
use crate::errors::StoreError;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS blockdata (
    blockchain   TEXT   NOT NULL,
    block_number BIGINT NOT NULL,
    block_time   BIGINT NOT NULL,
    PRIMARY KEY (blockchain, block_number)
)";

const SELECT_BLOCK: &str = "SELECT block_time FROM blockdata WHERE blockchain = $1 AND block_number = $2";

const INSERT_BLOCK: &str = "INSERT INTO blockdata (blockchain, block_number, block_time) VALUES ($1, $2, $3)
     ON CONFLICT (blockchain, block_number) DO NOTHING";

// ── Connection options ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConnectOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl Default for PostgresConnectOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            username: "postgres".to_string(),
            password: "postgres".to_string(),
            database: "dia".to_string(),
        }
    }
}

impl PostgresConnectOptions {
    /// POSTGRES_HOST / PORT / USERNAME / PASSWORD / DATABASE, falling back
    /// to the defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |key: &str, fallback: String| std::env::var(key).unwrap_or(fallback);
        let port = std::env::var("POSTGRES_PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(defaults.port);
        Self {
            host: var("POSTGRES_HOST", defaults.host),
            port,
            username: var("POSTGRES_USERNAME", defaults.username),
            password: var("POSTGRES_PASSWORD", defaults.password),
            database: var("POSTGRES_DATABASE", defaults.database),
        }
    }

    /// Connection URL with the password masked, for logs
    pub fn display_url(&self) -> String {
        format!(
            "postgres://{}:***@{}:{}/{}",
            self.username, self.host, self.port, self.database
        )
    }
}

impl From<PostgresConnectOptions> for PgConnectOptions {
    fn from(opt: PostgresConnectOptions) -> Self {
        PgConnectOptions::new()
            .host(&opt.host)
            .port(opt.port)
            .username(&opt.username)
            .password(&opt.password)
            .database(&opt.database)
            .disable_statement_logging()
    }
}

// ── Connector ───────────────────────────────────────────────────────────

pub struct PgConnector {
    options: PgConnectOptions,
    label: String,
}

impl PgConnector {
    pub fn new(options: PostgresConnectOptions) -> Self {
        let label = format!("postgres {}", options.display_url());
        Self {
            options: options.into(),
            label,
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    type Connection = PgConnection;

    fn name(&self) -> &str {
        &self.label
    }

    async fn connect(&self) -> Result<PgConnection, StoreError> {
        PgConnection::connect_with(&self.options)
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))
    }

    async fn is_alive(&self, conn: &mut PgConnection) -> bool {
        conn.ping().await.is_ok()
    }

    async fn close(&self, conn: PgConnection) {
        if let Err(e) = conn.close().await {
            debug!("{}: close failed: {}", self.label, e);
        }
    }
}

// ── Block table ─────────────────────────────────────────────────────────

/// Persistent `(block_number → block_time)` rows of one blockchain
#[async_trait]
pub trait BlockTable: Send + Sync + 'static {
    async fn select_block(&self, number: i64) -> Result<Option<i64>, StoreError>;

    /// Insert unless present
    async fn insert_block(&self, number: i64, timestamp: i64) -> Result<(), StoreError>;
}

/// `blockdata` over one resilient Postgres connection
pub struct PgBlockTable {
    conn: ResilientConnection<PgConnector>,
    blockchain: String,
}

impl PgBlockTable {
    pub fn new(options: PostgresConnectOptions, reconnect_delay: Duration, blockchain: &str) -> Self {
        Self {
            conn: ResilientConnection::new(PgConnector::new(options), reconnect_delay),
            blockchain: blockchain.to_string(),
        }
    }

    /// Create `blockdata` if it does not exist yet
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.acquire().await;
        sqlx::query(CREATE_TABLE)
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        info!("blockdata table ready");
        Ok(())
    }

    pub async fn close(&self) {
        self.conn.close().await;
    }
}

#[async_trait]
impl BlockTable for PgBlockTable {
    async fn select_block(&self, number: i64) -> Result<Option<i64>, StoreError> {
        let mut conn = self.conn.acquire().await;
        let row: Option<(i64,)> = sqlx::query_as(SELECT_BLOCK)
            .bind(&self.blockchain)
            .bind(number)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(row.map(|(t,)| t))
    }

    async fn insert_block(&self, number: i64, timestamp: i64) -> Result<(), StoreError> {
        let mut conn = self.conn.acquire().await;
        sqlx::query(INSERT_BLOCK)
            .bind(&self.blockchain)
            .bind(number)
            .bind(timestamp)
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }
}

// ── Block store ─────────────────────────────────────────────────────────

/// Read-through block store: table first, node on a miss, then write back
pub struct PostgresBlockStore<C, T = PgBlockTable> {
    table: T,
    client: Arc<C>,
}

impl<C: ChainClient> PostgresBlockStore<C> {
    pub fn new(options: PostgresConnectOptions, reconnect_delay: Duration, client: Arc<C>, blockchain: &str) -> Self {
        Self::with_table(PgBlockTable::new(options, reconnect_delay, blockchain), client)
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        self.table.init_schema().await
    }

    pub async fn close(&self) {
        self.table.close().await;
    }
}

impl<C: ChainClient, T: BlockTable> PostgresBlockStore<C, T> {
    pub fn with_table(table: T, client: Arc<C>) -> Self {
        Self { table, client }
    }
}

fn to_db(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Query(format!("{} does not fit BIGINT", value)))
}

#[async_trait]
impl<C: ChainClient, T: BlockTable> BlockSource for PostgresBlockStore<C, T> {
    async fn block_metadata(&self, number: u64) -> Result<BlockMetadata, StoreError> {
        let key = to_db(number)?;
        if let Some(time) = self.table.select_block(key).await? {
            let timestamp = u64::try_from(time)
                .map_err(|_| StoreError::Query(format!("negative block_time {} for block {}", time, number)))?;
            return Ok(BlockMetadata { number, timestamp });
        }

        let timestamp = self
            .client
            .block_timestamp(number)
            .await?
            .ok_or(StoreError::MissingBlock(number))?;

        // a failed write-back still yields the timestamp
        if let Err(e) = self.table.insert_block(key, to_db(timestamp)?).await {
            warn!("Error: {} writing block {} to blockdata", e, number);
        }
        Ok(BlockMetadata { number, timestamp })
    }
}
