pub mod db;
pub mod memory;
pub mod sync;

pub use memory::MemoryStore;
pub use sync::{SyncService, DEFAULT_PAGE_LIMIT};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use syncbot_core::{Order, Trade};

/// Errors raised by a record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Durable storage for synchronized history.
///
/// The newest stored timestamp per (exchange, symbol, kind) is the sync
/// cursor. Inserting a record that is already stored must not duplicate it.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn last_trade_time(
        &self,
        exchange: &str,
        symbol: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    async fn last_order_time(
        &self,
        exchange: &str,
        symbol: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Returns how many trades were newly stored.
    async fn insert_trades(&self, trades: &[Trade]) -> Result<u64, StoreError>;

    /// Returns how many orders were stored or refreshed.
    async fn upsert_orders(&self, orders: &[Order]) -> Result<u64, StoreError>;
}

/// A PostgreSQL-backed record store.
pub struct PgStore {
    pub pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Connect and bring the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = sqlx::PgPool::connect(database_url).await?;
        db::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn last_trade_time(
        &self,
        exchange: &str,
        symbol: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(db::last_trade_time(&self.pool, exchange, symbol).await?)
    }

    async fn last_order_time(
        &self,
        exchange: &str,
        symbol: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(db::last_order_time(&self.pool, exchange, symbol).await?)
    }

    async fn insert_trades(&self, trades: &[Trade]) -> Result<u64, StoreError> {
        Ok(db::insert_trades(&self.pool, trades).await?)
    }

    async fn upsert_orders(&self, orders: &[Order]) -> Result<u64, StoreError> {
        Ok(db::upsert_orders(&self.pool, orders).await?)
    }
}
