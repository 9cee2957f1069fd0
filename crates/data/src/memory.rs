use crate::{RecordStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use syncbot_core::{Order, Trade};
use tokio::sync::RwLock;

type RecordKey = (String, String);

/// A volatile record store with the same dedup rules as the database.
#[derive(Default)]
pub struct MemoryStore {
    trades: RwLock<BTreeMap<RecordKey, Trade>>,
    orders: RwLock<BTreeMap<RecordKey, Order>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored trades, ordered by (exchange, trade id).
    pub async fn trades(&self) -> Vec<Trade> {
        self.trades.read().await.values().cloned().collect()
    }

    /// Stored orders, ordered by (exchange, order id).
    pub async fn orders(&self) -> Vec<Order> {
        self.orders.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn last_trade_time(
        &self,
        exchange: &str,
        symbol: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .trades
            .read()
            .await
            .values()
            .filter(|t| t.exchange == exchange && t.symbol == symbol)
            .map(|t| t.traded_at)
            .max())
    }

    async fn last_order_time(
        &self,
        exchange: &str,
        symbol: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .filter(|o| o.exchange == exchange && o.symbol == symbol)
            .map(|o| o.created_at)
            .max())
    }

    async fn insert_trades(&self, trades: &[Trade]) -> Result<u64, StoreError> {
        let mut stored = self.trades.write().await;
        let mut count = 0u64;
        for trade in trades {
            let key = (trade.exchange.clone(), trade.id.clone());
            if !stored.contains_key(&key) {
                stored.insert(key, trade.clone());
                count += 1;
            }
        }
        Ok(count)
    }

    async fn upsert_orders(&self, orders: &[Order]) -> Result<u64, StoreError> {
        let mut stored = self.orders.write().await;
        for order in orders {
            let key = (order.exchange.clone(), order.order_id.clone());
            match stored.get_mut(&key) {
                Some(existing) => {
                    existing.executed_quantity = order.executed_quantity;
                    existing.status = order.status;
                    existing.updated_at = order.updated_at;
                }
                None => {
                    stored.insert(key, order.clone());
                }
            }
        }
        Ok(orders.len() as u64)
    }
}
