//! Incremental trade and order history synchronization.
//!
//! Each run resumes from the newest stored record (or the caller's start
//! time, whichever is later), pages forward through the exchange history
//! and persists every page before requesting the next one. Page starts are
//! inclusive, so the newest instant of a page is requested again with the
//! next one. Records are deduplicated by the store, so overlapping pages and
//! repeated runs are harmless.

use crate::{RecordStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use syncbot_core::{Exchange, ExchangeError, Shutdown, SyncError, TradeSync};
use tracing::{debug, info};

/// Records requested per exchange call.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// The trade/order sync engine.
pub struct SyncService<S> {
    store: S,
    page_limit: usize,
}

impl<S: RecordStore> SyncService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            page_limit: DEFAULT_PAGE_LIMIT,
        }
    }

    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

fn store_error(e: StoreError) -> SyncError {
    SyncError::Store(e.to_string())
}

/// The later of the requested start and the newest stored record.
///
/// The stored timestamp is inclusive: records sharing it may not all have
/// been persisted.
fn resume_point(start_time: DateTime<Utc>, last_stored: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match last_stored {
        Some(last) if last > start_time => last,
        _ => start_time,
    }
}

/// Start and size of the page after a full page whose newest record is
/// `newest`.
///
/// A full page that never leaves the cursor instant holds only records of
/// that instant, and there may be more of them. The next page starts at the
/// same instant with twice the size until it either comes back short or
/// reaches a later instant. Stepping past the instant would drop the rest.
fn next_page(
    cursor: DateTime<Utc>,
    newest: DateTime<Utc>,
    limit: usize,
    page_limit: usize,
) -> (DateTime<Utc>, usize) {
    if newest > cursor {
        (newest, page_limit)
    } else {
        (cursor, limit.saturating_mul(2))
    }
}

/// Run an exchange call unless, or until, shutdown fires.
async fn guarded<T, F>(shutdown: &Shutdown, call: F) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, ExchangeError>>,
{
    if shutdown.is_cancelled() {
        return Err(SyncError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => Err(SyncError::Cancelled),
        result = call => result.map_err(SyncError::from),
    }
}

#[async_trait]
impl<S: RecordStore> TradeSync for SyncService<S> {
    async fn sync_trades(
        &self,
        shutdown: &Shutdown,
        exchange: &dyn Exchange,
        symbol: &str,
        start_time: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let last = self
            .store
            .last_trade_time(exchange.name(), symbol)
            .await
            .map_err(store_error)?;
        let mut cursor = resume_point(start_time, last);
        info!(exchange = exchange.name(), symbol, since = %cursor, "Syncing trades");

        let mut limit = self.page_limit;
        let mut inserted = 0u64;
        loop {
            let page = guarded(shutdown, exchange.query_trades(symbol, cursor, limit)).await?;
            let Some(newest) = page.iter().map(|t| t.traded_at).max() else {
                break;
            };

            inserted += self.store.insert_trades(&page).await.map_err(store_error)?;
            debug!(symbol, fetched = page.len(), %newest, "Stored trade page");

            if page.len() < limit {
                break;
            }
            (cursor, limit) = next_page(cursor, newest, limit, self.page_limit);
        }

        info!(exchange = exchange.name(), symbol, inserted, "Trades synced");
        Ok(())
    }

    async fn sync_orders(
        &self,
        shutdown: &Shutdown,
        exchange: &dyn Exchange,
        symbol: &str,
        start_time: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let last = self
            .store
            .last_order_time(exchange.name(), symbol)
            .await
            .map_err(store_error)?;
        let mut cursor = resume_point(start_time, last);
        info!(exchange = exchange.name(), symbol, since = %cursor, "Syncing orders");

        let mut limit = self.page_limit;
        let mut stored = 0u64;
        loop {
            let page =
                guarded(shutdown, exchange.query_closed_orders(symbol, cursor, limit)).await?;
            let Some(newest) = page.iter().map(|o| o.created_at).max() else {
                break;
            };

            stored += self.store.upsert_orders(&page).await.map_err(store_error)?;
            debug!(symbol, fetched = page.len(), %newest, "Stored order page");

            if page.len() < limit {
                break;
            }
            (cursor, limit) = next_page(cursor, newest, limit, self.page_limit);
        }

        info!(exchange = exchange.name(), symbol, stored, "Orders synced");
        Ok(())
    }
}
