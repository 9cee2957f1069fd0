use crate::events::*;
use crate::models::*;
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Exchange Trait
// ---------------------------------------------------------------------------

/// Errors that can occur during exchange REST operations.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Exchange rejected request: {0}")]
    Rejected(String),
    #[error("Unexpected response: {0}")]
    Decode(String),
    #[error("Authentication required: {0}")]
    Unauthenticated(String),
    #[error("Order not found: {0}")]
    OrderNotFound(String),
    #[error("Exchange error: {0}")]
    Other(String),
}

/// One authenticated exchange account.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Exchange identifier used to key persisted records (e.g. "ftx").
    fn name(&self) -> &str;

    /// Current balances, keyed by currency code.
    async fn query_account_balances(&self) -> Result<BalanceMap, ExchangeError>;

    /// All spot markets listed by the exchange.
    async fn query_markets(&self) -> Result<Vec<Market>, ExchangeError>;

    /// The oldest `limit` trades at or after `since`, oldest first.
    /// Callers may ask for more than one exchange page; adapters page
    /// internally.
    async fn query_trades(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Trade>, ExchangeError>;

    /// The oldest `limit` closed orders created at or after `since`,
    /// oldest first.
    async fn query_closed_orders(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, ExchangeError>;

    /// Orders still resting on the book for `symbol`, oldest first.
    async fn query_open_orders(&self, symbol: &str) -> Result<Vec<Order>, ExchangeError>;

    /// Place an order.
    async fn submit_order(&self, order: &SubmitOrder) -> Result<Order, ExchangeError>;

    /// Cancel an order.
    async fn cancel_order(&self, cancel: &CancelOrder) -> Result<(), ExchangeError>;
}

// ---------------------------------------------------------------------------
// Trade Sync Trait
// ---------------------------------------------------------------------------

/// Errors that can occur while synchronizing history.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    #[error("Store error: {0}")]
    Store(String),
    #[error("Sync cancelled")]
    Cancelled,
}

/// Incrementally pulls trade and order history into local storage.
///
/// Implementations must be idempotent (re-running from an earlier or equal
/// start never duplicates records), must fetch everything from `start_time`
/// on the first run, and must return [`SyncError::Cancelled`] promptly once
/// `shutdown` fires.
#[async_trait]
pub trait TradeSync: Send + Sync {
    async fn sync_trades(
        &self,
        shutdown: &Shutdown,
        exchange: &dyn Exchange,
        symbol: &str,
        start_time: DateTime<Utc>,
    ) -> Result<(), SyncError>;

    async fn sync_orders(
        &self,
        shutdown: &Shutdown,
        exchange: &dyn Exchange,
        symbol: &str,
        start_time: DateTime<Utc>,
    ) -> Result<(), SyncError>;
}

// ---------------------------------------------------------------------------
// Stream Trait
// ---------------------------------------------------------------------------

/// Errors that can occur on a streaming connection.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Send failed: {0}")]
    SendFailed(String),
    #[error("Unsupported channel: {0}")]
    UnsupportedChannel(Channel),
    #[error("Stream is already {0:?}")]
    InvalidState(StreamState),
    #[error("API key and secret are required unless the stream is public-only")]
    MissingCredentials,
    #[error("Connect cancelled")]
    Cancelled,
}

/// A long-lived, optionally authenticated market/account data stream.
///
/// Every inbound message is forwarded to the stream's [`StandardStream`].
#[async_trait]
pub trait Stream: Send + Sync {
    /// Never authenticate. Only honoured before the first `connect`.
    fn set_public_only(&self);

    fn is_public_only(&self) -> bool;

    fn state(&self) -> StreamState;

    /// Authenticate (unless public-only), establish the transport and send
    /// every queued request. A closed stream stays closed.
    async fn connect(&self, shutdown: &Shutdown) -> Result<(), StreamError>;

    /// Queue a subscription; sent immediately when connected.
    async fn subscribe(
        &self,
        channel: Channel,
        symbol: &str,
        options: SubscribeOptions,
    ) -> Result<(), StreamError>;

    /// Drop a queued subscription; sent immediately when connected.
    async fn unsubscribe(&self, channel: Channel, symbol: &str) -> Result<(), StreamError>;

    /// Tear down the transport for good. A no-op when never connected or
    /// already closed.
    async fn close(&self) -> Result<(), StreamError>;

    /// Subscribe to the shared event sink.
    fn events(&self) -> broadcast::Receiver<StreamEvent>;
}
