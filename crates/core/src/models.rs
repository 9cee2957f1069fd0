use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// Holdings of a single currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub currency: String,
    pub available: Decimal,
    /// Quantity reserved by open orders.
    pub locked: Decimal,
}

impl Balance {
    pub fn new(currency: &str, available: Decimal, locked: Decimal) -> Self {
        Self {
            currency: currency.to_string(),
            available,
            locked,
        }
    }

    /// Available plus reserved quantity.
    pub fn total(&self) -> Decimal {
        self.available + self.locked
    }
}

/// Currency code -> balance. Replaced wholesale on every refresh.
pub type BalanceMap = HashMap<String, Balance>;

/// A spot market listed by an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Market {
    pub symbol: String,
    pub base_currency: String,
    pub quote_currency: String,
}

impl Market {
    pub fn new(symbol: &str, base_currency: &str, quote_currency: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            base_currency: base_currency.to_string(),
            quote_currency: quote_currency.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// History records
// ---------------------------------------------------------------------------

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl std::str::FromStr for Side {
    type Err = OrderRequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(OrderRequestError::InvalidSide(other.to_string())),
        }
    }
}

/// The type tag of a persisted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    TakeProfit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::TakeProfit => "take_profit",
        }
    }
}

/// The lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
        }
    }
}

/// A fill reported by an exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    /// Exchange-assigned trade id, unique per exchange.
    pub id: String,
    pub exchange: String,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Decimal,
    pub fee_currency: String,
    pub is_maker: bool,
    pub order_id: Option<String>,
    pub traded_at: DateTime<Utc>,
}

/// An order as recorded by an exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Exchange-assigned order id, unique per exchange.
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub exchange: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub executed_quantity: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which history a sync cursor tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Trades,
    Orders,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Trades => write!(f, "trades"),
            RecordKind::Orders => write!(f, "orders"),
        }
    }
}

// ---------------------------------------------------------------------------
// Order requests
// ---------------------------------------------------------------------------

/// Errors raised while building an order request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderRequestError {
    #[error("symbol is required")]
    MissingSymbol,
    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(Decimal),
    #[error("limit price must be positive, got {0}")]
    InvalidPrice(Decimal),
    #[error("limit order requires a price")]
    MissingPrice,
    #[error("invalid side: {0}")]
    InvalidSide(String),
    #[error("unsupported order type: {0}")]
    UnsupportedOrderType(String),
    #[error("either order id or client order id is required")]
    MissingOrderId,
}

/// What kind of order to place. Each variant carries the fields it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderKind {
    Limit { price: Decimal },
    Market,
}

impl OrderKind {
    /// Builds an order kind from a type tag and an optional price.
    pub fn parse(tag: &str, price: Option<Decimal>) -> Result<Self, OrderRequestError> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "limit" => {
                let price = price.ok_or(OrderRequestError::MissingPrice)?;
                Ok(OrderKind::Limit { price })
            }
            "market" => Ok(OrderKind::Market),
            other => Err(OrderRequestError::UnsupportedOrderType(other.to_string())),
        }
    }

    pub fn order_type(&self) -> OrderType {
        match self {
            OrderKind::Limit { .. } => OrderType::Limit,
            OrderKind::Market => OrderType::Market,
        }
    }

    pub fn price(&self) -> Option<Decimal> {
        match self {
            OrderKind::Limit { price } => Some(*price),
            OrderKind::Market => None,
        }
    }
}

/// A validated order placement request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOrder {
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub quantity: Decimal,
    pub client_order_id: String,
}

impl SubmitOrder {
    pub fn new(
        symbol: &str,
        side: Side,
        kind: OrderKind,
        quantity: Decimal,
    ) -> Result<Self, OrderRequestError> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Err(OrderRequestError::MissingSymbol);
        }
        if quantity <= Decimal::ZERO {
            return Err(OrderRequestError::InvalidQuantity(quantity));
        }
        if let OrderKind::Limit { price } = kind {
            if price <= Decimal::ZERO {
                return Err(OrderRequestError::InvalidPrice(price));
            }
        }
        Ok(Self {
            symbol,
            side,
            kind,
            quantity,
            client_order_id: Uuid::new_v4().to_string(),
        })
    }
}

/// Identifies the order to cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelOrder {
    ByOrderId(String),
    ByClientOrderId(String),
}

impl CancelOrder {
    /// The exchange order id wins when both are given.
    pub fn from_ids(
        order_id: Option<&str>,
        client_order_id: Option<&str>,
    ) -> Result<Self, OrderRequestError> {
        fn non_empty(s: Option<&str>) -> Option<&str> {
            s.map(str::trim).filter(|s| !s.is_empty())
        }
        if let Some(id) = non_empty(order_id) {
            Ok(CancelOrder::ByOrderId(id.to_string()))
        } else if let Some(id) = non_empty(client_order_id) {
            Ok(CancelOrder::ByClientOrderId(id.to_string()))
        } else {
            Err(OrderRequestError::MissingOrderId)
        }
    }
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Market data channels known across exchanges. Adapters accept a subset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Book,
    Trade,
    BookTicker,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Book => write!(f, "book"),
            Channel::Trade => write!(f, "trade"),
            Channel::BookTicker => write!(f, "book_ticker"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Subscribe,
    Unsubscribe,
}

/// Per-subscription options. Adapters ignore the ones they do not support.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeOptions {
    pub depth: Option<u32>,
    pub interval: Option<String>,
}

/// A queued subscription change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub operation: Operation,
    pub channel: Channel,
    pub market: String,
}

impl SubscriptionRequest {
    pub fn subscribe(channel: Channel, symbol: &str) -> Self {
        Self {
            operation: Operation::Subscribe,
            channel,
            market: normalize_symbol(symbol),
        }
    }

    pub fn unsubscribe(channel: Channel, symbol: &str) -> Self {
        Self {
            operation: Operation::Unsubscribe,
            channel,
            market: normalize_symbol(symbol),
        }
    }
}

/// Connection lifecycle of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
    Closed,
}

/// Trims and uppercases a market symbol.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}
