use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use syncbot_core::*;

// ---------------------------------------------------------------------------
// REST
// ---------------------------------------------------------------------------

/// Envelope wrapping every REST response.
#[derive(Debug, Deserialize)]
pub struct FtxResponse<T> {
    pub success: bool,
    pub result: Option<T>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FtxBalance {
    pub coin: String,
    pub free: Decimal,
    pub total: Decimal,
}

impl FtxBalance {
    pub fn into_balance(self) -> Balance {
        let locked = (self.total - self.free).max(Decimal::ZERO);
        Balance::new(&self.coin, self.free, locked)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtxMarket {
    pub name: String,
    #[serde(rename = "type")]
    pub market_type: String,
    pub base_currency: Option<String>,
    pub quote_currency: Option<String>,
}

impl FtxMarket {
    /// Spot markets only; futures have no base/quote pair.
    pub fn into_market(self) -> Option<Market> {
        if self.market_type != "spot" {
            return None;
        }
        match (self.base_currency, self.quote_currency) {
            (Some(base), Some(quote)) => Some(Market::new(&self.name, &base, &quote)),
            _ => None,
        }
    }
}

/// History rows returned newest first, paged by `end_time`.
pub trait HistoryRecord {
    fn id(&self) -> u64;
    fn time(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtxFill {
    pub id: u64,
    pub market: Option<String>,
    pub side: String,
    pub price: Decimal,
    pub size: Decimal,
    pub fee: Decimal,
    pub fee_currency: String,
    pub liquidity: String,
    pub order_id: Option<u64>,
    pub time: DateTime<Utc>,
}

impl HistoryRecord for FtxFill {
    fn id(&self) -> u64 {
        self.id
    }

    fn time(&self) -> DateTime<Utc> {
        self.time
    }
}

impl FtxFill {
    pub fn into_trade(self, exchange: &str, symbol: &str) -> Result<Trade, ExchangeError> {
        let side = parse_side(&self.side)?;
        Ok(Trade {
            id: self.id.to_string(),
            exchange: exchange.to_string(),
            symbol: self.market.unwrap_or_else(|| symbol.to_string()),
            side,
            price: self.price,
            quantity: self.size,
            fee: self.fee,
            fee_currency: self.fee_currency,
            is_maker: self.liquidity == "maker",
            order_id: self.order_id.map(|id| id.to_string()),
            traded_at: self.time,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtxOrder {
    pub id: u64,
    pub client_id: Option<String>,
    pub market: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub price: Option<Decimal>,
    pub size: Decimal,
    #[serde(default)]
    pub filled_size: Decimal,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord for FtxOrder {
    fn id(&self) -> u64 {
        self.id
    }

    fn time(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl FtxOrder {
    pub fn is_closed(&self) -> bool {
        self.status == "closed"
    }

    pub fn into_order(self, exchange: &str) -> Result<Order, ExchangeError> {
        let side = parse_side(&self.side)?;
        let order_type = match self.order_type.as_str() {
            "limit" => OrderType::Limit,
            "market" => OrderType::Market,
            "stop" | "trailingStop" => OrderType::Stop,
            "takeProfit" => OrderType::TakeProfit,
            other => {
                return Err(ExchangeError::Decode(format!(
                    "unknown order type {:?}",
                    other
                )))
            }
        };
        let status = match self.status.as_str() {
            "closed" if self.filled_size >= self.size => OrderStatus::Filled,
            "closed" => OrderStatus::Cancelled,
            "open" if self.filled_size > Decimal::ZERO => OrderStatus::PartiallyFilled,
            "new" | "open" => OrderStatus::New,
            other => {
                return Err(ExchangeError::Decode(format!(
                    "unknown order status {:?}",
                    other
                )))
            }
        };
        Ok(Order {
            order_id: self.id.to_string(),
            client_order_id: self.client_id,
            exchange: exchange.to_string(),
            symbol: self.market,
            side,
            order_type,
            price: self.price,
            quantity: self.size,
            executed_quantity: self.filled_size,
            status,
            created_at: self.created_at,
            updated_at: self.created_at,
        })
    }
}

/// Body of `POST /api/orders`. `price` must be present (null) for market orders.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderBody {
    pub market: String,
    pub side: String,
    pub price: Option<Decimal>,
    #[serde(rename = "type")]
    pub order_type: String,
    pub size: Decimal,
    pub client_id: String,
}

impl From<&SubmitOrder> for PlaceOrderBody {
    fn from(order: &SubmitOrder) -> Self {
        Self {
            market: order.symbol.clone(),
            side: order.side.as_str().to_string(),
            price: order.kind.price(),
            order_type: order.kind.order_type().as_str().to_string(),
            size: order.quantity,
            client_id: order.client_order_id.clone(),
        }
    }
}

fn parse_side(side: &str) -> Result<Side, ExchangeError> {
    side.parse()
        .map_err(|e: OrderRequestError| ExchangeError::Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Websocket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FtxChannel {
    Orderbook,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoginArgs {
    pub key: String,
    pub sign: String,
    pub time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subaccount: Option<String>,
}

/// Outbound websocket requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum WebsocketRequest {
    Login { args: LoginArgs },
    Subscribe { channel: FtxChannel, market: String },
    Unsubscribe { channel: FtxChannel, market: String },
    Ping,
}

impl WebsocketRequest {
    pub fn is_login(&self) -> bool {
        matches!(self, WebsocketRequest::Login { .. })
    }

    /// Maps a cross-exchange subscription onto the FTX wire format.
    pub fn from_subscription(request: &SubscriptionRequest) -> Result<Self, StreamError> {
        let channel = match request.channel {
            Channel::Book => FtxChannel::Orderbook,
            other => return Err(StreamError::UnsupportedChannel(other)),
        };
        let market = request.market.clone();
        Ok(match request.operation {
            Operation::Subscribe => WebsocketRequest::Subscribe { channel, market },
            Operation::Unsubscribe => WebsocketRequest::Unsubscribe { channel, market },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fill_decodes_into_trade() {
        let raw = r#"{
            "fee": 20.1374935,
            "feeCurrency": "USD",
            "feeRate": 0.0005,
            "future": null,
            "id": 11215,
            "liquidity": "taker",
            "market": "BTC/USD",
            "baseCurrency": "BTC",
            "quoteCurrency": "USD",
            "orderId": 8436981,
            "tradeId": 1013912,
            "price": 10200.5,
            "side": "buy",
            "size": 2,
            "time": "2019-03-27T19:15:10.204619+00:00",
            "type": "order"
        }"#;
        let fill: FtxFill = serde_json::from_str(raw).unwrap();
        let trade = fill.into_trade("ftx", "BTC/USD").unwrap();
        assert_eq!(trade.id, "11215");
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.price, dec!(10200.5));
        assert_eq!(trade.quantity, dec!(2));
        assert!(!trade.is_maker);
        assert_eq!(trade.order_id.as_deref(), Some("8436981"));
        assert_eq!(
            trade.traded_at,
            Utc.with_ymd_and_hms(2019, 3, 27, 19, 15, 10).unwrap()
                + chrono::Duration::microseconds(204619)
        );
    }

    fn order(status: &str, size: Decimal, filled: Decimal) -> FtxOrder {
        FtxOrder {
            id: 9596912,
            client_id: None,
            market: "XRP/USD".to_string(),
            side: "sell".to_string(),
            order_type: "limit".to_string(),
            price: Some(dec!(0.306525)),
            size,
            filled_size: filled,
            status: status.to_string(),
            created_at: Utc.with_ymd_and_hms(2019, 3, 5, 9, 56, 55).unwrap(),
        }
    }

    #[test]
    fn test_order_status_mapping() {
        let cases = [
            ("closed", dec!(31), dec!(31), OrderStatus::Filled),
            ("closed", dec!(31), dec!(10), OrderStatus::Cancelled),
            ("closed", dec!(31), dec!(0), OrderStatus::Cancelled),
            ("open", dec!(31), dec!(10), OrderStatus::PartiallyFilled),
            ("open", dec!(31), dec!(0), OrderStatus::New),
            ("new", dec!(31), dec!(0), OrderStatus::New),
        ];
        for (status, size, filled, expected) in cases {
            let mapped = order(status, size, filled).into_order("ftx").unwrap();
            assert_eq!(mapped.status, expected, "{status} {filled}/{size}");
        }
        assert!(order("weird", dec!(1), dec!(0)).into_order("ftx").is_err());
    }

    #[test]
    fn test_only_spot_markets_are_kept() {
        let raw = r#"[
            {"name": "BTC/USD", "type": "spot", "baseCurrency": "BTC", "quoteCurrency": "USD"},
            {"name": "BTC-PERP", "type": "future", "baseCurrency": null, "quoteCurrency": null}
        ]"#;
        let markets: Vec<FtxMarket> = serde_json::from_str(raw).unwrap();
        let kept: Vec<Market> = markets.into_iter().filter_map(FtxMarket::into_market).collect();
        assert_eq!(kept, vec![Market::new("BTC/USD", "BTC", "USD")]);
    }

    #[test]
    fn test_market_order_body_sends_null_price() {
        let order = SubmitOrder::new("btc/usd", Side::Sell, OrderKind::Market, dec!(0.5)).unwrap();
        let body = serde_json::to_value(PlaceOrderBody::from(&order)).unwrap();
        assert_eq!(body["market"], "BTC/USD");
        assert_eq!(body["side"], "sell");
        assert_eq!(body["type"], "market");
        assert!(body["price"].is_null());
        assert_eq!(body["clientId"], order.client_order_id.as_str());
    }

    #[test]
    fn test_websocket_request_wire_format() {
        let sub = WebsocketRequest::from_subscription(&SubscriptionRequest::subscribe(
            Channel::Book,
            " ltc-usdt ",
        ))
        .unwrap();
        assert_eq!(
            serde_json::to_string(&sub).unwrap(),
            r#"{"op":"subscribe","channel":"orderbook","market":"LTC-USDT"}"#
        );

        let login = WebsocketRequest::Login {
            args: LoginArgs {
                key: "k".to_string(),
                sign: "abc".to_string(),
                time: 1,
                subaccount: None,
            },
        };
        assert_eq!(
            serde_json::to_string(&login).unwrap(),
            r#"{"op":"login","args":{"key":"k","sign":"abc","time":1}}"#
        );
        assert_eq!(
            serde_json::to_string(&WebsocketRequest::Ping).unwrap(),
            r#"{"op":"ping"}"#
        );
    }

    #[test]
    fn test_unsupported_channel() {
        let err = WebsocketRequest::from_subscription(&SubscriptionRequest::subscribe(
            Channel::Trade,
            "BTC/USD",
        ))
        .unwrap_err();
        assert!(matches!(err, StreamError::UnsupportedChannel(Channel::Trade)));
    }
}
