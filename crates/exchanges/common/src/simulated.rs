use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use syncbot_core::*;
use tracing::debug;

/// A call received by the simulated exchange, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeCall {
    Balances,
    Markets,
    Trades {
        symbol: String,
        since: DateTime<Utc>,
        limit: usize,
    },
    ClosedOrders {
        symbol: String,
        since: DateTime<Utc>,
        limit: usize,
    },
    OpenOrders { symbol: String },
    Submit { symbol: String },
    Cancel(CancelOrder),
}

#[derive(Default)]
struct SimulatedState {
    balances: BalanceMap,
    markets: Vec<Market>,
    trades: Vec<Trade>,
    orders: Vec<Order>,
    calls: Vec<ExchangeCall>,
    /// symbol -> error message returned by history queries.
    failing_symbols: HashMap<String, String>,
    /// Error message returned by balance queries.
    failing_account: Option<String>,
    next_id: u64,
}

/// An in-memory exchange for dry runs and tests.
///
/// History queries honour the `since`/`limit` contract of [`Exchange`], so
/// the sync engine pages through it the same way it would a real venue.
pub struct SimulatedExchange {
    name: String,
    state: Mutex<SimulatedState>,
}

impl SimulatedExchange {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(SimulatedState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, SimulatedState> {
        // A poisoned lock only means a test panicked mid-call.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set a balance with `total` available and nothing locked.
    pub fn with_balance(self, currency: &str, total: Decimal) -> Self {
        self.state()
            .balances
            .insert(currency.to_string(), Balance::new(currency, total, Decimal::ZERO));
        self
    }

    pub fn with_market(self, symbol: &str, base: &str, quote: &str) -> Self {
        self.state().markets.push(Market::new(symbol, base, quote));
        self
    }

    /// Make history queries for `symbol` fail with `message`.
    pub fn fail_symbol(&self, symbol: &str, message: &str) {
        self.state()
            .failing_symbols
            .insert(symbol.to_string(), message.to_string());
    }

    /// Make balance queries fail with `message`.
    pub fn fail_account(&self, message: &str) {
        self.state().failing_account = Some(message.to_string());
    }

    /// Record a fill and return it.
    pub fn record_fill(
        &self,
        symbol: &str,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        at: DateTime<Utc>,
    ) -> Trade {
        let mut state = self.state();
        state.next_id += 1;
        let trade = Trade {
            id: state.next_id.to_string(),
            exchange: self.name.clone(),
            symbol: symbol.to_string(),
            side,
            price,
            quantity,
            fee: Decimal::ZERO,
            fee_currency: String::new(),
            is_maker: false,
            order_id: None,
            traded_at: at,
        };
        state.trades.push(trade.clone());
        trade
    }

    /// Record a closed order and return it.
    pub fn record_order(
        &self,
        symbol: &str,
        side: Side,
        status: OrderStatus,
        quantity: Decimal,
        at: DateTime<Utc>,
    ) -> Order {
        let mut state = self.state();
        state.next_id += 1;
        let executed_quantity = if status == OrderStatus::Filled {
            quantity
        } else {
            Decimal::ZERO
        };
        let order = Order {
            order_id: state.next_id.to_string(),
            client_order_id: None,
            exchange: self.name.clone(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            price: None,
            quantity,
            executed_quantity,
            status,
            created_at: at,
            updated_at: at,
        };
        state.orders.push(order.clone());
        order
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<ExchangeCall> {
        self.state().calls.clone()
    }

    fn check_symbol(state: &SimulatedState, symbol: &str) -> Result<(), ExchangeError> {
        match state.failing_symbols.get(symbol) {
            Some(message) => Err(ExchangeError::RequestFailed(message.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Exchange for SimulatedExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query_account_balances(&self) -> Result<BalanceMap, ExchangeError> {
        let mut state = self.state();
        state.calls.push(ExchangeCall::Balances);
        if let Some(message) = &state.failing_account {
            return Err(ExchangeError::Unauthenticated(message.clone()));
        }
        Ok(state.balances.clone())
    }

    async fn query_markets(&self) -> Result<Vec<Market>, ExchangeError> {
        let mut state = self.state();
        state.calls.push(ExchangeCall::Markets);
        Ok(state.markets.clone())
    }

    async fn query_trades(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Trade>, ExchangeError> {
        let mut state = self.state();
        state.calls.push(ExchangeCall::Trades {
            symbol: symbol.to_string(),
            since,
            limit,
        });
        Self::check_symbol(&state, symbol)?;

        let mut trades: Vec<Trade> = state
            .trades
            .iter()
            .filter(|t| t.symbol == symbol && t.traded_at >= since)
            .cloned()
            .collect();
        trades.sort_by(|a, b| a.traded_at.cmp(&b.traded_at));
        trades.truncate(limit);
        debug!(symbol, count = trades.len(), "Simulated trades query");
        Ok(trades)
    }

    async fn query_closed_orders(
        &self,
        symbol: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, ExchangeError> {
        let mut state = self.state();
        state.calls.push(ExchangeCall::ClosedOrders {
            symbol: symbol.to_string(),
            since,
            limit,
        });
        Self::check_symbol(&state, symbol)?;

        let mut orders: Vec<Order> = state
            .orders
            .iter()
            .filter(|o| {
                o.symbol == symbol
                    && o.created_at >= since
                    && matches!(
                        o.status,
                        OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
                    )
            })
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        orders.truncate(limit);
        Ok(orders)
    }

    async fn query_open_orders(&self, symbol: &str) -> Result<Vec<Order>, ExchangeError> {
        let mut state = self.state();
        state.calls.push(ExchangeCall::OpenOrders {
            symbol: symbol.to_string(),
        });
        Self::check_symbol(&state, symbol)?;

        let mut orders: Vec<Order> = state
            .orders
            .iter()
            .filter(|o| {
                o.symbol == symbol
                    && matches!(o.status, OrderStatus::New | OrderStatus::PartiallyFilled)
            })
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(orders)
    }

    async fn submit_order(&self, order: &SubmitOrder) -> Result<Order, ExchangeError> {
        let mut state = self.state();
        state.calls.push(ExchangeCall::Submit {
            symbol: order.symbol.clone(),
        });
        state.next_id += 1;
        let now = Utc::now();

        // Market orders fill immediately, limit orders rest.
        let (status, executed_quantity) = match order.kind {
            OrderKind::Market => (OrderStatus::Filled, order.quantity),
            OrderKind::Limit { .. } => (OrderStatus::New, Decimal::ZERO),
        };
        let placed = Order {
            order_id: state.next_id.to_string(),
            client_order_id: Some(order.client_order_id.clone()),
            exchange: self.name.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.kind.order_type(),
            price: order.kind.price(),
            quantity: order.quantity,
            executed_quantity,
            status,
            created_at: now,
            updated_at: now,
        };
        state.orders.push(placed.clone());
        Ok(placed)
    }

    async fn cancel_order(&self, cancel: &CancelOrder) -> Result<(), ExchangeError> {
        let mut state = self.state();
        state.calls.push(ExchangeCall::Cancel(cancel.clone()));

        let target = state.orders.iter_mut().find(|o| match cancel {
            CancelOrder::ByOrderId(id) => &o.order_id == id,
            CancelOrder::ByClientOrderId(id) => o.client_order_id.as_ref() == Some(id),
        });
        match target {
            Some(order) if order.status == OrderStatus::New => {
                order.status = OrderStatus::Cancelled;
                order.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(ExchangeError::OrderNotFound(format!("{:?}", cancel))),
        }
    }
}
