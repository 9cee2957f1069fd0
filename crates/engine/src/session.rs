use std::sync::Arc;
use syncbot_core::{BalanceMap, Exchange, ExchangeError, Market};
use tracing::info;

/// One authenticated connection to one exchange account.
pub struct ExchangeSession {
    pub name: String,
    exchange: Arc<dyn Exchange>,
    pub isolated_margin: bool,
    /// Forces every sync on this session onto one pair.
    pub isolated_margin_symbol: Option<String>,
    balances: BalanceMap,
    markets: Vec<Market>,
}

impl ExchangeSession {
    pub fn new(name: &str, exchange: Arc<dyn Exchange>) -> Self {
        Self {
            name: name.to_string(),
            exchange,
            isolated_margin: false,
            isolated_margin_symbol: None,
            balances: BalanceMap::new(),
            markets: Vec::new(),
        }
    }

    pub fn with_isolated_margin(mut self, symbol: &str) -> Self {
        self.isolated_margin = true;
        self.isolated_margin_symbol = Some(symbol.to_string());
        self
    }

    pub fn exchange(&self) -> &dyn Exchange {
        self.exchange.as_ref()
    }

    /// Fetch balances and markets, replacing any previous snapshot.
    pub async fn init(&mut self) -> Result<(), ExchangeError> {
        let balances = self.exchange.query_account_balances().await?;
        let markets = self.exchange.query_markets().await?;
        info!(
            session = %self.name,
            balances = balances.len(),
            markets = markets.len(),
            "Session initialized"
        );
        self.balances = balances;
        self.markets = markets;
        Ok(())
    }

    pub fn balances(&self) -> &BalanceMap {
        &self.balances
    }

    pub fn markets(&self) -> &[Market] {
        &self.markets
    }

    /// The symbol a sync for `requested` actually targets. The isolated
    /// margin symbol wins over anything the caller asks for.
    pub fn effective_symbol(&self, requested: &str) -> String {
        match (&self.isolated_margin_symbol, self.isolated_margin) {
            (Some(symbol), true) => symbol.clone(),
            _ => requested.to_string(),
        }
    }
}
