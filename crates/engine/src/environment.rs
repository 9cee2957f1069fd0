use crate::session::ExchangeSession;
use std::sync::Arc;
use syncbot_core::TradeSync;

/// Everything a sync run needs, passed in explicitly.
pub struct Environment {
    sessions: Vec<ExchangeSession>,
    trade_sync: Arc<dyn TradeSync>,
}

impl Environment {
    pub fn new(trade_sync: Arc<dyn TradeSync>) -> Self {
        Self {
            sessions: Vec::new(),
            trade_sync,
        }
    }

    /// Sessions are processed in insertion order.
    pub fn add_session(&mut self, session: ExchangeSession) {
        self.sessions.push(session);
    }

    pub fn session_mut(&mut self, name: &str) -> Option<&mut ExchangeSession> {
        self.sessions.iter_mut().find(|s| s.name == name)
    }

    pub fn sessions(&self) -> &[ExchangeSession] {
        &self.sessions
    }

    pub fn sessions_mut(&mut self) -> &mut [ExchangeSession] {
        &mut self.sessions
    }

    pub fn trade_sync(&self) -> Arc<dyn TradeSync> {
        Arc::clone(&self.trade_sync)
    }
}
