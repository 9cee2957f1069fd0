//! Drives trade and order sync across sessions and symbols.
//!
//! Work is strictly sequential: one session, one symbol, one sync call at a
//! time. The first failure ends the run; pairs already synced stay synced.

use crate::discovery::discover_symbols;
use crate::environment::Environment;
use crate::session::ExchangeSession;
use chrono::{DateTime, Utc};
use syncbot_core::{ExchangeError, RecordKind, Shutdown, SyncError, TradeSync};
use tracing::{error, info};

/// What to sync.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    /// Only this session; all sessions when `None`.
    pub session: Option<String>,
    /// Only this symbol; discovered per session when `None`.
    pub symbol: Option<String>,
    pub start_time: DateTime<Utc>,
}

/// Errors that end a sync run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("session {0} not found")]
    SessionNotFound(String),
    #[error("failed to initialize session {session}: {source}")]
    Init {
        session: String,
        #[source]
        source: ExchangeError,
    },
    #[error("failed to sync {kind} for session {session} symbol {symbol}: {source}")]
    Sync {
        session: String,
        symbol: String,
        kind: RecordKind,
        #[source]
        source: SyncError,
    },
    #[error("sync cancelled")]
    Cancelled,
}

/// Sync every requested (session, symbol) pair, trades before orders.
pub async fn run_sync(
    shutdown: &Shutdown,
    env: &mut Environment,
    request: &SyncRequest,
) -> Result<(), RunError> {
    let trade_sync = env.trade_sync();

    let sessions: Vec<&mut ExchangeSession> = match &request.session {
        Some(name) => {
            let session = env
                .session_mut(name)
                .ok_or_else(|| RunError::SessionNotFound(name.clone()))?;
            vec![session]
        }
        None => env.sessions_mut().iter_mut().collect(),
    };

    for session in sessions {
        let symbols = match &request.symbol {
            Some(symbol) => vec![symbol.clone()],
            None => find_possible_symbols(shutdown, session).await?,
        };

        for symbol in &symbols {
            sync_session_symbol(
                shutdown,
                trade_sync.as_ref(),
                session,
                symbol,
                request.start_time,
            )
            .await?;
        }
    }

    Ok(())
}

async fn find_possible_symbols(
    shutdown: &Shutdown,
    session: &mut ExchangeSession,
) -> Result<Vec<String>, RunError> {
    if shutdown.is_cancelled() {
        return Err(RunError::Cancelled);
    }

    session.init().await.map_err(|source| {
        error!(session = %session.name, error = %source, "Session init failed");
        RunError::Init {
            session: session.name.clone(),
            source,
        }
    })?;

    let symbols = discover_symbols(session.balances(), session.markets());
    info!(session = %session.name, ?symbols, "Found possible symbols");
    Ok(symbols)
}

async fn sync_session_symbol(
    shutdown: &Shutdown,
    trade_sync: &dyn TradeSync,
    session: &ExchangeSession,
    requested: &str,
    start_time: DateTime<Utc>,
) -> Result<(), RunError> {
    if shutdown.is_cancelled() {
        return Err(RunError::Cancelled);
    }

    info!(session = %session.name, "Starting syncing exchange session");

    let symbol = session.effective_symbol(requested);
    if session.isolated_margin {
        info!(
            session = %session.name,
            isolated_symbol = %symbol,
            requested = %requested,
            "Session is isolated margin, using isolated margin symbol"
        );
    }

    let fail = |kind: RecordKind, source: SyncError| {
        error!(session = %session.name, %symbol, %kind, error = %source, "Sync failed");
        RunError::Sync {
            session: session.name.clone(),
            symbol: symbol.clone(),
            kind,
            source,
        }
    };

    info!(session = %session.name, %symbol, "Syncing trades");
    trade_sync
        .sync_trades(shutdown, session.exchange(), &symbol, start_time)
        .await
        .map_err(|e| fail(RecordKind::Trades, e))?;

    info!(session = %session.name, %symbol, "Syncing orders");
    trade_sync
        .sync_orders(shutdown, session.exchange(), &symbol, start_time)
        .await
        .map_err(|e| fail(RecordKind::Orders, e))?;

    info!(session = %session.name, %symbol, "Exchange session synchronization done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};
    use syncbot_core::{Exchange, Side};
    use syncbot_data::{MemoryStore, SyncService};
    use syncbot_exchanges_common::{ExchangeCall, SimulatedExchange};

    /// Records begin/end of every sync call as "begin trades sim:BTCUSDT".
    #[derive(Default)]
    struct RecordingSync {
        log: Mutex<Vec<String>>,
        fail_on: Option<(RecordKind, String)>,
    }

    impl RecordingSync {
        fn failing(kind: RecordKind, symbol: &str) -> Self {
            Self {
                log: Mutex::default(),
                fail_on: Some((kind, symbol.to_string())),
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        async fn record(
            &self,
            kind: RecordKind,
            exchange: &dyn Exchange,
            symbol: &str,
        ) -> Result<(), SyncError> {
            let key = format!("{} {}:{}", kind, exchange.name(), symbol);
            self.log.lock().unwrap().push(format!("begin {key}"));
            tokio::task::yield_now().await;
            if self.fail_on == Some((kind, symbol.to_string())) {
                return Err(SyncError::Store("disk full".to_string()));
            }
            self.log.lock().unwrap().push(format!("end {key}"));
            Ok(())
        }
    }

    #[async_trait]
    impl TradeSync for RecordingSync {
        async fn sync_trades(
            &self,
            _shutdown: &Shutdown,
            exchange: &dyn Exchange,
            symbol: &str,
            _start_time: DateTime<Utc>,
        ) -> Result<(), SyncError> {
            self.record(RecordKind::Trades, exchange, symbol).await
        }

        async fn sync_orders(
            &self,
            _shutdown: &Shutdown,
            exchange: &dyn Exchange,
            symbol: &str,
            _start_time: DateTime<Utc>,
        ) -> Result<(), SyncError> {
            self.record(RecordKind::Orders, exchange, symbol).await
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()
    }

    fn request(session: Option<&str>, symbol: Option<&str>) -> SyncRequest {
        SyncRequest {
            session: session.map(str::to_string),
            symbol: symbol.map(str::to_string),
            start_time: start(),
        }
    }

    fn holding(name: &str, bases: &[&str]) -> SimulatedExchange {
        let mut ex = SimulatedExchange::new(name).with_balance("USDT", dec!(1000));
        for base in bases {
            ex = ex
                .with_balance(base, dec!(1))
                .with_market(&format!("{base}USDT"), base, "USDT");
        }
        ex.with_market("DOGEUSDT", "DOGE", "USDT")
    }

    fn env_with(sync: Arc<RecordingSync>, sessions: Vec<ExchangeSession>) -> Environment {
        let mut env = Environment::new(sync);
        for s in sessions {
            env.add_session(s);
        }
        env
    }

    #[tokio::test]
    async fn test_explicit_symbol_syncs_trades_then_orders_without_init() {
        let ex = Arc::new(holding("sim", &["BTC"]));
        let sync = Arc::new(RecordingSync::default());
        let mut env = env_with(sync.clone(), vec![ExchangeSession::new("main", ex.clone())]);

        run_sync(&Shutdown::never(), &mut env, &request(None, Some("ETHUSDT")))
            .await
            .unwrap();

        assert_eq!(
            sync.log(),
            vec![
                "begin trades sim:ETHUSDT",
                "end trades sim:ETHUSDT",
                "begin orders sim:ETHUSDT",
                "end orders sim:ETHUSDT",
            ]
        );
        assert!(ex.calls().is_empty());
    }

    #[tokio::test]
    async fn test_discovery_runs_once_per_session() {
        let a = Arc::new(holding("a", &["ETH", "BTC"]));
        let b = Arc::new(holding("b", &["LTC"]));
        let sync = Arc::new(RecordingSync::default());
        let mut env = env_with(
            sync.clone(),
            vec![
                ExchangeSession::new("first", a.clone()),
                ExchangeSession::new("second", b.clone()),
            ],
        );

        run_sync(&Shutdown::never(), &mut env, &request(None, None))
            .await
            .unwrap();

        let begins: Vec<String> = sync
            .log()
            .into_iter()
            .filter(|l| l.starts_with("begin"))
            .collect();
        assert_eq!(
            begins,
            vec![
                "begin trades a:BTCUSDT",
                "begin orders a:BTCUSDT",
                "begin trades a:ETHUSDT",
                "begin orders a:ETHUSDT",
                "begin trades b:LTCUSDT",
                "begin orders b:LTCUSDT",
            ]
        );
        let balance_queries = |ex: &SimulatedExchange| {
            ex.calls()
                .iter()
                .filter(|c| **c == ExchangeCall::Balances)
                .count()
        };
        assert_eq!(balance_queries(&a), 1);
        assert_eq!(balance_queries(&b), 1);
    }

    #[tokio::test]
    async fn test_named_session_only() {
        let sync = Arc::new(RecordingSync::default());
        let mut env = env_with(
            sync.clone(),
            vec![
                ExchangeSession::new("first", Arc::new(holding("a", &["BTC"]))),
                ExchangeSession::new("second", Arc::new(holding("b", &["LTC"]))),
            ],
        );

        run_sync(&Shutdown::never(), &mut env, &request(Some("second"), None))
            .await
            .unwrap();

        assert!(sync.log().iter().all(|l| l.contains("b:LTCUSDT")));
        assert_eq!(sync.log().len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_session_is_an_error() {
        let sync = Arc::new(RecordingSync::default());
        let mut env = env_with(sync.clone(), vec![]);

        let err = run_sync(&Shutdown::never(), &mut env, &request(Some("nope"), None))
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::SessionNotFound(name) if name == "nope"));
        assert!(sync.log().is_empty());
    }

    #[tokio::test]
    async fn test_isolated_margin_symbol_overrides_requested_symbol() {
        let sync = Arc::new(RecordingSync::default());
        let session = ExchangeSession::new("margin", Arc::new(holding("sim", &["ETH"])))
            .with_isolated_margin("BTCUSDT");
        let mut env = env_with(sync.clone(), vec![session]);

        run_sync(&Shutdown::never(), &mut env, &request(None, Some("ETHUSDT")))
            .await
            .unwrap();

        assert!(!sync.log().is_empty());
        assert!(sync.log().iter().all(|l| l.ends_with("sim:BTCUSDT")));
    }

    #[tokio::test]
    async fn test_first_failure_aborts_remaining_pairs() {
        let sync = Arc::new(RecordingSync::failing(RecordKind::Trades, "ETHUSDT"));
        let mut env = env_with(
            sync.clone(),
            vec![
                ExchangeSession::new("first", Arc::new(holding("a", &["BTC", "ETH", "SOL"]))),
                ExchangeSession::new("second", Arc::new(holding("b", &["LTC"]))),
            ],
        );

        let err = run_sync(&Shutdown::never(), &mut env, &request(None, None))
            .await
            .unwrap_err();

        match err {
            RunError::Sync {
                session,
                symbol,
                kind,
                ..
            } => {
                assert_eq!(session, "first");
                assert_eq!(symbol, "ETHUSDT");
                assert_eq!(kind, RecordKind::Trades);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            sync.log(),
            vec![
                "begin trades a:BTCUSDT",
                "end trades a:BTCUSDT",
                "begin orders a:BTCUSDT",
                "end orders a:BTCUSDT",
                "begin trades a:ETHUSDT",
            ]
        );
    }

    #[tokio::test]
    async fn test_init_failure_aborts_run() {
        let failing = holding("a", &["BTC"]);
        failing.fail_account("invalid api key");
        let sync = Arc::new(RecordingSync::default());
        let mut env = env_with(
            sync.clone(),
            vec![
                ExchangeSession::new("first", Arc::new(failing)),
                ExchangeSession::new("second", Arc::new(holding("b", &["LTC"]))),
            ],
        );

        let err = run_sync(&Shutdown::never(), &mut env, &request(None, None))
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Init { ref session, .. } if session == "first"));
        assert!(sync.log().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_syncs_nothing() {
        let sync = Arc::new(RecordingSync::default());
        let mut env = env_with(
            sync.clone(),
            vec![ExchangeSession::new("first", Arc::new(holding("a", &["BTC"])))],
        );
        let (handle, shutdown) = Shutdown::channel();
        handle.trigger();

        let err = run_sync(&shutdown, &mut env, &request(None, Some("BTCUSDT")))
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::Cancelled));
        assert!(sync.log().is_empty());
    }

    #[tokio::test]
    async fn test_end_to_end_with_sync_service() {
        let ex = holding("sim", &["BTC"]);
        ex.record_fill("BTCUSDT", Side::Buy, dec!(20000), dec!(1), start());
        ex.record_fill("DOGEUSDT", Side::Buy, dec!(0.1), dec!(10), start());
        let service = Arc::new(SyncService::new(MemoryStore::new()));
        let mut env = Environment::new(service.clone());
        env.add_session(ExchangeSession::new("main", Arc::new(ex)));

        run_sync(&Shutdown::never(), &mut env, &request(None, None))
            .await
            .unwrap();

        let trades = service.store().trades().await;
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].symbol, "BTCUSDT");
    }
}
