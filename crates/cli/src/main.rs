use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use syncbot_core::*;
use syncbot_data::{PgStore, SyncService};
use syncbot_engine::*;
use syncbot_exchange_ftx::{FtxClient, FtxConfig, FtxStream};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "syncbot")]
#[command(about = "Sync exchange trade and order history into a local database")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Path to the user config file
    #[arg(short, long, env = "SYNCBOT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Database URL (overrides database_url in the config file)
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync trades and closed orders
    Sync {
        /// Only this session (default: all sessions)
        #[arg(long)]
        session: Option<String>,

        /// Only this symbol (default: discovered from balances)
        #[arg(long)]
        symbol: Option<String>,

        /// Start date, YYYY-MM-DD in Asia/Taipei (default: 3 months ago)
        #[arg(long)]
        since: Option<String>,
    },

    /// Stream the order book of one market until Ctrl-C
    Stream {
        #[arg(long)]
        session: String,

        #[arg(long)]
        symbol: String,
    },

    /// List, place or cancel orders
    Orders {
        #[command(subcommand)]
        command: OrderCommands,
    },
}

#[derive(Subcommand)]
enum OrderCommands {
    /// List open and closed orders of one market
    List {
        #[arg(long)]
        session: String,

        #[arg(long)]
        symbol: String,

        /// active or done (default: both)
        #[arg(long, value_enum)]
        status: Option<OrderListStatus>,

        /// Oldest closed order to list, YYYY-MM-DD in Asia/Taipei (default: 3 months ago)
        #[arg(long)]
        since: Option<String>,

        /// Maximum number of closed orders
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Place an order
    Place {
        #[arg(long)]
        session: String,

        #[arg(long)]
        symbol: String,

        /// buy or sell
        #[arg(long)]
        side: String,

        /// limit or market
        #[arg(long, default_value = "limit")]
        order_type: String,

        /// Limit price (required for limit orders)
        #[arg(long)]
        price: Option<Decimal>,

        #[arg(long)]
        size: Decimal,
    },

    /// Cancel an order by exchange or client order id
    Cancel {
        #[arg(long)]
        session: String,

        #[arg(long)]
        order_id: Option<String>,

        #[arg(long)]
        client_order_id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OrderListStatus {
    /// Orders still on the book
    Active,
    /// Filled, cancelled or rejected orders
    Done,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    if cli.json_logs {
        fmt().json().with_env_filter(filter).init();
    } else {
        fmt().with_env_filter(filter).with_target(false).init();
    }

    let config = load_config(cli.config.as_deref())?;
    let (handle, shutdown) = Shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, shutting down");
            handle.trigger();
        }
    });

    match cli.command {
        Commands::Sync {
            session,
            symbol,
            since,
        } => {
            let start_time = resolve_start_time(since.as_deref(), Local::now())?;
            let database_url = cli
                .database_url
                .or_else(|| config.database_url.clone())
                .context("no database configured: set DATABASE_URL, --database-url or database_url")?;
            run_sync_command(&config, &database_url, &shutdown, session, symbol, start_time)
                .await?;
        }
        Commands::Stream { session, symbol } => {
            run_stream(&config, &session, &symbol, &shutdown).await?;
        }
        Commands::Orders { command } => match command {
            OrderCommands::List {
                session,
                symbol,
                status,
                since,
                limit,
            } => {
                let since = resolve_start_time(since.as_deref(), Local::now())?;
                let exchange = build_exchange(session_config(&config, &session)?)?;
                let orders = list_orders(exchange.as_ref(), &symbol, status, since, limit).await?;
                tracing::info!(
                    session = %session,
                    symbol = %symbol,
                    count = orders.len(),
                    "Listed orders"
                );
                for order in &orders {
                    println!("{}", describe_order(order));
                }
            }
            OrderCommands::Place {
                session,
                symbol,
                side,
                order_type,
                price,
                size,
            } => {
                let side: Side = side.parse()?;
                let kind = OrderKind::parse(&order_type, price)?;
                let request = SubmitOrder::new(&symbol, side, kind, size)?;
                let exchange = build_exchange(session_config(&config, &session)?)?;

                tracing::info!(session = %session, symbol = %request.symbol, "Submitting order");
                let order = exchange.submit_order(&request).await?;
                println!("Placed {}", describe_order(&order));
            }
            OrderCommands::Cancel {
                session,
                order_id,
                client_order_id,
            } => {
                let cancel = CancelOrder::from_ids(order_id.as_deref(), client_order_id.as_deref())?;
                let exchange = build_exchange(session_config(&config, &session)?)?;
                exchange.cancel_order(&cancel).await?;
                println!("Cancel requested: {:?}", cancel);
            }
        },
    }

    Ok(())
}

/// Open orders first, then closed ones since `since`, each oldest first.
async fn list_orders(
    exchange: &dyn Exchange,
    symbol: &str,
    status: Option<OrderListStatus>,
    since: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<Order>> {
    let symbol = normalize_symbol(symbol);
    if symbol.is_empty() {
        bail!("--symbol is required");
    }
    let mut orders = Vec::new();
    if status != Some(OrderListStatus::Done) {
        orders.extend(exchange.query_open_orders(&symbol).await?);
    }
    if status != Some(OrderListStatus::Active) {
        orders.extend(exchange.query_closed_orders(&symbol, since, limit).await?);
    }
    Ok(orders)
}

fn describe_order(order: &Order) -> String {
    format!(
        "{} {} {} {} @ {} [{}] (order id {}, client id {})",
        order.order_type.as_str(),
        order.side.as_str(),
        order.quantity,
        order.symbol,
        order
            .price
            .map(|p| p.to_string())
            .unwrap_or_else(|| "market".to_string()),
        order.status.as_str(),
        order.order_id,
        order.client_order_id.as_deref().unwrap_or("-"),
    )
}

fn load_config(path: Option<&Path>) -> Result<UserConfig> {
    let Some(path) = path else {
        bail!("--config is required");
    };
    let config = UserConfig::load(path)?;
    tracing::debug!(path = %path.display(), sessions = config.sessions.len(), "Loaded config");
    Ok(config)
}

fn session_config<'a>(config: &'a UserConfig, name: &str) -> Result<&'a SessionConfig> {
    config
        .session(name)
        .with_context(|| format!("session {} not found in config", name))
}

fn ftx_config(session: &SessionConfig) -> Result<FtxConfig> {
    let mut config = FtxConfig::default();
    if let Some(url) = &session.rest_url {
        config.rest_url = url.clone();
    }
    if let Some(url) = &session.stream_url {
        config.ws_url = url.clone();
    }
    if let Some(credentials) = session.credentials()? {
        config = config.with_credentials(&credentials.key, &credentials.secret);
    }
    config.subaccount = session.subaccount.clone();
    Ok(config)
}

fn build_exchange(session: &SessionConfig) -> Result<Arc<dyn Exchange>> {
    let exchange: Arc<dyn Exchange> = match session.exchange {
        ExchangeKind::Ftx => Arc::new(FtxClient::new(ftx_config(session)?)),
    };
    Ok(exchange)
}

fn build_environment(config: &UserConfig, trade_sync: Arc<dyn TradeSync>) -> Result<Environment> {
    let mut env = Environment::new(trade_sync);
    for entry in &config.sessions {
        let mut session = ExchangeSession::new(&entry.name, build_exchange(entry)?);
        if entry.isolated_margin {
            if let Some(symbol) = &entry.isolated_margin_symbol {
                session = session.with_isolated_margin(symbol);
            }
        }
        env.add_session(session);
    }
    Ok(env)
}

async fn run_sync_command(
    config: &UserConfig,
    database_url: &str,
    shutdown: &Shutdown,
    session: Option<String>,
    symbol: Option<String>,
    start_time: DateTime<Utc>,
) -> Result<()> {
    let store = PgStore::connect(database_url)
        .await
        .context("failed to open the database")?;
    let mut env = build_environment(config, Arc::new(SyncService::new(store)))?;

    tracing::info!(
        session = session.as_deref().unwrap_or("all"),
        symbol = symbol.as_deref().unwrap_or("discovered"),
        since = %start_time,
        "Starting sync"
    );
    let request = SyncRequest {
        session,
        symbol,
        start_time,
    };
    run_sync(shutdown, &mut env, &request).await?;
    tracing::info!("Sync complete");
    Ok(())
}

async fn run_stream(
    config: &UserConfig,
    session_name: &str,
    symbol: &str,
    shutdown: &Shutdown,
) -> Result<()> {
    let session = session_config(config, session_name)?;
    let stream = match session.exchange {
        ExchangeKind::Ftx => FtxStream::new(ftx_config(session)?),
    };
    if session.public_only || session.credentials()?.is_none() {
        stream.set_public_only();
    }

    let mut events = stream.events();
    stream
        .subscribe(Channel::Book, symbol, SubscribeOptions::default())
        .await?;
    stream.connect(shutdown).await?;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Ok(StreamEvent::Message { exchange, payload }) => {
                    tracing::info!(exchange = %exchange, %payload, "Stream message");
                }
                Ok(StreamEvent::Connected { exchange }) => {
                    tracing::info!(exchange = %exchange, "Stream connected");
                }
                Ok(StreamEvent::Disconnected { exchange, reason }) => {
                    tracing::warn!(exchange = %exchange, reason = %reason, "Stream disconnected");
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event consumer lagging");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    stream.close().await?;
    Ok(())
}
