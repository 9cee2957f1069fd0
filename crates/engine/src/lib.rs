pub mod config;
pub mod discovery;
pub mod environment;
pub mod orchestrator;
pub mod session;
pub mod since;

pub use config::{ConfigError, Credentials, ExchangeKind, SessionConfig, UserConfig};
pub use discovery::{discover_symbols, FIAT_CURRENCIES};
pub use environment::Environment;
pub use orchestrator::{run_sync, RunError, SyncRequest};
pub use session::ExchangeSession;
pub use since::{resolve_start_time, StartTimeError};
