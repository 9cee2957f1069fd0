//! FTX exchange adapter.
//!
//! Signed REST integration for balances, markets, history and order entry,
//! plus an authenticated websocket stream that forwards every inbound frame
//! to the shared event sink.

mod auth;
pub mod messages;
pub mod rest;
pub mod stream;

pub use rest::FtxClient;
pub use stream::FtxStream;

use serde::{Deserialize, Serialize};

/// Identifier used to key persisted FTX records.
pub const EXCHANGE_NAME: &str = "ftx";

/// Connection settings for one FTX account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtxConfig {
    /// REST endpoint (e.g. "https://ftx.com").
    pub rest_url: String,
    /// Websocket endpoint (e.g. "wss://ftx.com/ws/").
    pub ws_url: String,
    pub api_key: Option<String>,
    #[serde(skip_serializing)]
    pub api_secret: Option<String>,
    pub subaccount: Option<String>,
    /// Keepalive ping interval in seconds.
    pub ping_interval_secs: u64,
    /// Rows requested per history page.
    pub history_page_size: usize,
}

impl Default for FtxConfig {
    fn default() -> Self {
        Self {
            rest_url: "https://ftx.com".to_string(),
            ws_url: "wss://ftx.com/ws/".to_string(),
            api_key: None,
            api_secret: None,
            subaccount: None,
            ping_interval_secs: 15,
            history_page_size: 200,
        }
    }
}

impl FtxConfig {
    pub fn with_credentials(mut self, key: &str, secret: &str) -> Self {
        self.api_key = Some(key.to_string());
        self.api_secret = Some(secret.to_string());
        self
    }

    pub(crate) fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.api_key, &self.api_secret) {
            (Some(key), Some(secret)) => Some((key.as_str(), secret.as_str())),
            _ => None,
        }
    }
}
