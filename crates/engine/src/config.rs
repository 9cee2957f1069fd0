use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Errors raised while loading the user configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate session name {0}")]
    DuplicateSession(String),
    #[error("session {0} is isolated margin but has no isolated_margin_symbol")]
    MissingIsolatedSymbol(String),
    #[error("session {session}: environment variable {var} is not set")]
    MissingEnv { session: String, var: String },
    #[error("session {0}: key and secret must be configured together")]
    PartialCredentials(String),
}

/// Supported exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    Ftx,
}

/// One `[[sessions]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub name: String,
    pub exchange: ExchangeKind,
    pub key: Option<String>,
    pub secret: Option<String>,
    /// Read the key from this environment variable instead.
    pub key_env: Option<String>,
    pub secret_env: Option<String>,
    pub subaccount: Option<String>,
    /// Overrides the exchange's REST endpoint.
    pub rest_url: Option<String>,
    /// Overrides the exchange's websocket endpoint.
    pub stream_url: Option<String>,
    #[serde(default)]
    pub isolated_margin: bool,
    pub isolated_margin_symbol: Option<String>,
    /// Streams of this session never authenticate.
    #[serde(default)]
    pub public_only: bool,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl SessionConfig {
    fn resolve(
        &self,
        value: &Option<String>,
        env: &Option<String>,
    ) -> Result<Option<String>, ConfigError> {
        if let Some(value) = value {
            return Ok(Some(value.clone()));
        }
        match env {
            Some(var) => std::env::var(var).map(Some).map_err(|_| ConfigError::MissingEnv {
                session: self.name.clone(),
                var: var.clone(),
            }),
            None => Ok(None),
        }
    }

    /// API credentials, or `None` for a public-only session.
    pub fn credentials(&self) -> Result<Option<Credentials>, ConfigError> {
        let key = self.resolve(&self.key, &self.key_env)?;
        let secret = self.resolve(&self.secret, &self.secret_env)?;
        match (key, secret) {
            (Some(key), Some(secret)) => Ok(Some(Credentials { key, secret })),
            (None, None) => Ok(None),
            _ => Err(ConfigError::PartialCredentials(self.name.clone())),
        }
    }
}

/// The user configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserConfig {
    pub database_url: Option<String>,
    #[serde(default)]
    pub sessions: Vec<SessionConfig>,
}

impl UserConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: UserConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for session in &self.sessions {
            if !seen.insert(session.name.as_str()) {
                return Err(ConfigError::DuplicateSession(session.name.clone()));
            }
            let has_symbol = session
                .isolated_margin_symbol
                .as_deref()
                .is_some_and(|s| !s.trim().is_empty());
            if session.isolated_margin && !has_symbol {
                return Err(ConfigError::MissingIsolatedSymbol(session.name.clone()));
            }
        }
        Ok(())
    }

    pub fn session(&self, name: &str) -> Option<&SessionConfig> {
        self.sessions.iter().find(|s| s.name == name)
    }
}
