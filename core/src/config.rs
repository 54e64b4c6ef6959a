//! Service configuration, loaded from a TOML file with environment
//! variable overrides, via a `Config::load()` / `validate()` pair.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bot token for the chat platform SDK.
    pub bot_token: String,
    /// Database connection string (sqlite:// or postgres://).
    pub database_url: String,
    /// Optional Redis URL for the cache layer (C12). Absent means the
    /// in-memory fallback is used unconditionally.
    #[serde(default)]
    pub cache_url: Option<String>,
    /// User id of the system owner who receives escalated error DMs (C13).
    pub system_owner_id: String,
    /// Directory static archives (C15) are written under.
    #[serde(default = "Config::default_archive_dir")]
    pub archive_dir: PathBuf,
    /// Directory for application logs.
    #[serde(default = "Config::default_log_dir")]
    pub log_dir: PathBuf,
    /// Address the HTTP interface (C16) binds to.
    #[serde(default = "Config::default_bind_addr")]
    pub bind_addr: String,
    /// OAuth client id/secret, only required if the web frontend's login
    /// flow is enabled. Out of core scope; carried as opaque config.
    #[serde(default)]
    pub oauth_client_id: Option<String>,
    #[serde(default)]
    pub oauth_client_secret: Option<String>,
    /// Reaction-safeguard tick interval in seconds.
    #[serde(default = "Config::default_safeguard_interval_secs")]
    pub safeguard_interval_secs: u64,
}

impl Config {
    fn default_archive_dir() -> PathBuf {
        PathBuf::from("static/polls")
    }

    fn default_log_dir() -> PathBuf {
        PathBuf::from("logs")
    }

    fn default_bind_addr() -> String {
        "0.0.0.0:8080".to_string()
    }

    fn default_safeguard_interval_secs() -> u64 {
        5
    }

    /// Load configuration from a TOML file, then apply environment
    /// variable overrides (`POLLY_BOT_TOKEN`, `POLLY_DATABASE_URL`, ...).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Build entirely from environment variables, for container
    /// deployments that don't ship a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config {
            bot_token: String::new(),
            database_url: "sqlite://polly.db".to_string(),
            cache_url: None,
            system_owner_id: String::new(),
            archive_dir: Self::default_archive_dir(),
            log_dir: Self::default_log_dir(),
            bind_addr: Self::default_bind_addr(),
            oauth_client_id: None,
            oauth_client_secret: None,
            safeguard_interval_secs: Self::default_safeguard_interval_secs(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("POLLY_BOT_TOKEN") {
            self.bot_token = v;
        }
        if let Ok(v) = std::env::var("POLLY_DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("POLLY_CACHE_URL") {
            self.cache_url = Some(v);
        }
        if let Ok(v) = std::env::var("POLLY_SYSTEM_OWNER_ID") {
            self.system_owner_id = v;
        }
        if let Ok(v) = std::env::var("POLLY_BIND_ADDR") {
            self.bind_addr = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bot_token.trim().is_empty() {
            return Err(ConfigError::Invalid("bot_token must not be empty".into()));
        }
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid("database_url must not be empty".into()));
        }
        if self.system_owner_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "system_owner_id must not be empty".into(),
            ));
        }
        if self.safeguard_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "safeguard_interval_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
