use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_STALE_AFTER_SECS: u64 = 30;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base address every endpoint path is joined onto.
    pub api_url: Url,
    /// File the session token is persisted to.
    pub token_path: PathBuf,
    /// How long a fetched collection counts as fresh.
    pub stale_after: Duration,
    pub request_timeout: Duration,
    /// Show sent messages in the list before the server confirms them.
    pub optimistic_messages: bool,
}

impl ClientConfig {
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            token_path: default_token_path(),
            stale_after: Duration::from_secs(DEFAULT_STALE_AFTER_SECS),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            optimistic_messages: true,
        }
    }

    /// Read configuration from `PONY_*` environment variables. Callers that
    /// want `.env` support load it first.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_url = std::env::var("PONY_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
        let api_url = Url::parse(&raw_url).map_err(|source| ConfigError::InvalidUrl {
            var: "PONY_API_URL",
            source,
        })?;

        let mut config = Self::new(api_url);

        if let Ok(path) = std::env::var("PONY_TOKEN_PATH") {
            config.token_path = PathBuf::from(path);
        }
        if let Some(secs) = env_number("PONY_STALE_AFTER_SECS")? {
            config.stale_after = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number("PONY_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Ok(value) = std::env::var("PONY_OPTIMISTIC_MESSAGES") {
            config.optimistic_messages = parse_flag("PONY_OPTIMISTIC_MESSAGES", &value)?;
        }

        Ok(config)
    }
}

fn default_token_path() -> PathBuf {
    match dirs::data_local_dir() {
        Some(dir) => dir.join("pony-express").join("session.json"),
        None => PathBuf::from("pony-session.json"),
    }
}

fn env_number(var: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(None),
    }
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            var,
            value: value.to_string(),
        }),
    }
}
