use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_API_URL: &str = "https://chat-api-k4vi.onrender.com";
pub const DEFAULT_WS_URL: &str = "wss://chat-api-k4vi.onrender.com";
const DEFAULT_DATA_DIR: &str = ".room_chat";
const DEFAULT_TIMEOUT_SECS: u64 = 15;

pub const API_URL_VAR: &str = "ROOM_CHAT_API_URL";
pub const WS_URL_VAR: &str = "ROOM_CHAT_WS_URL";
pub const DATA_DIR_VAR: &str = "ROOM_CHAT_DATA_DIR";
pub const TIMEOUT_VAR: &str = "ROOM_CHAT_TIMEOUT_SECS";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must start with {expected}, got {value:?}")]
    InvalidScheme {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("{name} must be a whole number of seconds, got {value:?}")]
    InvalidTimeout { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the REST directory service, without a trailing slash.
    pub api_url: String,
    /// Base URL of the real-time endpoint; `wss://` or `ws://`.
    pub ws_url: String,
    /// Where the identity record is kept between runs.
    pub data_dir: PathBuf,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by any `ROOM_CHAT_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = ClientConfig::default();
        if let Some(url) = lookup(API_URL_VAR) {
            config.api_url = url;
        }
        if let Some(url) = lookup(WS_URL_VAR) {
            config.ws_url = url;
        }
        if let Some(dir) = lookup(DATA_DIR_VAR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(secs) = lookup(TIMEOUT_VAR) {
            let secs = secs.trim().parse::<u64>().map_err(|_| ConfigError::InvalidTimeout {
                name: TIMEOUT_VAR,
                value: secs.clone(),
            })?;
            config.request_timeout = Duration::from_secs(secs);
        }
        config.validate()
    }

    /// Checks URL schemes and strips trailing slashes.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::InvalidScheme {
                name: API_URL_VAR,
                expected: "http:// or https://",
                value: self.api_url,
            });
        }
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidScheme {
                name: WS_URL_VAR,
                expected: "ws:// or wss://",
                value: self.ws_url,
            });
        }
        self.api_url = self.api_url.trim_end_matches('/').to_string();
        self.ws_url = self.ws_url.trim_end_matches('/').to_string();
        Ok(self)
    }
}
