//! Configuration types
//!
//! `Config` is what gets loaded from file and environment; `ConnectionConfig`
//! is the resolved, immutable view the client is built from.

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Screeps server connection settings
    #[serde(default)]
    pub screeps: ScreepsSettings,

    /// Tool server settings
    #[serde(default)]
    pub server: ServerSettings,
}

impl Config {
    /// Load configuration from the config file and environment variables
    pub fn from_env() -> crate::error::Result<Self> {
        crate::config::load_config()
    }
}

/// Screeps connection settings as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreepsSettings {
    /// Host (and optional port), e.g. `screeps.com` or `localhost:21025`
    #[serde(default = "default_host")]
    pub host: String,
    /// Use HTTPS/WSS
    #[serde(default = "default_secure")]
    pub secure: bool,
    /// Shard used when a call does not name one
    #[serde(default = "default_shard")]
    pub shard: String,
    /// Pre-issued auth token
    #[serde(skip_serializing, default)]
    pub token: Option<SecretString>,
    /// Username for token exchange
    pub username: Option<String>,
    /// Password for token exchange
    #[serde(skip_serializing, default)]
    pub password: Option<SecretString>,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Bound on the console socket connect + auth handshake, in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

impl Default for ScreepsSettings {
    fn default() -> Self {
        ScreepsSettings {
            host: default_host(),
            secure: default_secure(),
            shard: default_shard(),
            token: None,
            username: None,
            password: None,
            request_timeout_secs: default_request_timeout(),
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

fn default_host() -> String {
    "screeps.com".to_string()
}

fn default_secure() -> bool {
    true
}

fn default_shard() -> String {
    "shard0".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_handshake_timeout() -> u64 {
    10
}

/// Tool server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Calls admitted per tool within one window
    #[serde(default = "default_rate_limit")]
    pub rate_limit_max_calls: usize,
    /// Rate limit window in seconds
    #[serde(default = "default_rate_window")]
    pub rate_limit_window_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        ServerSettings {
            rate_limit_max_calls: default_rate_limit(),
            rate_limit_window_secs: default_rate_window(),
        }
    }
}

impl ServerSettings {
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

fn default_rate_limit() -> usize {
    100
}

fn default_rate_window() -> u64 {
    60
}

/// How the client proves who it is
#[derive(Debug, Clone)]
pub enum Credentials {
    /// Pre-issued token, used as is
    Token(SecretString),
    /// Exchanged for a restricted token on first use
    UsernamePassword {
        username: String,
        password: SecretString,
    },
}

/// Resolved connection settings for one Screeps server
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub secure: bool,
    pub shard: String,
    pub credentials: Credentials,
    pub request_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl ConnectionConfig {
    /// Create a connection config with default timeouts
    pub fn new(
        host: impl Into<String>,
        secure: bool,
        shard: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        ConnectionConfig {
            host: host.into(),
            secure,
            shard: shard.into(),
            credentials,
            request_timeout: Duration::from_secs(default_request_timeout()),
            handshake_timeout: Duration::from_secs(default_handshake_timeout()),
        }
    }

    /// Base URL for HTTP calls, without a trailing slash
    pub fn api_base(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}", scheme, self.host.trim_end_matches('/'))
    }

    /// URL of the console WebSocket endpoint
    pub fn socket_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}/socket/websocket", scheme, self.host.trim_end_matches('/'))
    }
}
