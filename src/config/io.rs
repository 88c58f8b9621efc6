//! Configuration I/O - Loading configuration
//!
//! Handles reading configuration from files and environment variables.

use std::path::Path;

use secrecy::SecretString;

use super::types::Config;
use crate::error::{Error, Result};

/// Load configuration with layered precedence:
/// 1. Config file (config.toml) if it exists, otherwise defaults
/// 2. Environment variable overrides (includes .env)
pub fn load_config() -> Result<Config> {
    let config_path = super::paths::config_path();

    let mut config = if config_path.exists() {
        load_config_from_path(&config_path)?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Load configuration from a specific TOML file
pub fn load_config_from_path(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid TOML config {}: {}", path.display(), e)))
}

/// Apply environment variable overrides to an existing config.
///
/// Loads `.env` first, then overlays any set `SCREEPS_*` variables.
pub fn apply_env_overrides(config: &mut Config) {
    dotenvy::dotenv().ok();
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Apply overrides from any key/value source
pub fn apply_overrides_from<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let screeps = &mut config.screeps;

    if let Some(host) = lookup("SCREEPS_HOST") {
        screeps.host = host;
    }
    if let Some(secure) = lookup("SCREEPS_SECURE") {
        screeps.secure = !matches!(secure.to_lowercase().as_str(), "false" | "0" | "no");
    }
    if let Some(shard) = lookup("SCREEPS_SHARD") {
        screeps.shard = shard;
    }
    if let Some(token) = lookup("SCREEPS_TOKEN") {
        screeps.token = Some(SecretString::from(token));
    }
    if let Some(username) = lookup("SCREEPS_USERNAME") {
        screeps.username = Some(username);
    }
    if let Some(password) = lookup("SCREEPS_PASSWORD") {
        screeps.password = Some(SecretString::from(password));
    }
    if let Some(v) = lookup("SCREEPS_REQUEST_TIMEOUT").and_then(|v| v.parse().ok()) {
        screeps.request_timeout_secs = v;
    }
    if let Some(v) = lookup("SCREEPS_HANDSHAKE_TIMEOUT").and_then(|v| v.parse().ok()) {
        screeps.handshake_timeout_secs = v;
    }

    let server = &mut config.server;
    if let Some(v) = lookup("SCREEPS_RATE_LIMIT").and_then(|v| v.parse().ok()) {
        server.rate_limit_max_calls = v;
    }
    if let Some(v) = lookup("SCREEPS_RATE_WINDOW").and_then(|v| v.parse().ok()) {
        server.rate_limit_window_secs = v;
    }
}
