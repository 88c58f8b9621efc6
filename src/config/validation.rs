//! Configuration validation
//!
//! Validates configuration, reports issues and resolves the connection
//! settings the client needs.

use std::time::Duration;

use secrecy::ExposeSecret;

use super::types::{Config, ConnectionConfig, Credentials};
use crate::error::{Error, Result};

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }

    /// All errors as one message
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_connection(config, result);
    result = validate_credentials(config, result);
    result = validate_server(config, result);

    result
}

fn validate_connection(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let screeps = &config.screeps;

    if screeps.host.trim().is_empty() {
        return result.with_error(
            ValidationIssue::new("screeps.host", "Host is empty")
                .with_suggestion("Set SCREEPS_HOST, e.g. screeps.com or localhost:21025"),
        );
    }

    let scheme = if screeps.secure { "https" } else { "http" };
    match url::Url::parse(&format!("{}://{}", scheme, screeps.host)) {
        Ok(parsed) => {
            let local = matches!(
                parsed.host_str(),
                Some("localhost") | Some("127.0.0.1") | Some("[::1]")
            );
            if !screeps.secure && !local {
                result = result.with_warning(
                    ValidationIssue::new(
                        "screeps.secure",
                        "Credentials will be sent over an unencrypted connection",
                    )
                    .with_suggestion("Enable TLS unless this is a trusted private server"),
                );
            }
        }
        Err(e) => {
            result = result.with_error(ValidationIssue::new(
                "screeps.host",
                format!("Invalid host '{}': {}", screeps.host, e),
            ));
        }
    }

    if screeps.shard.trim().is_empty() {
        result = result.with_error(ValidationIssue::new("screeps.shard", "Shard is empty"));
    }

    if screeps.handshake_timeout_secs == 0 {
        result = result.with_error(
            ValidationIssue::new("screeps.handshake_timeout_secs", "Handshake timeout must be positive")
                .with_suggestion("The default is 10 seconds"),
        );
    }

    result
}

fn validate_credentials(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let screeps = &config.screeps;
    let has_token = screeps
        .token
        .as_ref()
        .is_some_and(|t| !t.expose_secret().is_empty());
    let has_username = screeps.username.as_deref().is_some_and(|u| !u.is_empty());
    let has_password = screeps
        .password
        .as_ref()
        .is_some_and(|p| !p.expose_secret().is_empty());

    if has_token && (has_username || has_password) {
        result = result.with_error(
            ValidationIssue::new(
                "screeps.credentials",
                "Both a token and username/password are configured",
            )
            .with_suggestion("Configure exactly one of SCREEPS_TOKEN or SCREEPS_USERNAME/SCREEPS_PASSWORD"),
        );
    } else if !has_token && !has_username && !has_password {
        result = result.with_error(
            ValidationIssue::new("screeps.credentials", "No credentials configured")
                .with_suggestion("Set SCREEPS_TOKEN, or SCREEPS_USERNAME and SCREEPS_PASSWORD"),
        );
    } else if has_username != has_password {
        result = result.with_error(
            ValidationIssue::new(
                "screeps.credentials",
                "Username and password must be configured together",
            )
            .with_suggestion("Set both SCREEPS_USERNAME and SCREEPS_PASSWORD"),
        );
    }

    result
}

fn validate_server(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.server.rate_limit_max_calls == 0 {
        result = result.with_warning(
            ValidationIssue::new("server.rate_limit_max_calls", "Rate limit of 0 rejects every call")
                .with_suggestion("The default is 100 calls per window"),
        );
    }
    if config.server.rate_limit_window_secs == 0 {
        result = result.with_error(ValidationIssue::new(
            "server.rate_limit_window_secs",
            "Rate limit window must be positive",
        ));
    }

    result
}

impl Config {
    /// Resolve the immutable connection settings.
    ///
    /// Fails with [`Error::Config`] when validation reports errors.
    pub fn connection(&self) -> Result<ConnectionConfig> {
        let report = validate_config(self);
        if !report.valid {
            return Err(Error::Config(report.error_summary()));
        }

        let screeps = &self.screeps;
        let credentials = match (&screeps.token, &screeps.username, &screeps.password) {
            (Some(token), _, _) if !token.expose_secret().is_empty() => {
                Credentials::Token(token.clone())
            }
            (_, Some(username), Some(password)) => Credentials::UsernamePassword {
                username: username.clone(),
                password: password.clone(),
            },
            _ => return Err(Error::Config("No usable credentials".to_string())),
        };

        Ok(ConnectionConfig {
            host: screeps.host.trim().to_string(),
            secure: screeps.secure,
            shard: screeps.shard.trim().to_string(),
            credentials,
            request_timeout: Duration::from_secs(screeps.request_timeout_secs),
            handshake_timeout: Duration::from_secs(screeps.handshake_timeout_secs),
        })
    }
}
