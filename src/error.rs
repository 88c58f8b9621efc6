//! Error types for screeps-mcp

use thiserror::Error;

use crate::tools::ValidationFailure;

/// Result type alias using screeps-mcp's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for screeps-mcp
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (missing or contradictory settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credentials were rejected or the token is no longer valid
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Non-success response from the Screeps server
    #[error("HTTP {status} {reason}")]
    Api { status: u16, reason: String },

    /// The server answered 2xx but reported a failure in the body
    #[error("Server error: {0}")]
    Remote(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Tool arguments did not satisfy the tool's contract
    #[error("{0}")]
    Validation(ValidationFailure),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Stream frame or payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::WebSocket(_) | Error::RateLimit(_) | Error::Timeout(_)
        ) || matches!(self, Error::Api { status, .. } if *status >= 500)
    }

    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::Validation(_) | Error::Auth(_)
        )
    }

    /// Errors that originate from talking to the remote server
    pub fn is_api_error(&self) -> bool {
        matches!(
            self,
            Error::Auth(_)
                | Error::Api { .. }
                | Error::Remote(_)
                | Error::Http(_)
                | Error::WebSocket(_)
                | Error::Timeout(_)
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(err.to_string())
    }
}

impl From<ValidationFailure> for Error {
    fn from(failure: ValidationFailure) -> Self {
        Error::Validation(failure)
    }
}
