//! Screeps domain types shared by the client, the console stream and the tools

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Smallest console buffer a stream may be configured with
pub const MIN_BUFFER_SIZE: usize = 10;
/// Largest console buffer a stream may be configured with
pub const MAX_BUFFER_SIZE: usize = 5000;
/// Console buffer size used when none is requested
pub const DEFAULT_BUFFER_SIZE: usize = 500;

/// Clamp a requested buffer size into the supported range
pub fn clamp_buffer_size(size: usize) -> usize {
    size.clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)
}

/// Authenticated identity for one connection
#[derive(Debug, Clone)]
pub struct Session {
    /// Token sent as `X-Token` on every call
    pub token: SecretString,
    /// `_id` reported by `/api/auth/me`
    pub user_id: String,
    /// Username reported by `/api/auth/me`
    pub username: String,
}

/// Kind of a console line, derived from the key it arrived under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleKind {
    Log,
    Result,
    Error,
    Highlight,
}

impl ConsoleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleKind::Log => "log",
            ConsoleKind::Result => "result",
            ConsoleKind::Error => "error",
            ConsoleKind::Highlight => "highlight",
        }
    }
}

impl std::fmt::Display for ConsoleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of console output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleMessage {
    pub line: String,
    pub shard: String,
    pub timestamp_millis: i64,
    pub kind: ConsoleKind,
}

/// Lifecycle phase of the console stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamPhase {
    Stopped,
    Connecting,
    Authenticating,
    Subscribed,
}

impl std::fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamPhase::Stopped => write!(f, "stopped"),
            StreamPhase::Connecting => write!(f, "connecting"),
            StreamPhase::Authenticating => write!(f, "authenticating"),
            StreamPhase::Subscribed => write!(f, "subscribed"),
        }
    }
}

/// Snapshot of the console stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleStreamState {
    pub shard: String,
    pub is_active: bool,
    pub phase: StreamPhase,
    pub buffered_count: usize,
    pub max_buffered_count: usize,
}
