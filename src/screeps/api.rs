//! Operations the tool layer needs from a Screeps connection

use async_trait::async_trait;
use serde_json::Value;

use super::types::{ConsoleMessage, ConsoleStreamState};
use crate::error::Result;

/// One authenticated connection to a Screeps server.
///
/// `shard: None` means the connection's configured shard. One-shot calls
/// return the server's JSON body.
#[async_trait]
pub trait ScreepsApi: Send + Sync {
    /// Who the connection is authenticated as
    async fn user_info(&self) -> Result<Value>;

    async fn room_objects(&self, room: &str, shard: Option<&str>) -> Result<Value>;

    async fn room_terrain(&self, room: &str, shard: Option<&str>, encoded: bool) -> Result<Value>;

    /// Memory at `path`, or all of Memory when `path` is `None`
    async fn memory_get(&self, path: Option<&str>, shard: Option<&str>) -> Result<Value>;

    async fn memory_set(&self, path: &str, value: &Value, shard: Option<&str>) -> Result<Value>;

    async fn memory_delete(&self, path: &str, shard: Option<&str>) -> Result<Value>;

    async fn segment_get(&self, segment: u8, shard: Option<&str>) -> Result<Value>;

    async fn segment_set(&self, segment: u8, data: &str, shard: Option<&str>) -> Result<Value>;

    /// Run an expression in the game console
    async fn console_command(&self, expression: &str, shard: Option<&str>) -> Result<Value>;

    async fn shard_info(&self) -> Result<Value>;

    async fn game_time(&self, shard: Option<&str>) -> Result<Value>;

    /// Subscribe to console output; resolves once subscribed or failed
    async fn start_console_stream(
        &self,
        shard: Option<&str>,
        buffer_size: Option<usize>,
    ) -> Result<ConsoleStreamState>;

    async fn stop_console_stream(&self) -> ConsoleStreamState;

    fn console_stream_state(&self) -> ConsoleStreamState;

    /// Copies of buffered console lines, oldest first
    fn read_console(&self, limit: usize, since: Option<i64>) -> Vec<ConsoleMessage>;
}
