//! Tool dispatcher
//!
//! Every call runs the same gauntlet: rate limit, tool lookup, contract
//! validation, sanitization, then the Screeps operation. Nothing escapes as a
//! Rust error; failures come back as an error [`ToolResult`].

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::catalog::{ToolName, ToolRequest};
use super::traits::ToolResult;
use crate::error::{Error, Result};
use crate::screeps::{ConsoleMessage, ConsoleStreamState, ScreepsApi};
use crate::security::RateLimiter;

struct Limits {
    limiter: RateLimiter,
    last_cleanup: Instant,
}

/// Routes tool calls to a Screeps connection
pub struct ToolDispatcher {
    api: Arc<dyn ScreepsApi>,
    limits: Mutex<Limits>,
}

impl ToolDispatcher {
    /// Allow at most `max_calls` per tool within `window`
    pub fn new(api: Arc<dyn ScreepsApi>, max_calls: usize, window: Duration) -> Self {
        ToolDispatcher {
            api,
            limits: Mutex::new(Limits {
                limiter: RateLimiter::new(max_calls, window),
                last_cleanup: Instant::now(),
            }),
        }
    }

    /// Handle one tool call
    pub async fn call(&self, name: &str, args: &Value) -> ToolResult {
        if let Err(e) = self.admit(name) {
            warn!("Rejected call to {}: {}", name, e);
            return ToolResult::from_error(name, &e);
        }

        let Some(tool) = ToolName::from_name(name) else {
            warn!("Unknown tool requested: {}", name);
            return ToolResult::error("unknown tool", format!("Unknown tool: {}", name));
        };

        let request = match ToolRequest::parse(tool, args).and_then(ToolRequest::sanitized) {
            Ok(request) => request,
            Err(failure) => {
                debug!("Invalid arguments for {}: {}", tool, failure);
                return ToolResult::validation_error(&failure);
            }
        };

        debug!("Dispatching {}", tool);
        match self.execute(request).await {
            Ok(text) => ToolResult::success(text),
            Err(e) => {
                warn!("{} failed: {}", tool, e);
                ToolResult::from_error(tool.as_str(), &e)
            }
        }
    }

    fn admit(&self, name: &str) -> Result<()> {
        let mut limits = self.limits.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        if now.duration_since(limits.last_cleanup) >= limits.limiter.window() {
            limits.limiter.cleanup_at(now);
            limits.last_cleanup = now;
        }

        let key = format!("tool:{}", name);
        if limits.limiter.allow_at(&key, now) {
            return Ok(());
        }

        let retry = limits
            .limiter
            .retry_after(&key, now)
            .unwrap_or(limits.limiter.window());
        Err(Error::RateLimit(format!(
            "at most {} calls per {}s; retry in {}s",
            limits.limiter.max_calls(),
            limits.limiter.window().as_secs(),
            retry.as_secs().max(1)
        )))
    }

    async fn execute(&self, request: ToolRequest) -> Result<String> {
        let api = self.api.as_ref();

        let body = match request {
            ToolRequest::UserInfo => api.user_info().await?,
            ToolRequest::RoomObjects(args) => {
                api.room_objects(&args.room_name, args.shard.as_deref()).await?
            }
            ToolRequest::RoomTerrain(args) => {
                api.room_terrain(&args.room_name, args.shard.as_deref(), args.encoded)
                    .await?
            }
            ToolRequest::MemoryGet(args) => {
                api.memory_get(args.path.as_deref(), args.shard.as_deref()).await?
            }
            ToolRequest::MemorySet(args) => {
                api.memory_set(&args.path, &args.value, args.shard.as_deref())
                    .await?
            }
            ToolRequest::MemoryDelete(args) => {
                api.memory_delete(&args.path, args.shard.as_deref()).await?
            }
            ToolRequest::SegmentGet(args) => {
                api.segment_get(args.segment, args.shard.as_deref()).await?
            }
            ToolRequest::SegmentSet(args) => {
                api.segment_set(args.segment, &args.data, args.shard.as_deref())
                    .await?
            }
            ToolRequest::Console(args) => {
                api.console_command(&args.expression, args.shard.as_deref())
                    .await?
            }
            ToolRequest::ShardInfo => api.shard_info().await?,
            ToolRequest::GameTime(args) => api.game_time(args.shard.as_deref()).await?,

            ToolRequest::ConsoleHistory(args) => {
                let mut messages = api.read_console(usize::MAX, None);
                if let Some(kind) = args.kind {
                    messages.retain(|m| m.kind == kind);
                }
                let skip = messages.len().saturating_sub(args.limit);
                let messages = &messages[skip..];
                return Ok(format_messages(messages, &api.console_stream_state(), false));
            }
            ToolRequest::StreamStart(args) => {
                let state = api
                    .start_console_stream(args.shard.as_deref(), Some(args.buffer_size))
                    .await?;
                info!("Console stream started on {}", state.shard);
                return Ok(format!(
                    "Console stream subscribed on {}.\n{}",
                    state.shard,
                    format_state(&state)
                ));
            }
            ToolRequest::StreamStop => {
                let state = api.stop_console_stream().await;
                return Ok(format!(
                    "Console stream stopped. {} message(s) remain buffered.",
                    state.buffered_count
                ));
            }
            ToolRequest::StreamStatus => return Ok(format_state(&api.console_stream_state())),
            ToolRequest::StreamRead(args) => {
                let messages = api.read_console(args.limit, args.since);
                return Ok(format_messages(&messages, &api.console_stream_state(), true));
            }
        };

        Ok(serde_json::to_string_pretty(&body)?)
    }
}

fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| millis.to_string())
}

fn format_state(state: &ConsoleStreamState) -> String {
    format!(
        "Shard: {}\nActive: {}\nPhase: {}\nBuffered: {}/{}",
        state.shard,
        if state.is_active { "yes" } else { "no" },
        state.phase,
        state.buffered_count,
        state.max_buffered_count
    )
}

fn format_messages(messages: &[ConsoleMessage], state: &ConsoleStreamState, with_cursor: bool) -> String {
    if messages.is_empty() {
        let hint = if state.is_active {
            ""
        } else {
            " Start the console stream to capture output."
        };
        return format!("No console messages.{}", hint);
    }

    let mut out: Vec<String> = messages
        .iter()
        .map(|m| {
            format!(
                "[{}] [{}] [{}] {}",
                format_timestamp(m.timestamp_millis),
                m.shard,
                m.kind,
                m.line
            )
        })
        .collect();

    if with_cursor {
        if let Some(latest) = messages.iter().map(|m| m.timestamp_millis).max() {
            out.push(String::new());
            out.push(format!("Latest timestamp: {}", latest));
        }
    }

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screeps::{ConsoleKind, StreamPhase};
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Default)]
    struct FakeApi {
        calls: Mutex<Vec<String>>,
        fail: bool,
        messages: Vec<ConsoleMessage>,
    }

    impl FakeApi {
        fn record(&self, call: String) -> Result<Value> {
            self.calls.lock().unwrap().push(call);
            if self.fail {
                Err(Error::Api {
                    status: 500,
                    reason: "Internal Server Error".to_string(),
                })
            } else {
                Ok(json!({"ok": 1}))
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn state(&self, active: bool) -> ConsoleStreamState {
            ConsoleStreamState {
                shard: "shard0".to_string(),
                is_active: active,
                phase: if active {
                    StreamPhase::Subscribed
                } else {
                    StreamPhase::Stopped
                },
                buffered_count: self.messages.len(),
                max_buffered_count: 500,
            }
        }
    }

    #[async_trait]
    impl ScreepsApi for FakeApi {
        async fn user_info(&self) -> Result<Value> {
            self.record("user_info".to_string())
        }

        async fn room_objects(&self, room: &str, shard: Option<&str>) -> Result<Value> {
            self.record(format!("room_objects {} {:?}", room, shard))
        }

        async fn room_terrain(&self, room: &str, _shard: Option<&str>, encoded: bool) -> Result<Value> {
            self.record(format!("room_terrain {} {}", room, encoded))
        }

        async fn memory_get(&self, path: Option<&str>, _shard: Option<&str>) -> Result<Value> {
            self.record(format!("memory_get {:?}", path))
        }

        async fn memory_set(&self, path: &str, value: &Value, _shard: Option<&str>) -> Result<Value> {
            self.record(format!("memory_set {} {}", path, value))
        }

        async fn memory_delete(&self, path: &str, _shard: Option<&str>) -> Result<Value> {
            self.record(format!("memory_delete {}", path))
        }

        async fn segment_get(&self, segment: u8, _shard: Option<&str>) -> Result<Value> {
            self.record(format!("segment_get {}", segment))
        }

        async fn segment_set(&self, segment: u8, data: &str, _shard: Option<&str>) -> Result<Value> {
            self.record(format!("segment_set {} {}", segment, data))
        }

        async fn console_command(&self, expression: &str, _shard: Option<&str>) -> Result<Value> {
            self.record(format!("console {}", expression))
        }

        async fn shard_info(&self) -> Result<Value> {
            self.record("shard_info".to_string())
        }

        async fn game_time(&self, shard: Option<&str>) -> Result<Value> {
            self.record(format!("game_time {:?}", shard))
        }

        async fn start_console_stream(
            &self,
            shard: Option<&str>,
            buffer_size: Option<usize>,
        ) -> Result<ConsoleStreamState> {
            self.record(format!("stream_start {:?} {:?}", shard, buffer_size))?;
            Ok(self.state(true))
        }

        async fn stop_console_stream(&self) -> ConsoleStreamState {
            self.calls.lock().unwrap().push("stream_stop".to_string());
            self.state(false)
        }

        fn console_stream_state(&self) -> ConsoleStreamState {
            self.state(false)
        }

        fn read_console(&self, limit: usize, since: Option<i64>) -> Vec<ConsoleMessage> {
            let eligible: Vec<ConsoleMessage> = self
                .messages
                .iter()
                .filter(|m| since.map_or(true, |s| m.timestamp_millis > s))
                .cloned()
                .collect();
            let skip = eligible.len().saturating_sub(limit);
            eligible[skip..].to_vec()
        }
    }

    fn message(line: &str, ts: i64, kind: ConsoleKind) -> ConsoleMessage {
        ConsoleMessage {
            line: line.to_string(),
            shard: "shard0".to_string(),
            timestamp_millis: ts,
            kind,
        }
    }

    fn dispatcher(api: FakeApi) -> (Arc<FakeApi>, ToolDispatcher) {
        let api = Arc::new(api);
        let dispatcher = ToolDispatcher::new(api.clone(), 100, Duration::from_secs(60));
        (api, dispatcher)
    }

    #[tokio::test]
    async fn test_invalid_room_issues_no_call() {
        let (api, dispatcher) = dispatcher(FakeApi::default());

        let result = dispatcher
            .call("screeps_room_objects", &json!({"roomName": "invalid"}))
            .await;

        assert!(result.is_error);
        assert!(result.text().starts_with("Validation Error: roomName"));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_segment_out_of_range() {
        let (api, dispatcher) = dispatcher(FakeApi::default());

        let result = dispatcher
            .call("screeps_memory_segment_get", &json!({"segment": 150}))
            .await;

        assert!(result.is_error);
        assert!(result.text().starts_with("Validation Error: segment"));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rate_limit_101st_call() {
        let (api, dispatcher) = dispatcher(FakeApi::default());

        for _ in 0..100 {
            let result = dispatcher.call("screeps_shard_info", &json!({})).await;
            assert!(!result.is_error);
        }
        let result = dispatcher.call("screeps_shard_info", &json!({})).await;

        assert!(result.is_error);
        assert!(result.text().contains("Rate limit exceeded"));
        assert_eq!(api.calls().len(), 100);

        // Other tools have their own budget
        let other = dispatcher.call("screeps_user_info", &json!({})).await;
        assert!(!other.is_error);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (api, dispatcher) = dispatcher(FakeApi::default());

        let result = dispatcher.call("screeps_launch_nukes", &json!({})).await;

        assert!(result.is_error);
        assert_eq!(result.text(), "Error (unknown tool): Unknown tool: screeps_launch_nukes");
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_api_error_is_tagged() {
        let (_, dispatcher) = dispatcher(FakeApi {
            fail: true,
            ..FakeApi::default()
        });

        let result = dispatcher
            .call("screeps_room_objects", &json!({"roomName": "W7N3"}))
            .await;

        assert!(result.is_error);
        assert_eq!(
            result.text(),
            "API Error (screeps_room_objects): HTTP 500 Internal Server Error"
        );
    }

    #[tokio::test]
    async fn test_success_is_pretty_json() {
        let (api, dispatcher) = dispatcher(FakeApi::default());

        let result = dispatcher
            .call("screeps_room_objects", &json!({"roomName": "W7N3", "shard": "shard2"}))
            .await;

        assert!(!result.is_error);
        assert_eq!(result.text(), "{\n  \"ok\": 1\n}");
        assert_eq!(api.calls(), vec!["room_objects W7N3 Some(\"shard2\")"]);
    }

    #[tokio::test]
    async fn test_sanitized_before_call() {
        let (api, dispatcher) = dispatcher(FakeApi::default());

        dispatcher
            .call(
                "screeps_console",
                &json!({"expression": "require('fs'); Game.time"}),
            )
            .await;
        dispatcher
            .call(
                "screeps_memory_segment_set",
                &json!({"segment": 3, "data": "<script>x</script>keep"}),
            )
            .await;

        assert_eq!(
            api.calls(),
            vec!["console 'fs'); Game.time", "segment_set 3 keep"]
        );
    }

    #[tokio::test]
    async fn test_stream_tools() {
        let (api, dispatcher) = dispatcher(FakeApi::default());

        let started = dispatcher
            .call("screeps_console_stream_start", &json!({"bufferSize": 20}))
            .await;
        assert!(!started.is_error);
        assert!(started.text().contains("Active: yes"));

        let stopped = dispatcher.call("screeps_console_stream_stop", &json!({})).await;
        assert_eq!(stopped.text(), "Console stream stopped. 0 message(s) remain buffered.");

        let status = dispatcher.call("screeps_console_stream_status", &json!({})).await;
        assert!(status.text().contains("Phase: stopped"));

        assert_eq!(api.calls(), vec!["stream_start None Some(20)", "stream_stop"]);
    }

    #[tokio::test]
    async fn test_stream_read_and_history() {
        let (_, dispatcher) = dispatcher(FakeApi {
            messages: vec![
                message("one", 1_000, ConsoleKind::Log),
                message("boom", 2_000, ConsoleKind::Error),
                message("two", 3_000, ConsoleKind::Log),
            ],
            ..FakeApi::default()
        });

        let read = dispatcher
            .call("screeps_console_stream_read", &json!({"since": 1000}))
            .await;
        let text = read.text();
        assert!(!text.contains("one"));
        assert!(text.contains("[shard0] [error] boom"));
        assert!(text.ends_with("Latest timestamp: 3000"));

        let history = dispatcher
            .call("screeps_console_history", &json!({"kind": "log", "limit": 1}))
            .await;
        assert_eq!(history.text(), "[1970-01-01T00:00:03.000Z] [shard0] [log] two");
    }

    #[tokio::test]
    async fn test_empty_history_hints_at_stream() {
        let (_, dispatcher) = dispatcher(FakeApi::default());

        let history = dispatcher.call("screeps_console_history", &json!({})).await;

        assert!(!history.is_error);
        assert!(history.text().contains("Start the console stream"));
    }
}
