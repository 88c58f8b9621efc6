//! The Screeps tool catalog
//!
//! A closed set of tools. Each [`ToolName`] owns a static [`Contract`]; raw
//! arguments become a typed [`ToolRequest`] only after passing it, and are
//! sanitized before anything reaches the network.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::schema::{validate, Contract, FieldSpec, ValidationFailure};
use crate::screeps::{ConsoleKind, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
use crate::security::{sanitize_console_command, sanitize_memory_path, sanitize_string};

static ROOM_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[EW]\d+[NS]\d+$").expect("static regex"));

static SHARD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,32}$").expect("static regex"));

/// Dot-separated keys; no empty segments, so no `..`
static MEMORY_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\w\-\[\]#@ ]+(\.[\w\-\[\]#@ ]+)*$").expect("static regex")
});

/// Largest memory segment the server stores
const MAX_SEGMENT_BYTES: usize = 100 * 1024;
const MAX_EXPRESSION_LEN: usize = 10_000;
const MAX_PATH_LEN: usize = 500;

const CONSOLE_KINDS: &[&str] = &["log", "result", "error", "highlight"];

/// Every tool this server exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    UserInfo,
    RoomObjects,
    RoomTerrain,
    MemoryGet,
    MemorySet,
    MemoryDelete,
    SegmentGet,
    SegmentSet,
    Console,
    ConsoleHistory,
    StreamStart,
    StreamStop,
    StreamStatus,
    StreamRead,
    ShardInfo,
    GameTime,
}

impl ToolName {
    /// All tools, in declaration order
    pub const ALL: [ToolName; 16] = [
        ToolName::UserInfo,
        ToolName::RoomObjects,
        ToolName::RoomTerrain,
        ToolName::MemoryGet,
        ToolName::MemorySet,
        ToolName::MemoryDelete,
        ToolName::SegmentGet,
        ToolName::SegmentSet,
        ToolName::Console,
        ToolName::ConsoleHistory,
        ToolName::StreamStart,
        ToolName::StreamStop,
        ToolName::StreamStatus,
        ToolName::StreamRead,
        ToolName::ShardInfo,
        ToolName::GameTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolName::UserInfo => "screeps_user_info",
            ToolName::RoomObjects => "screeps_room_objects",
            ToolName::RoomTerrain => "screeps_room_terrain",
            ToolName::MemoryGet => "screeps_memory_get",
            ToolName::MemorySet => "screeps_memory_set",
            ToolName::MemoryDelete => "screeps_memory_delete",
            ToolName::SegmentGet => "screeps_memory_segment_get",
            ToolName::SegmentSet => "screeps_memory_segment_set",
            ToolName::Console => "screeps_console",
            ToolName::ConsoleHistory => "screeps_console_history",
            ToolName::StreamStart => "screeps_console_stream_start",
            ToolName::StreamStop => "screeps_console_stream_stop",
            ToolName::StreamStatus => "screeps_console_stream_status",
            ToolName::StreamRead => "screeps_console_stream_read",
            ToolName::ShardInfo => "screeps_shard_info",
            ToolName::GameTime => "screeps_game_time",
        }
    }

    /// Look a tool up by its wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolName::UserInfo => "Get information about the authenticated Screeps user",
            ToolName::RoomObjects => "List all objects in a room (creeps, structures, sources, ...)",
            ToolName::RoomTerrain => "Get the terrain of a room",
            ToolName::MemoryGet => "Read Memory, or the value at a dot-separated path inside it",
            ToolName::MemorySet => "Write a JSON value at a dot-separated Memory path",
            ToolName::MemoryDelete => "Delete the value at a dot-separated Memory path",
            ToolName::SegmentGet => "Read a raw memory segment (0-99)",
            ToolName::SegmentSet => "Overwrite a raw memory segment (0-99)",
            ToolName::Console => "Execute an expression in the game console",
            ToolName::ConsoleHistory => "Show recent console output captured by the console stream",
            ToolName::StreamStart => "Subscribe to live console output and buffer it for reading",
            ToolName::StreamStop => "Stop the live console subscription (buffered output is kept)",
            ToolName::StreamStatus => "Show whether the console stream is active and how much is buffered",
            ToolName::StreamRead => "Read buffered console output, optionally only newer than a timestamp",
            ToolName::ShardInfo => "List shards with their tick rate and population",
            ToolName::GameTime => "Get the current game tick of a shard",
        }
    }

    /// Input contract of this tool
    pub fn contract(&self) -> &'static Contract {
        // CONTRACTS is built from ALL, whose order matches the discriminants
        &CONTRACTS[*self as usize]
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static CONTRACTS: LazyLock<Vec<Contract>> =
    LazyLock::new(|| ToolName::ALL.iter().map(build_contract).collect());

fn shard() -> FieldSpec {
    FieldSpec::string("shard", "Shard name; defaults to the configured shard").pattern(&SHARD_NAME)
}

fn room_name() -> FieldSpec {
    FieldSpec::string("roomName", "Room name, e.g. W7N3")
        .required()
        .pattern(&ROOM_NAME)
}

fn memory_path(required: bool) -> FieldSpec {
    let field = FieldSpec::string("path", "Dot-separated Memory path, e.g. creeps.Harvester1")
        .length(1, MAX_PATH_LEN)
        .pattern(&MEMORY_PATH);
    if required {
        field.required()
    } else {
        field
    }
}

fn segment() -> FieldSpec {
    FieldSpec::integer("segment", "Segment number").required().range(0, 99)
}

fn build_contract(tool: &ToolName) -> Contract {
    match tool {
        ToolName::UserInfo | ToolName::StreamStop | ToolName::StreamStatus | ToolName::ShardInfo => {
            Contract::empty()
        }
        ToolName::RoomObjects => Contract::new(vec![room_name(), shard()]),
        ToolName::RoomTerrain => Contract::new(vec![
            room_name(),
            shard(),
            FieldSpec::boolean("encoded", "Return terrain as an encoded string")
                .default_value(json!(true)),
        ]),
        ToolName::MemoryGet => Contract::new(vec![memory_path(false), shard()]),
        ToolName::MemorySet => Contract::new(vec![
            memory_path(true),
            FieldSpec::any("value", "JSON value to store").required(),
            shard(),
        ]),
        ToolName::MemoryDelete => Contract::new(vec![memory_path(true), shard()]),
        ToolName::SegmentGet => Contract::new(vec![segment(), shard()]),
        ToolName::SegmentSet => Contract::new(vec![
            segment(),
            FieldSpec::string("data", "Segment contents")
                .required()
                .length(0, MAX_SEGMENT_BYTES),
            shard(),
        ]),
        ToolName::Console => Contract::new(vec![
            FieldSpec::string("expression", "JavaScript expression to run")
                .required()
                .length(1, MAX_EXPRESSION_LEN),
            shard(),
        ]),
        ToolName::ConsoleHistory => Contract::new(vec![
            FieldSpec::integer("limit", "Number of recent lines")
                .range(1, 200)
                .default_value(json!(20)),
            FieldSpec::one_of("kind", "Only lines of this kind", CONSOLE_KINDS),
        ]),
        ToolName::StreamStart => Contract::new(vec![
            shard(),
            FieldSpec::integer("bufferSize", "Number of lines to retain")
                .range(MIN_BUFFER_SIZE as i64, MAX_BUFFER_SIZE as i64)
                .default_value(json!(DEFAULT_BUFFER_SIZE)),
        ]),
        ToolName::StreamRead => Contract::new(vec![
            FieldSpec::integer("limit", "Maximum number of lines")
                .range(1, 500)
                .default_value(json!(50)),
            FieldSpec::integer("since", "Only lines newer than this timestamp (ms)").minimum(0),
        ]),
        ToolName::GameTime => Contract::new(vec![shard()]),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomArgs {
    pub room_name: String,
    pub shard: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerrainArgs {
    pub room_name: String,
    pub shard: Option<String>,
    pub encoded: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MemoryGetArgs {
    pub path: Option<String>,
    pub shard: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MemorySetArgs {
    pub path: String,
    pub value: Value,
    pub shard: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MemoryDeleteArgs {
    pub path: String,
    pub shard: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SegmentArgs {
    pub segment: u8,
    pub shard: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SegmentSetArgs {
    pub segment: u8,
    pub data: String,
    pub shard: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConsoleArgs {
    pub expression: String,
    pub shard: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryArgs {
    pub limit: usize,
    pub kind: Option<ConsoleKind>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStartArgs {
    pub shard: Option<String>,
    pub buffer_size: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamReadArgs {
    pub limit: usize,
    pub since: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ShardArgs {
    pub shard: Option<String>,
}

/// A validated, typed tool call
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    UserInfo,
    RoomObjects(RoomArgs),
    RoomTerrain(TerrainArgs),
    MemoryGet(MemoryGetArgs),
    MemorySet(MemorySetArgs),
    MemoryDelete(MemoryDeleteArgs),
    SegmentGet(SegmentArgs),
    SegmentSet(SegmentSetArgs),
    Console(ConsoleArgs),
    ConsoleHistory(HistoryArgs),
    StreamStart(StreamStartArgs),
    StreamStop,
    StreamStatus,
    StreamRead(StreamReadArgs),
    ShardInfo,
    GameTime(ShardArgs),
}

fn typed<T: DeserializeOwned>(fields: Map<String, Value>) -> Result<T, ValidationFailure> {
    serde_json::from_value(Value::Object(fields)).map_err(|e| ValidationFailure::single("", e.to_string()))
}

impl ToolRequest {
    /// Validate raw arguments against the tool's contract
    pub fn parse(tool: ToolName, args: &Value) -> Result<Self, ValidationFailure> {
        let fields = validate(tool.contract(), args)?;

        Ok(match tool {
            ToolName::UserInfo => ToolRequest::UserInfo,
            ToolName::RoomObjects => ToolRequest::RoomObjects(typed(fields)?),
            ToolName::RoomTerrain => ToolRequest::RoomTerrain(typed(fields)?),
            ToolName::MemoryGet => ToolRequest::MemoryGet(typed(fields)?),
            ToolName::MemorySet => ToolRequest::MemorySet(typed(fields)?),
            ToolName::MemoryDelete => ToolRequest::MemoryDelete(typed(fields)?),
            ToolName::SegmentGet => ToolRequest::SegmentGet(typed(fields)?),
            ToolName::SegmentSet => ToolRequest::SegmentSet(typed(fields)?),
            ToolName::Console => ToolRequest::Console(typed(fields)?),
            ToolName::ConsoleHistory => ToolRequest::ConsoleHistory(typed(fields)?),
            ToolName::StreamStart => ToolRequest::StreamStart(typed(fields)?),
            ToolName::StreamStop => ToolRequest::StreamStop,
            ToolName::StreamStatus => ToolRequest::StreamStatus,
            ToolName::StreamRead => ToolRequest::StreamRead(typed(fields)?),
            ToolName::ShardInfo => ToolRequest::ShardInfo,
            ToolName::GameTime => ToolRequest::GameTime(typed(fields)?),
        })
    }

    /// Scrub string fields bound for the server.
    ///
    /// Fails if a required string is left empty.
    pub fn sanitized(self) -> Result<Self, ValidationFailure> {
        Ok(match self {
            ToolRequest::RoomObjects(args) => ToolRequest::RoomObjects(RoomArgs {
                room_name: sanitize_string(&args.room_name),
                shard: sanitize_shard(args.shard),
            }),
            ToolRequest::RoomTerrain(args) => ToolRequest::RoomTerrain(TerrainArgs {
                room_name: sanitize_string(&args.room_name),
                shard: sanitize_shard(args.shard),
                encoded: args.encoded,
            }),
            ToolRequest::MemoryGet(args) => ToolRequest::MemoryGet(MemoryGetArgs {
                path: args
                    .path
                    .map(|p| non_empty("path", sanitize_memory_path(&p)))
                    .transpose()?,
                shard: sanitize_shard(args.shard),
            }),
            ToolRequest::MemorySet(args) => ToolRequest::MemorySet(MemorySetArgs {
                path: non_empty("path", sanitize_memory_path(&args.path))?,
                value: sanitize_value(args.value)?,
                shard: sanitize_shard(args.shard),
            }),
            ToolRequest::MemoryDelete(args) => ToolRequest::MemoryDelete(MemoryDeleteArgs {
                path: non_empty("path", sanitize_memory_path(&args.path))?,
                shard: sanitize_shard(args.shard),
            }),
            ToolRequest::SegmentGet(args) => ToolRequest::SegmentGet(SegmentArgs {
                segment: args.segment,
                shard: sanitize_shard(args.shard),
            }),
            ToolRequest::SegmentSet(args) => ToolRequest::SegmentSet(SegmentSetArgs {
                segment: args.segment,
                data: sanitize_string(&args.data),
                shard: sanitize_shard(args.shard),
            }),
            ToolRequest::Console(args) => ToolRequest::Console(ConsoleArgs {
                expression: non_empty("expression", sanitize_console_command(&args.expression))?,
                shard: sanitize_shard(args.shard),
            }),
            ToolRequest::StreamStart(args) => ToolRequest::StreamStart(StreamStartArgs {
                shard: sanitize_shard(args.shard),
                buffer_size: args.buffer_size,
            }),
            ToolRequest::GameTime(args) => ToolRequest::GameTime(ShardArgs {
                shard: sanitize_shard(args.shard),
            }),
            other => other,
        })
    }
}

fn sanitize_shard(shard: Option<String>) -> Option<String> {
    shard.map(|s| sanitize_string(&s)).filter(|s| !s.is_empty())
}

fn non_empty(field: &str, value: String) -> Result<String, ValidationFailure> {
    if value.is_empty() {
        Err(ValidationFailure::single(field, "is empty after sanitization"))
    } else {
        Ok(value)
    }
}

/// Sanitize every string inside a JSON value, keys included.
///
/// Fails if two keys of one object sanitize to the same string.
fn sanitize_value(value: Value) -> Result<Value, ValidationFailure> {
    Ok(match value {
        Value::String(s) => Value::String(sanitize_string(&s)),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(sanitize_value)
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut clean = Map::with_capacity(map.len());
            for (key, item) in map {
                let key = sanitize_string(&key);
                if clean.contains_key(&key) {
                    return Err(ValidationFailure::single(
                        "value",
                        format!("key '{}' collides with another key after sanitization", key),
                    ));
                }
                clean.insert(key, sanitize_value(item)?);
            }
            Value::Object(clean)
        }
        other => other,
    })
}
