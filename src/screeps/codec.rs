//! Console stream wire codec
//!
//! The Screeps socket speaks plain text frames:
//!
//! - `time <n>` heartbeats, which carry nothing we keep
//! - `auth ok <token>` / `auth failed` replies to our `auth` frame
//! - `gz<base64>` payloads: DEFLATE-compressed JSON
//! - anything else is JSON, usually `[channel, body]`
//!
//! Decoding never panics; a bad frame is reported as [`Error::Decode`] and the
//! caller drops it.

use std::io::Read;
use std::sync::LazyLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::{DeflateDecoder, ZlibDecoder};
use regex::Regex;
use serde_json::Value;

use super::types::{ConsoleKind, ConsoleMessage};
use crate::error::{Error, Result};

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("static regex"));

/// Keys under a console body, in the order their lines are admitted
const KIND_KEYS: [(&str, ConsoleKind); 4] = [
    ("log", ConsoleKind::Log),
    ("results", ConsoleKind::Result),
    ("errors", ConsoleKind::Error),
    ("highlight", ConsoleKind::Highlight),
];

/// A decoded socket frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Keep-alive, discarded
    Heartbeat,
    /// Server accepted our token; it may hand back a refreshed one
    AuthOk(Option<String>),
    /// Server rejected our token
    AuthFailed,
    /// Parsed JSON payload
    Payload(Value),
}

/// Decode one text frame
pub fn decode_frame(text: &str) -> Result<Frame> {
    if text.starts_with("time") {
        return Ok(Frame::Heartbeat);
    }

    if text.starts_with("gz") {
        return inflate_payload(text).map(Frame::Payload);
    }

    if let Some(rest) = text.strip_prefix("auth ") {
        let mut parts = rest.split_whitespace();
        return match parts.next() {
            Some("ok") => Ok(Frame::AuthOk(parts.next().map(str::to_string))),
            Some("failed") => Ok(Frame::AuthFailed),
            _ => Err(Error::Decode(format!("Unexpected auth reply: {}", text))),
        };
    }

    serde_json::from_str(text)
        .map(Frame::Payload)
        .map_err(|e| Error::Decode(format!("Invalid JSON frame: {}", e)))
}

/// Inflate a `gz` payload: base64 after the prefix, then DEFLATE, then JSON.
///
/// Accepts `gz` and `gz:` prefixes, and both zlib-wrapped and raw DEFLATE
/// streams.
pub fn inflate_payload(text: &str) -> Result<Value> {
    let encoded = text
        .strip_prefix("gz")
        .ok_or_else(|| Error::Decode("Missing gz prefix".to_string()))?;
    let encoded = encoded.strip_prefix(':').unwrap_or(encoded);

    let compressed = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Decode(format!("Invalid base64 payload: {}", e)))?;

    let mut json = String::new();
    if ZlibDecoder::new(compressed.as_slice())
        .read_to_string(&mut json)
        .is_err()
    {
        json.clear();
        DeflateDecoder::new(compressed.as_slice())
            .read_to_string(&mut json)
            .map_err(|e| Error::Decode(format!("Failed to inflate payload: {}", e)))?;
    }

    serde_json::from_str(&json).map_err(|e| Error::Decode(format!("Invalid inflated JSON: {}", e)))
}

/// Remove HTML tags from a console line. Idempotent.
pub fn strip_html(line: &str) -> String {
    HTML_TAG.replace_all(line, "").into_owned()
}

/// Turn a `[channel, body]` payload into console messages.
///
/// Lines are read from `log`, `results`, `errors` and `highlight`, either
/// directly on the body or nested under `messages`. A string `error` on the
/// body becomes one error line. Any other shape yields nothing.
pub fn classify(payload: &Value, default_shard: &str, timestamp_millis: i64) -> Vec<ConsoleMessage> {
    let body = match payload.as_array() {
        Some(items) if items.len() == 2 => &items[1],
        _ => return Vec::new(),
    };
    let Some(body) = body.as_object() else {
        return Vec::new();
    };

    let shard = body
        .get("shard")
        .and_then(Value::as_str)
        .unwrap_or(default_shard);

    let nested = body.get("messages").and_then(Value::as_object);
    let mut messages = Vec::new();

    for (key, kind) in KIND_KEYS {
        let lines = body
            .get(key)
            .into_iter()
            .chain(nested.and_then(|m| m.get(key)))
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(Value::as_str);

        for line in lines {
            messages.push(ConsoleMessage {
                line: strip_html(line),
                shard: shard.to_string(),
                timestamp_millis,
                kind,
            });
        }
    }

    if let Some(error) = body.get("error").and_then(Value::as_str) {
        messages.push(ConsoleMessage {
            line: strip_html(error),
            shard: shard.to_string(),
            timestamp_millis,
            kind: ConsoleKind::Error,
        });
    }

    messages
}

#[cfg(test)]
pub(crate) fn encode_gz(json: &Value, zlib: bool) -> String {
    use flate2::write::{DeflateEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    let raw = serde_json::to_vec(json).unwrap();
    let compressed = if zlib {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&raw).unwrap();
        enc.finish().unwrap()
    } else {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&raw).unwrap();
        enc.finish().unwrap()
    };
    format!("gz{}", STANDARD.encode(compressed))
}
