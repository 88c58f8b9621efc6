//! Screeps server connectivity
//!
//! - [`ScreepsClient`]: authenticated HTTP calls and the console stream
//! - [`ConsoleStream`]: the console WebSocket and its bounded buffer
//! - [`codec`]: socket frame decoding and console line classification

mod api;
mod client;
pub mod codec;
mod console;
mod types;

pub use api::ScreepsApi;
pub use client::ScreepsClient;
pub use console::{ConsoleBuffer, ConsoleStream, StreamParams};
pub use types::{
    clamp_buffer_size, ConsoleKind, ConsoleMessage, ConsoleStreamState, Session, StreamPhase,
    DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE,
};
