//! # screeps-mcp
//!
//! A Model Context Protocol server for the Screeps game API.
//!
//! ## Features
//!
//! - **Schema-validated tools:** every call is checked against a closed contract
//! - **Defense in depth:** sanitization and per-tool sliding-window rate limits
//! - **Live console:** a WebSocket console stream with a bounded history buffer
//! - **Token or password auth:** passwords are exchanged for a restricted token

pub mod config;
pub mod error;
pub mod mcp;
pub mod screeps;
pub mod security;
pub mod tools;

pub use config::Config;
pub use error::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
