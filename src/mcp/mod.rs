//! MCP (Model Context Protocol) module
//!
//! Serves the Screeps tool catalog to an MCP client over stdio.
//!
//! ## Architecture
//!
//! - **protocol**: Wire protocol types (JSON-RPC based)
//! - **server**: Line-delimited serving loop and method routing
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use screeps_mcp::config::Config;
//! use screeps_mcp::mcp::McpServer;
//! use screeps_mcp::screeps::ScreepsClient;
//! use screeps_mcp::tools::ToolDispatcher;
//!
//! # async fn example() -> screeps_mcp::Result<()> {
//! let config = Config::from_env()?;
//! let client = Arc::new(ScreepsClient::new(config.connection()?)?);
//! let dispatcher = ToolDispatcher::new(client, 100, Duration::from_secs(60));
//!
//! Arc::new(McpServer::new(Arc::new(dispatcher))).serve_stdio().await?;
//! # Ok(())
//! # }
//! ```

mod protocol;
mod server;

pub use protocol::{
    codes, CallToolParams, McpError, McpRequest, McpResponse, McpTool, McpToolInput,
    PROTOCOL_VERSION,
};
pub use server::McpServer;
