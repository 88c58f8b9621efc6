//! Tools - the Screeps operations exposed to MCP clients
//!
//! The tool set is closed: [`ToolName`] lists every tool, each with a static
//! [`Contract`] that both validates arguments and renders the advertised JSON
//! Schema. [`ToolDispatcher`] is the single entry point for calls.
//!
//! ## Adding a New Tool
//!
//! 1. Add a variant to `ToolName` (and to `ToolName::ALL`, in order)
//! 2. Give it a name, description and contract in `catalog.rs`
//! 3. Add a `ToolRequest` variant with typed arguments
//! 4. Handle it in `ToolDispatcher::execute`

mod catalog;
mod dispatcher;
mod schema;
mod traits;

pub use catalog::{
    ConsoleArgs, HistoryArgs, MemoryDeleteArgs, MemoryGetArgs, MemorySetArgs, RoomArgs,
    SegmentArgs, SegmentSetArgs, ShardArgs, StreamReadArgs, StreamStartArgs, TerrainArgs,
    ToolName, ToolRequest,
};
pub use dispatcher::ToolDispatcher;
pub use schema::{validate, Contract, FieldError, FieldSpec, FieldType, ValidationFailure};
pub use traits::{ToolContent, ToolResult};
