//! MCP (Model Context Protocol) server
//!
//! JSON-RPC 2.0 over stdio. No external SDK - blocking I/O, one session worker.

mod dispatcher;
mod protocol;
mod server;
pub mod tools;

pub use dispatcher::Dispatcher;
pub use protocol::PROTOCOL_VERSION;
pub use server::{run_mcp_server, serve, KNOWLEDGE_BASE_URI};
pub use tools::{Relation, ToolCall, ToolCallError, ToolReply};
