pub mod config;
pub mod mcp;
pub mod reasoning;

// Re-export commonly used types
pub use config::Config;
pub use mcp::{Dispatcher, ToolCall, ToolReply};
pub use reasoning::{KnowledgeSession, SessionError, SessionOptions};
