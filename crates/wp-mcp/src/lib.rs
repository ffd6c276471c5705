//! wp-mcp: MCP connector collaborator — reaches remote tool servers over a
//! declared transport, authenticated from the merged `authentication` block.

pub mod auth;
pub mod client;
pub mod connector;
pub mod endpoint;

pub use auth::Authentication;
pub use client::{McpClient, RemoteTool, ServerInfo};
pub use connector::{McpConnect, McpConnector, McpTool};
pub use endpoint::Endpoint;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("client error: {0}")]
    Client(String),
    #[error("invalid connector config `{key}`: {message}")]
    InvalidConfig { key: String, message: String },
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("remote tool failed: {0}")]
    ToolFailed(String),
    #[error("tool not found: {0}")]
    ToolNotFound(String),
}
