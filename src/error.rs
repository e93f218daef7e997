// src/error.rs
// Standardized error types for the gateway

use thiserror::Error;

/// Main error type for the toolhub library
#[derive(Error, Debug)]
pub enum HubError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to spawn MCP server '{server}': {message}")]
    Spawn { server: String, message: String },

    #[error("MCP handshake with '{server}' failed: {message}")]
    Handshake { server: String, message: String },

    #[error("MCP server '{server}' returned error {code}: {message}")]
    Child {
        server: String,
        code: i64,
        message: String,
    },

    #[error("MCP server '{server}' crashed: {message}")]
    Crashed { server: String, message: String },

    #[error("request to MCP server '{server}' timed out after {seconds}s")]
    Timeout { server: String, seconds: u64 },

    #[error("unknown server '{0}' - not present in the gateway configuration")]
    UnknownServer(String),

    #[error("server '{server}' has no tool named '{tool}'")]
    UnknownTool { server: String, tool: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience type alias for Result using HubError
pub type Result<T> = std::result::Result<T, HubError>;

impl HubError {
    /// True when the child behind this error is unusable and must be
    /// evicted from the pool (the next call respawns it).
    pub fn is_fatal_for_child(&self) -> bool {
        matches!(self, HubError::Crashed { .. })
    }
}

impl From<String> for HubError {
    fn from(s: String) -> Self {
        HubError::Protocol(s)
    }
}
