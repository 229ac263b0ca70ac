//! Error taxonomy for session, correlation and relay failures.

use std::time::Duration;

use emotion_mcp_types::{JsonRpcError, RequestId};

/// Errors surfaced by the bridge.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Connection refused, DNS failure, connect timeout, or an HTTP status
    /// that is neither accepted nor retryable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Every attempt was answered with `503 Service Unavailable`.
    #[error("Server unavailable after {attempts} attempts")]
    Unavailable { attempts: u32 },

    /// Non-JSON or schema-violating payload from the server.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Well-formed JSON-RPC error envelope returned by the server.
    #[error("Remote error: {0}")]
    Remote(JsonRpcError),

    /// No correlated reply arrived before the deadline.
    #[error("No reply within {0:?}")]
    Timeout(Duration),

    /// No session id was published before the wait bound.
    #[error("No session established within {0:?}")]
    SessionTimeout(Duration),

    /// Another in-flight call already owns this request id.
    #[error("Request id {0} is already in flight")]
    DuplicateRequest(RequestId),

    /// Malformed inbound request line.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl McpError {
    /// Convert into the JSON-RPC error object written back to relay callers.
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            Self::Remote(error) => error.clone(),
            Self::Parse(message) => JsonRpcError::parse_error(format!("Parse error: {message}")),
            other => JsonRpcError::internal_error(format!("Server error: {other}")),
        }
    }

    /// Whether the failure happened before the request reached the server.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Unavailable { .. })
    }
}

impl From<reqwest::Error> for McpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, McpError>;
