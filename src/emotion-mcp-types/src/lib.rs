//! Emotion MCP Types - JSON-RPC and Model Context Protocol definitions.
//!
//! The subset of MCP spoken between the bridge and the emotion detection
//! server: the JSON-RPC 2.0 envelope, the initialize handshake, tool listing
//! and tool calls, plus the emotion prediction payloads carried inside them.
//!
//! # Example
//! ```rust
//! use emotion_mcp_types::{CallToolParams, JsonRpcRequest, methods};
//!
//! let params = CallToolParams::emotion_detection("I am furious");
//! let request = JsonRpcRequest::new(1, methods::TOOLS_CALL)
//!     .with_params(serde_json::to_value(params).unwrap());
//! assert_eq!(request.method, "tools/call");
//! ```

// ============================================================================
// Module declarations
// ============================================================================

mod capabilities;
mod content;
mod emotion;
mod initialization;
mod jsonrpc;
mod tools;

/// MCP method name constants.
pub mod methods;

// ============================================================================
// Protocol Version
// ============================================================================

/// Current MCP protocol version.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ============================================================================
// Re-exports
// ============================================================================

// JSON-RPC types
pub use jsonrpc::{
    ErrorCode, JSONRPC_VERSION, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestId,
};

// Initialization types
pub use initialization::{Implementation, InitializeParams, InitializeResult};

// Capability types
pub use capabilities::{ClientCapabilities, ServerCapabilities, ToolsCapability};

// Tool types
pub use tools::{
    CallToolParams, CallToolResult, ListToolsResult, PropertySchema, Tool, ToolInputSchema,
};

// Content types
pub use content::Content;

// Emotion payloads
pub use emotion::{EmotionPrediction, EmotionReading, indicator};
