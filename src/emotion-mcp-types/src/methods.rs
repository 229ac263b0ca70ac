//! MCP method and tool name constants.

// Lifecycle
/// Initialize method.
pub const INITIALIZE: &str = "initialize";
/// Initialized notification.
pub const INITIALIZED: &str = "notifications/initialized";

// Tools
/// List tools method.
pub const TOOLS_LIST: &str = "tools/list";
/// Call tool method.
pub const TOOLS_CALL: &str = "tools/call";

// Ping
/// Ping method.
pub const PING: &str = "ping";

/// Tool names exposed by the emotion detection server.
pub mod tools {
    /// Summarised emotion label and confidence as text.
    pub const EMOTION_DETECTION: &str = "emotion_detection";
    /// Raw detailed prediction JSON as text.
    pub const EMOTION_DETECTION_DETAILED: &str = "emotion_detection_detailed";
}
