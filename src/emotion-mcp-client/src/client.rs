use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use emotion_mcp_types::{
    CallToolParams, CallToolResult, EmotionReading, InitializeParams, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, ListToolsResult, Tool, methods,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{McpError, Result};
use crate::transport::McpTransport;

/// Result of an `emotion_detection` tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionOutcome {
    /// The tool's text reply as sent by the server.
    pub raw_text: String,
    /// Parsed reading, when the text has the expected shape.
    pub reading: Option<EmotionReading>,
}

impl EmotionOutcome {
    pub fn from_text(raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let reading = EmotionReading::parse(&raw_text);
        Self { raw_text, reading }
    }
}

impl std::fmt::Display for EmotionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.reading {
            Some(reading) => write!(f, "{reading}"),
            None => f.write_str(&self.raw_text),
        }
    }
}

pub struct McpClient {
    transport: Arc<dyn McpTransport>,
    next_id: AtomicI64,
}

impl McpClient {
    pub fn new(transport: Arc<dyn McpTransport>) -> Self {
        Self {
            transport,
            next_id: AtomicI64::new(1),
        }
    }

    pub fn transport(&self) -> &Arc<dyn McpTransport> {
        &self.transport
    }

    /// Run the handshake: `initialize`, then `notifications/initialized`.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let result: InitializeResult = self
            .request(methods::INITIALIZE, Some(InitializeParams::default()))
            .await?;

        self.transport
            .notify(JsonRpcNotification::new(methods::INITIALIZED))
            .await?;
        debug!(server = %result.server_info.name, "Session initialized");
        Ok(result)
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        let result: ListToolsResult = self.request(methods::TOOLS_LIST, None::<()>).await?;
        Ok(result.tools)
    }

    pub async fn call_tool(&self, params: CallToolParams) -> Result<CallToolResult> {
        self.request(methods::TOOLS_CALL, Some(params)).await
    }

    /// Run the `emotion_detection` tool on `text`.
    ///
    /// A tool-level error (`isError`) is reported as [`McpError::Protocol`]
    /// carrying the tool's message.
    pub async fn detect_emotion(&self, text: &str) -> Result<EmotionOutcome> {
        let result = self
            .call_tool(CallToolParams::emotion_detection(text))
            .await?;
        let raw_text = result
            .first_text()
            .ok_or_else(|| McpError::Protocol("tool reply has no text content".to_string()))?
            .to_string();

        if result.is_error() {
            return Err(McpError::Protocol(raw_text));
        }

        Ok(EmotionOutcome::from_text(raw_text))
    }

    /// Run the `emotion_detection_detailed` tool on `text` and return its
    /// text as sent by the server.
    pub async fn detect_emotion_detailed(&self, text: &str) -> Result<String> {
        let result = self
            .call_tool(CallToolParams::emotion_detection_detailed(text))
            .await?;
        let raw_text = result
            .first_text()
            .ok_or_else(|| McpError::Protocol("tool reply has no text content".to_string()))?
            .to_string();

        if result.is_error() {
            return Err(McpError::Protocol(raw_text));
        }
        Ok(raw_text)
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut request = JsonRpcRequest::new(id, method);
        if let Some(params) = params {
            let params =
                serde_json::to_value(params).map_err(|e| McpError::Protocol(e.to_string()))?;
            request = request.with_params(params);
        }

        debug!(id, method, transport = %self.transport.describe(), "Calling server");
        let value = self
            .transport
            .send(request)
            .await?
            .into_result()
            .map_err(McpError::Remote)?;

        serde_json::from_value(value)
            .map_err(|e| McpError::Protocol(format!("unexpected {method} result: {e}")))
    }
}
