//! Direct calls to the prediction API, bypassing MCP.

use emotion_mcp_types::EmotionPrediction;
use serde_json::json;
use tracing::debug;

use crate::config::join_url;
use crate::error::{McpError, Result};

pub struct PredictClient {
    http: reqwest::Client,
    base_url: String,
}

impl PredictClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = emotion_common::create_default_client().map_err(McpError::Transport)?;
        Ok(Self::with_client(http, base_url))
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// `POST {base}/predict {"text": ...}`.
    pub async fn predict(&self, text: &str) -> Result<EmotionPrediction> {
        let url = join_url(&self.base_url, "/predict");
        debug!(url = %url, chars = text.chars().count(), "Requesting prediction");

        let resp = self
            .http
            .post(&url)
            .json(&json!({ "text": text }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(McpError::Transport(format!("HTTP {status}: {body}")));
        }

        resp.json::<EmotionPrediction>()
            .await
            .map_err(|e| McpError::Protocol(format!("invalid prediction: {e}")))
    }
}
