//! Client configuration.
//!
//! Every field has a default, so an empty TOML file (or no file at all) is a
//! valid configuration. Environment variables override file values and CLI
//! flags override both.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::correlator::RetryPolicy;
use crate::error::{McpError, Result};

/// Environment variable naming the MCP server base URL.
pub const ENV_SERVER_URL: &str = "MCP_SERVER_URL";
/// Legacy name for the MCP server base URL.
pub const ENV_SERVER_URL_LEGACY: &str = "SG_BASE";
/// Environment variable naming the prediction API base URL.
pub const ENV_PREDICT_URL: &str = "DIRECT_API_BASE";

/// Bridge client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the MCP server (SSE gateway or synchronous endpoint).
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Base URL of the prediction API used for direct calls.
    #[serde(default = "default_predict_url")]
    pub predict_url: String,

    /// Event stream and session settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Request transmission and correlation settings.
    #[serde(default)]
    pub request: RequestConfig,
}

fn default_server_url() -> String {
    "http://127.0.0.1:9000".to_string()
}

fn default_predict_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            predict_url: default_predict_url(),
            session: SessionConfig::default(),
            request: RequestConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| McpError::Config(format!("{}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| McpError::Config(format!("{}: {e}", path.display())))
    }

    /// Defaults overridden from the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Override fields using `lookup` as the environment.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_SERVER_URL).or_else(|| lookup(ENV_SERVER_URL_LEGACY)) {
            self.server_url = url;
        }
        if let Some(url) = lookup(ENV_PREDICT_URL) {
            self.predict_url = url;
        }
    }

    /// Join a path onto the server base URL.
    pub fn server_endpoint(&self, path: &str) -> String {
        join_url(&self.server_url, path)
    }
}

/// Event stream and session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Path of the event stream endpoint.
    #[serde(default = "default_sse_path")]
    pub sse_path: String,

    /// Path that session-scoped requests are POSTed to.
    #[serde(default = "default_message_path")]
    pub message_path: String,

    /// Path probed before opening the stream.
    #[serde(default = "default_sse_path")]
    pub readiness_path: String,

    /// Readiness probe attempts before connecting anyway.
    #[serde(default = "default_readiness_attempts")]
    pub readiness_attempts: u32,

    /// Pause between readiness probes in milliseconds.
    #[serde(default = "default_readiness_interval_ms")]
    pub readiness_interval_ms: u64,

    /// Connect timeout for the stream in seconds. The stream itself has no
    /// read timeout.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Delay before reconnecting after the stream ends, in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// How long a caller waits for a session id, in seconds.
    #[serde(default = "default_session_wait_secs")]
    pub session_wait_secs: u64,
}

fn default_sse_path() -> String {
    "/sse".to_string()
}

fn default_message_path() -> String {
    "/message".to_string()
}

fn default_readiness_attempts() -> u32 {
    60
}

fn default_readiness_interval_ms() -> u64 {
    2_000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_reconnect_delay_ms() -> u64 {
    5_000
}

fn default_session_wait_secs() -> u64 {
    30
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sse_path: default_sse_path(),
            message_path: default_message_path(),
            readiness_path: default_sse_path(),
            readiness_attempts: default_readiness_attempts(),
            readiness_interval_ms: default_readiness_interval_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            session_wait_secs: default_session_wait_secs(),
        }
    }
}

impl SessionConfig {
    pub fn readiness_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn session_wait(&self) -> Duration {
        Duration::from_secs(self.session_wait_secs)
    }
}

/// Request transmission and correlation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Timeout for a single HTTP POST in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra attempts after a `503` reply.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Backoff base in milliseconds; attempt `n` waits `base * n`.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// How long a session call waits for its correlated reply, in seconds.
    #[serde(default = "default_reply_deadline_secs")]
    pub reply_deadline_secs: u64,

    /// Route tried first by the synchronous transport.
    #[serde(default = "default_primary_path")]
    pub primary_path: String,

    /// Route tried when the primary route fails.
    #[serde(default = "default_message_path")]
    pub fallback_path: String,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_reply_deadline_secs() -> u64 {
    60
}

fn default_primary_path() -> String {
    "/mcp".to_string()
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            reply_deadline_secs: default_reply_deadline_secs(),
            primary_path: default_primary_path(),
            fallback_path: default_message_path(),
        }
    }
}

impl RequestConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn reply_deadline(&self) -> Duration {
        Duration::from_secs(self.reply_deadline_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            base_delay: self.retry_base_delay(),
        }
    }
}

/// Join `path` onto `base` without doubling or dropping the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
