//! Transports that carry one JSON-RPC request to the server and return its
//! reply.
//!
//! Two flavours exist because the server has two revisions: a synchronous
//! endpoint that answers in the POST body, and an SSE gateway that answers on
//! the session stream.

use async_trait::async_trait;
use emotion_mcp_types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{ClientConfig, join_url};
use crate::correlator::{Correlator, RetryPolicy, post_with_retry};
use crate::error::{McpError, Result};
use crate::session::SessionManager;

// ============================================================================
// Transport Trait
// ============================================================================

/// Carries a single request to the server.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send `request` and return the server's reply.
    ///
    /// A JSON-RPC error reply is returned as `Ok`; only failures to obtain a
    /// reply at all are `Err`.
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Deliver `notification`; completes once the server has accepted it.
    async fn notify(&self, notification: JsonRpcNotification) -> Result<()>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

// ============================================================================
// HTTP Transport
// ============================================================================

/// Synchronous JSON-RPC over HTTP POST.
///
/// Posts to the primary route first and falls back to the secondary route on
/// any failure.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    primary_path: String,
    fallback_path: String,
    policy: RetryPolicy,
}

impl HttpTransport {
    /// Create a transport from configuration.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = emotion_common::create_client_with_timeout(config.request.timeout())
            .map_err(McpError::Transport)?;
        Ok(Self::with_client(http, config))
    }

    /// Create a transport around an existing HTTP client.
    pub fn with_client(http: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            http,
            base_url: config.server_url.clone(),
            primary_path: config.request.primary_path.clone(),
            fallback_path: config.request.fallback_path.clone(),
            policy: config.request.retry_policy(),
        }
    }

    async fn send_to(&self, path: &str, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let url = join_url(&self.base_url, path);
        let body = serde_json::to_value(request).map_err(|e| McpError::Protocol(e.to_string()))?;

        let outcome = post_with_retry(&self.http, &url, &body, self.policy).await?;
        let Some(body) = outcome.body else {
            return Err(McpError::Protocol(format!(
                "{url} answered {} without a JSON body",
                outcome.status
            )));
        };

        JsonRpcResponse::from_value(body)
            .ok_or_else(|| McpError::Protocol(format!("{url} did not return a JSON-RPC response")))
    }

    async fn notify_to(&self, path: &str, notification: &JsonRpcNotification) -> Result<()> {
        let url = join_url(&self.base_url, path);
        let body =
            serde_json::to_value(notification).map_err(|e| McpError::Protocol(e.to_string()))?;

        post_with_retry(&self.http, &url, &body, self.policy).await?;
        Ok(())
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        match self.send_to(&self.primary_path, &request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(
                    route = %self.primary_path,
                    fallback = %self.fallback_path,
                    error = %e,
                    "Primary route failed, trying fallback"
                );
                self.send_to(&self.fallback_path, &request).await
            }
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        match self.notify_to(&self.primary_path, &notification).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    route = %self.primary_path,
                    fallback = %self.fallback_path,
                    error = %e,
                    "Primary route rejected notification, trying fallback"
                );
                self.notify_to(&self.fallback_path, &notification).await
            }
        }
    }

    fn describe(&self) -> String {
        format!("http {}", self.base_url)
    }
}

// ============================================================================
// Session Transport
// ============================================================================

/// JSON-RPC through an SSE session: POST to the message endpoint, reply on the
/// stream.
pub struct SessionTransport {
    session: SessionManager,
    correlator: Correlator,
    base_url: String,
    session_wait: std::time::Duration,
    reply_deadline: std::time::Duration,
}

impl SessionTransport {
    /// Build the session and correlator and start the stream reader.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let (replies, inbound) = mpsc::unbounded_channel();
        let session = SessionManager::new(config.clone(), replies)?;

        let http = emotion_common::create_client_with_timeout(config.request.timeout())
            .map_err(McpError::Transport)?;
        let correlator = Correlator::new(
            http,
            config.server_endpoint(&config.session.message_path),
            config.request.retry_policy(),
            inbound,
        );

        session.start();

        Ok(Self {
            session,
            correlator,
            base_url: config.server_url.clone(),
            session_wait: config.session.session_wait(),
            reply_deadline: config.request.reply_deadline(),
        })
    }

    /// The underlying session.
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// The underlying correlator.
    pub fn correlator(&self) -> &Correlator {
        &self.correlator
    }
}

#[async_trait]
impl McpTransport for SessionTransport {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        // Re-read for every request; the id changes across reconnects.
        let session_id = self.session.current_session_id(self.session_wait).await?;
        debug!(session_id = %session_id, id = %request.id, "Sending via session");
        self.correlator
            .call(&session_id, &request, self.reply_deadline)
            .await
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        let session_id = self.session.current_session_id(self.session_wait).await?;
        debug!(session_id = %session_id, method = %notification.method, "Notifying via session");
        self.correlator
            .notify(&session_id, &notification, self.reply_deadline)
            .await
    }

    fn describe(&self) -> String {
        format!("sse {}", self.base_url)
    }
}
