//! Request/response correlation over the session stream.
//!
//! Requests are POSTed to the session-scoped message endpoint and their replies
//! arrive later on the event stream, possibly interleaved with replies to other
//! requests. Each call registers a one-shot completion handle keyed by its
//! request id; a dispatcher task routes every inbound reply to the handle with
//! the same id and drops the rest.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use emotion_mcp_types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{McpError, Result};

// ============================================================================
// Retry policy
// ============================================================================

/// Retry settings for `503 Service Unavailable` replies.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Extra attempts after the first.
    pub retries: u32,
    /// Backoff base; retry `n` waits `base * n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Delay before retry number `retry` (1-based).
pub fn backoff_delay(base: Duration, retry: u32) -> Duration {
    base.saturating_mul(retry)
}

/// An accepted POST.
#[derive(Debug, Clone)]
pub struct PostOutcome {
    pub status: StatusCode,
    /// The response body, when it was JSON.
    pub body: Option<Value>,
}

impl PostOutcome {
    /// Whether the server only enqueued the request.
    pub fn is_async(&self) -> bool {
        self.status == StatusCode::ACCEPTED
    }
}

/// POST `body` as JSON, retrying on `503` per `policy`.
///
/// Any `2xx` is accepted. Connection failures and other statuses fail at once
/// with [`McpError::Transport`]; running out of retries yields
/// [`McpError::Unavailable`].
pub async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    body: &Value,
    policy: RetryPolicy,
) -> Result<PostOutcome> {
    let attempts = policy.retries.saturating_add(1);

    for attempt in 1..=attempts {
        if attempt > 1 {
            let delay = backoff_delay(policy.base_delay, attempt - 1);
            debug!(url, attempt, ?delay, "Retrying request");
            tokio::time::sleep(delay).await;
        }

        let resp = client.post(url).json(body).send().await?;
        let status = resp.status();

        if status.is_success() {
            let text = resp.text().await?;
            let body = serde_json::from_str::<Value>(&text).ok();
            debug!(url, status = %status, "Request accepted");
            return Ok(PostOutcome { status, body });
        }

        if status == StatusCode::SERVICE_UNAVAILABLE {
            warn!(url, attempt, attempts, "Server unavailable");
            continue;
        }

        let text = resp.text().await.unwrap_or_default();
        return Err(McpError::Transport(format!("HTTP {status}: {text}")));
    }

    Err(McpError::Unavailable { attempts })
}

// ============================================================================
// Correlator
// ============================================================================

type PendingMap = HashMap<RequestId, (u64, oneshot::Sender<JsonRpcResponse>)>;

/// Matches stream replies to the calls that are waiting for them.
pub struct Correlator {
    http: reqwest::Client,
    message_url: String,
    policy: RetryPolicy,
    pending: Arc<Mutex<PendingMap>>,
    next_token: AtomicU64,
    dispatcher: JoinHandle<()>,
}

impl Correlator {
    /// Create a correlator fed by `inbound`.
    ///
    /// `message_url` is the session-scoped endpoint without its query. Must be
    /// called from within a Tokio runtime.
    pub fn new(
        http: reqwest::Client,
        message_url: impl Into<String>,
        policy: RetryPolicy,
        inbound: mpsc::UnboundedReceiver<JsonRpcResponse>,
    ) -> Self {
        let pending = Arc::new(Mutex::new(PendingMap::new()));
        let dispatcher = tokio::spawn(dispatch_replies(pending.clone(), inbound));

        Self {
            http,
            message_url: message_url.into(),
            policy,
            pending,
            next_token: AtomicU64::new(1),
            dispatcher,
        }
    }

    /// Number of calls currently awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    /// Send `request` within `session_id` and wait for its reply.
    ///
    /// `deadline` bounds the whole call, transmission and retries included.
    /// The returned response may carry a JSON-RPC error; interpreting it is
    /// up to the caller.
    pub async fn call(
        &self,
        session_id: &str,
        request: &JsonRpcRequest,
        deadline: Duration,
    ) -> Result<JsonRpcResponse> {
        let (reply, _registration) = self.register(request.id.clone())?;

        match tokio::time::timeout(deadline, self.exchange(session_id, request, reply)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(id = %request.id, method = %request.method, "No reply before deadline");
                Err(McpError::Timeout(deadline))
            }
        }
    }

    /// Send `notification` within `session_id` without waiting for a reply.
    ///
    /// Completes once the server accepts the POST; `deadline` bounds the
    /// transmission and its retries.
    pub async fn notify(
        &self,
        session_id: &str,
        notification: &JsonRpcNotification,
        deadline: Duration,
    ) -> Result<()> {
        let url = self.session_url(session_id);
        let body =
            serde_json::to_value(notification).map_err(|e| McpError::Protocol(e.to_string()))?;

        debug!(method = %notification.method, "Sending notification");
        match tokio::time::timeout(deadline, post_with_retry(&self.http, &url, &body, self.policy))
            .await
        {
            Ok(outcome) => outcome.map(|_| ()),
            Err(_) => {
                warn!(method = %notification.method, "Notification not accepted before deadline");
                Err(McpError::Timeout(deadline))
            }
        }
    }

    fn session_url(&self, session_id: &str) -> String {
        format!(
            "{}?sessionId={}",
            self.message_url,
            urlencoding::encode(session_id)
        )
    }

    async fn exchange(
        &self,
        session_id: &str,
        request: &JsonRpcRequest,
        reply: oneshot::Receiver<JsonRpcResponse>,
    ) -> Result<JsonRpcResponse> {
        let url = self.session_url(session_id);
        let body = serde_json::to_value(request).map_err(|e| McpError::Protocol(e.to_string()))?;

        debug!(id = %request.id, method = %request.method, "Sending request");
        let outcome = post_with_retry(&self.http, &url, &body, self.policy).await?;

        if !outcome.is_async()
            && let Some(response) = outcome.body.and_then(JsonRpcResponse::from_value)
            && response.id == request.id
        {
            debug!(id = %request.id, "Reply returned synchronously");
            return Ok(response);
        }

        reply
            .await
            .map_err(|_| McpError::Transport("reply dispatcher stopped".to_string()))
    }

    fn register(
        &self,
        id: RequestId,
    ) -> Result<(oneshot::Receiver<JsonRpcResponse>, Registration)> {
        let mut pending = self.pending.lock();
        if pending.contains_key(&id) {
            return Err(McpError::DuplicateRequest(id));
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        pending.insert(id.clone(), (token, tx));

        Ok((
            rx,
            Registration {
                pending: self.pending.clone(),
                id,
                token,
            },
        ))
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Removes a pending entry when its call finishes, however it finishes.
struct Registration {
    pending: Arc<Mutex<PendingMap>>,
    id: RequestId,
    token: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        if pending.get(&self.id).is_some_and(|(token, _)| *token == self.token) {
            pending.remove(&self.id);
        }
    }
}

async fn dispatch_replies(
    pending: Arc<Mutex<PendingMap>>,
    mut inbound: mpsc::UnboundedReceiver<JsonRpcResponse>,
) {
    while let Some(response) = inbound.recv().await {
        deliver(&pending, response);
    }
    debug!("Inbound reply channel closed");
}

fn deliver(pending: &Mutex<PendingMap>, response: JsonRpcResponse) -> bool {
    let entry = pending.lock().remove(&response.id);
    match entry {
        Some((_, tx)) => tx.send(response).is_ok(),
        None => {
            debug!(id = %response.id, "Dropping reply with no pending call");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emotion_mcp_types::{JsonRpcError, methods};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Instant;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            base_delay: Duration::from_millis(20),
        }
    }

    fn correlator(
        server: &MockServer,
        policy: RetryPolicy,
    ) -> (Arc<Correlator>, mpsc::UnboundedSender<JsonRpcResponse>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let correlator = Correlator::new(
            reqwest::Client::new(),
            format!("{}/message", server.uri()),
            policy,
            rx,
        );
        (Arc::new(correlator), tx)
    }

    async fn wait_in_flight(correlator: &Correlator, n: usize) {
        for _ in 0..200 {
            if correlator.in_flight() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {n} calls in flight");
    }

    async fn accept_async(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/message"))
            .respond_with(ResponseTemplate::new(202))
            .mount(server)
            .await;
    }

    #[test]
    fn test_backoff_is_non_decreasing() {
        let base = Duration::from_millis(500);
        let delays: Vec<_> = (1..=4).map(|n| backoff_delay(base, n)).collect();
        assert_eq!(delays[0], Duration::from_millis(500));
        assert_eq!(delays[3], Duration::from_millis(2000));
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_async_reply_completes_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message"))
            .and(query_param("sessionId", "abc-123"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        let (correlator, inbound) = correlator(&server, fast_policy(0));

        let caller = correlator.clone();
        let call = tokio::spawn(async move {
            let request = JsonRpcRequest::new(1, methods::TOOLS_LIST);
            caller.call("abc-123", &request, Duration::from_secs(2)).await
        });

        wait_in_flight(&correlator, 1).await;
        inbound
            .send(JsonRpcResponse::success(1, json!({"tools": []})))
            .unwrap();

        let response = call.await.unwrap().unwrap();
        assert_eq!(response.id, RequestId::Number(1));
        assert_eq!(response.result, Some(json!({"tools": []})));
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_foreign_replies_do_not_complete_call() {
        let server = MockServer::start().await;
        accept_async(&server).await;
        let (correlator, inbound) = correlator(&server, fast_policy(0));

        // Already queued before the call exists.
        inbound
            .send(JsonRpcResponse::success(98, json!("stale")))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let caller = correlator.clone();
        let call = tokio::spawn(async move {
            let request = JsonRpcRequest::new(7, methods::TOOLS_CALL);
            caller.call("s", &request, Duration::from_secs(2)).await
        });

        wait_in_flight(&correlator, 1).await;
        inbound
            .send(JsonRpcResponse::success(99, json!("other")))
            .unwrap();
        inbound
            .send(JsonRpcResponse::success(7, json!("mine")))
            .unwrap();

        let response = call.await.unwrap().unwrap();
        assert_eq!(response.result, Some(json!("mine")));
    }

    #[tokio::test]
    async fn test_concurrent_calls_each_get_their_own_reply() {
        let server = MockServer::start().await;
        accept_async(&server).await;
        let (correlator, inbound) = correlator(&server, fast_policy(0));

        let calls: Vec<_> = (1..=3)
            .map(|n| {
                let caller = correlator.clone();
                tokio::spawn(async move {
                    let request = JsonRpcRequest::new(n, methods::TOOLS_CALL);
                    caller.call("s", &request, Duration::from_secs(2)).await
                })
            })
            .collect();

        wait_in_flight(&correlator, 3).await;
        for n in [3, 1, 2] {
            inbound
                .send(JsonRpcResponse::success(n, json!(n)))
                .unwrap();
        }

        for (n, call) in (1..=3).zip(calls) {
            let response = call.await.unwrap().unwrap();
            assert_eq!(response.result, Some(json!(n)));
        }
    }

    #[tokio::test]
    async fn test_timeout_without_reply() {
        let server = MockServer::start().await;
        accept_async(&server).await;
        let (correlator, inbound) = correlator(&server, fast_policy(0));

        let deadline = Duration::from_millis(150);
        let started = Instant::now();
        let request = JsonRpcRequest::new(5, methods::TOOLS_CALL);
        let err = correlator.call("s", &request, deadline).await.unwrap_err();

        assert!(matches!(err, McpError::Timeout(d) if d == deadline));
        assert!(started.elapsed() < deadline + Duration::from_millis(500));
        assert_eq!(correlator.in_flight(), 0);

        // A late reply is dropped without effect.
        inbound
            .send(JsonRpcResponse::success(5, json!("late")))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_call_releases_its_entry() {
        let server = MockServer::start().await;
        accept_async(&server).await;
        let (correlator, inbound) = correlator(&server, fast_policy(0));

        let caller = correlator.clone();
        let call = tokio::spawn(async move {
            let request = JsonRpcRequest::new(11, methods::TOOLS_CALL);
            caller.call("s", &request, Duration::from_secs(5)).await
        });
        wait_in_flight(&correlator, 1).await;

        call.abort();
        assert!(call.await.unwrap_err().is_cancelled());
        assert_eq!(correlator.in_flight(), 0);

        // The reply for the abandoned call is dropped.
        inbound
            .send(JsonRpcResponse::success(11, json!("late")))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(correlator.in_flight(), 0);

        // The id is free again.
        let caller = correlator.clone();
        let retry = tokio::spawn(async move {
            let request = JsonRpcRequest::new(11, methods::TOOLS_CALL);
            caller.call("s", &request, Duration::from_secs(2)).await
        });
        wait_in_flight(&correlator, 1).await;
        inbound
            .send(JsonRpcResponse::success(11, json!("fresh")))
            .unwrap();
        let response = retry.await.unwrap().unwrap();
        assert_eq!(response.result, Some(json!("fresh")));
    }

    #[tokio::test]
    async fn test_notification_does_not_wait_for_a_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message"))
            .and(query_param("sessionId", "abc-123"))
            .and(body_json(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        let (correlator, _inbound) = correlator(&server, fast_policy(0));

        let notification = JsonRpcNotification::new(methods::INITIALIZED);
        correlator
            .notify("abc-123", &notification, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_rejected_notification_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message"))
            .respond_with(ResponseTemplate::new(404).set_body_string("unknown session"))
            .mount(&server)
            .await;
        let (correlator, _inbound) = correlator(&server, fast_policy(0));

        let notification = JsonRpcNotification::new(methods::INITIALIZED);
        let err = correlator
            .notify("gone", &notification, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Transport(m) if m.contains("unknown session")));
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_id_rejected() {
        let server = MockServer::start().await;
        accept_async(&server).await;
        let (correlator, inbound) = correlator(&server, fast_policy(0));

        let caller = correlator.clone();
        let first = tokio::spawn(async move {
            let request = JsonRpcRequest::new("dup", methods::PING);
            caller.call("s", &request, Duration::from_secs(2)).await
        });
        wait_in_flight(&correlator, 1).await;

        let request = JsonRpcRequest::new("dup", methods::PING);
        let err = correlator
            .call("s", &request, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::DuplicateRequest(_)));

        inbound
            .send(JsonRpcResponse::success("dup", json!({})))
            .unwrap();
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_synchronous_reply_in_post_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 3,
                "error": {"code": -32601, "message": "Tool not found: sentiment"}
            })))
            .mount(&server)
            .await;
        let (correlator, _inbound) = correlator(&server, fast_policy(0));

        let request = JsonRpcRequest::new(3, methods::TOOLS_CALL);
        let response = correlator
            .call("s", &request, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(response.error, Some(JsonRpcError::tool_not_found("sentiment")));
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_retries_503_then_gives_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;
        let (correlator, _inbound) = correlator(&server, fast_policy(2));

        let started = Instant::now();
        let request = JsonRpcRequest::new(1, methods::TOOLS_CALL);
        let err = correlator
            .call("s", &request, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(err, McpError::Unavailable { attempts: 3 }));
        // 20ms + 40ms of backoff.
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert_eq!(correlator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_503_then_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/message"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/message", server.uri());
        let outcome = post_with_retry(&client, &url, &json!({}), fast_policy(3))
            .await
            .unwrap();
        assert!(outcome.is_async());
    }

    #[tokio::test]
    async fn test_other_status_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/message"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/message", server.uri());
        let err = post_with_retry(&client, &url, &json!({}), fast_policy(3))
            .await
            .unwrap_err();
        match err {
            McpError::Transport(message) => assert!(message.contains("boom"), "{message}"),
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let client = reqwest::Client::new();
        let err = post_with_retry(&client, "http://127.0.0.1:9/message", &json!({}), fast_policy(3))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
