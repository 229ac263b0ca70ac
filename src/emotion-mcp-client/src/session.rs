//! Session establishment over the server's event stream.
//!
//! A single background task owns the stream connection. It is the only writer
//! of the session slot and the only producer of inbound replies; everything
//! else observes the slot through [`SessionManager::current_session_id`].
//!
//! Connection lifecycle, repeated until the manager is dropped:
//!
//! 1. Probe the readiness path (bounded attempts, fixed interval).
//! 2. Open the stream with a bounded connect timeout and no read timeout.
//! 3. Publish the first session id announced on the stream.
//! 4. Forward every JSON-RPC reply to the reply sink.
//! 5. When the stream ends or fails, clear the session, wait, reconnect.

use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use emotion_mcp_types::JsonRpcResponse;
use eventsource_stream::{Event, Eventsource};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{McpError, Result};
use crate::health::wait_until_ready;
use crate::sse::{InboundEvent, decode_payload};

/// Sink the stream reader pushes replies into.
pub type ReplySink = mpsc::UnboundedSender<JsonRpcResponse>;

/// Connection state of the session stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Probing or connecting; no session yet.
    Connecting,
    /// Stream open and a session id published.
    Active,
    /// Stream closed; waiting to reconnect.
    Disconnected,
}

/// One server-assigned session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub established_at: DateTime<Utc>,
}

/// Point-in-time view of the session slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session: Option<Session>,
}

impl SessionSnapshot {
    fn disconnected() -> Self {
        Self {
            state: SessionState::Disconnected,
            session: None,
        }
    }
}

/// State shared between the manager and its reader task.
struct SessionShared {
    slot: watch::Sender<SessionSnapshot>,
    replies: ReplySink,
}

impl SessionShared {
    fn new(replies: ReplySink) -> Self {
        let (slot, _) = watch::channel(SessionSnapshot::disconnected());
        Self { slot, replies }
    }

    fn set_connecting(&self) {
        self.slot.send_replace(SessionSnapshot {
            state: SessionState::Connecting,
            session: None,
        });
        debug!("Session state: connecting");
    }

    fn publish(&self, session_id: String) {
        info!(session_id = %session_id, "Session established");
        self.slot.send_replace(SessionSnapshot {
            state: SessionState::Active,
            session: Some(Session {
                session_id,
                established_at: Utc::now(),
            }),
        });
    }

    fn clear(&self) {
        let previous = self.slot.send_replace(SessionSnapshot::disconnected());
        if let Some(session) = previous.session {
            info!(session_id = %session.session_id, "Session closed");
        }
    }

    /// Consume one connection's events, then clear the session.
    async fn serve<S, E>(&self, stream: S)
    where
        S: Stream<Item = std::result::Result<Event, E>>,
        E: Display,
    {
        match self.consume(stream).await {
            Ok(()) => info!("Event stream ended"),
            Err(e) => warn!(error = %e, "Event stream failed"),
        }
        self.clear();
    }

    async fn consume<S, E>(&self, stream: S) -> std::result::Result<(), String>
    where
        S: Stream<Item = std::result::Result<Event, E>>,
        E: Display,
    {
        let mut stream = std::pin::pin!(stream);
        let mut session_known = false;

        while let Some(item) = stream.next().await {
            let event = item.map_err(|e| e.to_string())?;
            match decode_payload(&event.data, session_known) {
                InboundEvent::SessionAnnounced(session_id) => {
                    session_known = true;
                    self.publish(session_id);
                }
                InboundEvent::Reply(response) => {
                    debug!(id = %response.id, "Reply received on stream");
                    if self.replies.send(response).is_err() {
                        debug!("Reply sink closed; dropping reply");
                    }
                }
                InboundEvent::Discarded(payload) => {
                    debug!(event = %event.event, payload = %payload, "Ignoring stream payload");
                }
            }
        }

        Ok(())
    }
}

/// Owns the event stream connection and the current session id.
pub struct SessionManager {
    stream_client: reqwest::Client,
    probe_client: reqwest::Client,
    config: ClientConfig,
    shared: Arc<SessionShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// Create a manager that forwards stream replies into `replies`.
    ///
    /// Nothing connects until [`start`](Self::start) is called.
    pub fn new(config: ClientConfig, replies: ReplySink) -> Result<Self> {
        let stream_client =
            emotion_common::create_event_stream_client(config.session.connect_timeout())
                .map_err(McpError::Transport)?;
        let probe_client =
            emotion_common::create_health_check_client().map_err(McpError::Transport)?;

        Ok(Self {
            stream_client,
            probe_client,
            config,
            shared: Arc::new(SessionShared::new(replies)),
            task: Mutex::new(None),
        })
    }

    /// Start the background reader. Calling it again while running is a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let shared = self.shared.clone();
        let stream_client = self.stream_client.clone();
        let probe_client = self.probe_client.clone();
        let config = self.config.clone();

        *task = Some(tokio::spawn(async move {
            run_reader(shared, stream_client, probe_client, config).await;
        }));
    }

    /// Whether the background reader is running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the background reader and forget the session.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        self.shared.clear();
    }

    /// Current state of the session slot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.slot.borrow().clone()
    }

    /// Wait until a session id is available, up to `timeout`.
    ///
    /// After a disconnect this blocks again until the reconnected stream
    /// announces a new id; a closed session's id is never returned.
    pub async fn current_session_id(&self, timeout: std::time::Duration) -> Result<String> {
        let mut rx = self.shared.slot.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|s| s.session.is_some())).await;

        match waited {
            Ok(Ok(snapshot)) => snapshot
                .session
                .as_ref()
                .map(|session| session.session_id.clone())
                .ok_or(McpError::SessionTimeout(timeout)),
            Ok(Err(_)) => Err(McpError::Transport("session reader stopped".to_string())),
            Err(_) => Err(McpError::SessionTimeout(timeout)),
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run_reader(
    shared: Arc<SessionShared>,
    stream_client: reqwest::Client,
    probe_client: reqwest::Client,
    config: ClientConfig,
) {
    let sse_url = config.server_endpoint(&config.session.sse_path);
    let probe_url = config.server_endpoint(&config.session.readiness_path);
    let reconnect_delay = config.session.reconnect_delay();

    info!(url = %sse_url, "Session reader starting");

    loop {
        shared.set_connecting();

        if !wait_until_ready(
            &probe_client,
            &probe_url,
            config.session.readiness_attempts,
            config.session.readiness_interval(),
        )
        .await
        {
            warn!(url = %probe_url, "Readiness probe exhausted; connecting anyway");
        }

        match open_stream(&stream_client, &sse_url).await {
            Ok(resp) => {
                info!(url = %sse_url, status = %resp.status(), "Event stream connected");
                shared.serve(resp.bytes_stream().eventsource()).await;
            }
            Err(e) => {
                warn!(url = %sse_url, error = %e, "Event stream connection failed");
                shared.clear();
            }
        }

        info!(delay = ?reconnect_delay, "Reconnecting to event stream");
        tokio::time::sleep(reconnect_delay).await;
    }
}

async fn open_stream(client: &reqwest::Client, url: &str) -> Result<reqwest::Response> {
    let resp = client
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(McpError::Transport(format!(
            "event stream returned {}",
            resp.status()
        )));
    }

    Ok(resp)
}
