//! Decoding of event stream payloads.
//!
//! The gateway announces the session with a free-text payload such as
//! `/message?sessionId=1f0c...` and later pushes JSON-RPC replies on the same
//! stream. The announcement format is not a documented contract, so session
//! extraction is best effort: an embedded `sessionId=<hex/dash>` token first,
//! then a query-string parse of anything that looks like the message URL.

use std::sync::LazyLock;

use emotion_mcp_types::JsonRpcResponse;
use regex::Regex;

static SESSION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sessionId=([a-f0-9\-]+)").expect("session pattern is valid"));

const MESSAGE_QUERY_MARKER: &str = "/message?sessionId=";

/// A decoded unit of data pulled off the event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// The server assigned a session id.
    SessionAnnounced(String),
    /// A JSON-RPC reply to some earlier request.
    Reply(JsonRpcResponse),
    /// Banner, heartbeat or other payload with no meaning to the bridge.
    Discarded(String),
}

/// Extract a session id from a free-text payload.
pub fn extract_session_id(payload: &str) -> Option<String> {
    if let Some(caps) = SESSION_TOKEN.captures(payload) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }

    if payload.contains(MESSAGE_QUERY_MARKER) {
        let base = url::Url::parse("http://session.invalid/").ok()?;
        let url = base.join(payload.trim()).ok()?;
        return url
            .query_pairs()
            .find(|(key, _)| key == "sessionId")
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty());
    }

    None
}

/// Decode one `data` payload.
///
/// Session announcements are only recognised while no session is known for
/// the current connection; afterwards only JSON-RPC replies are of interest.
pub fn decode_payload(data: &str, session_known: bool) -> InboundEvent {
    let data = data.trim();

    if !session_known && let Some(session_id) = extract_session_id(data) {
        return InboundEvent::SessionAnnounced(session_id);
    }

    match serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(JsonRpcResponse::from_value)
    {
        Some(response) => InboundEvent::Reply(response),
        None => InboundEvent::Discarded(data.to_string()),
    }
}
