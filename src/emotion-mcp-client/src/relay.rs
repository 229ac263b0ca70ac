//! Line-oriented relay between a local caller and the MCP server.
//!
//! One JSON-RPC request per input line, one JSON-RPC reply per output line.
//! Every failure is turned into an error reply so the caller always gets a
//! structured answer; the loop only stops at end of input or when the output
//! can no longer be written.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use emotion_mcp_types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

use crate::error::{McpError, Result};
use crate::transport::McpTransport;

/// Written when a reply cannot be serialized.
const FALLBACK_REPLY: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error: reply could not be encoded"}}"#;

/// Where the relay loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Reading,
    Dispatching,
}

/// Counters for one relay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Non-blank lines read.
    pub requests: u64,
    /// Replies that carried an error.
    pub errors: u64,
}

pub struct Relay {
    transport: Arc<dyn McpTransport>,
    state: Mutex<RelayState>,
}

impl Relay {
    pub fn new(transport: Arc<dyn McpTransport>) -> Self {
        Self {
            transport,
            state: Mutex::new(RelayState::Idle),
        }
    }

    pub fn state(&self) -> RelayState {
        *self.state.lock()
    }

    fn set_state(&self, state: RelayState) {
        *self.state.lock() = state;
    }

    /// Relay lines from `reader` to the server until end of input.
    ///
    /// Blank lines are skipped. Returns an error only if `writer` fails.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<RelayStats>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(transport = %self.transport.describe(), "Relay started");
        let mut lines = reader.lines();
        let mut stats = RelayStats::default();

        loop {
            self.set_state(RelayState::Reading);

            let reply = match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    self.set_state(RelayState::Dispatching);
                    self.handle_line(&line).await
                }
                Ok(None) => break,
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    self.set_state(RelayState::Dispatching);
                    JsonRpcResponse::error(
                        RequestId::Null,
                        McpError::Parse(e.to_string()).to_jsonrpc_error(),
                    )
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read input, stopping relay");
                    break;
                }
            };

            stats.requests += 1;
            if reply.is_error() {
                stats.errors += 1;
            }

            if let Err(e) = write_reply(&mut writer, &reply).await {
                error!(error = %e, "Failed to write reply");
                self.set_state(RelayState::Idle);
                return Err(e.into());
            }
            self.set_state(RelayState::Idle);
        }

        self.set_state(RelayState::Idle);
        info!(
            requests = stats.requests,
            errors = stats.errors,
            "Relay reached end of input"
        );
        Ok(stats)
    }

    /// Turn one input line into exactly one reply.
    pub async fn handle_line(&self, line: &str) -> JsonRpcResponse {
        let value: Value = match serde_json::from_str(line.trim()) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Unparseable input line");
                return JsonRpcResponse::error(
                    RequestId::Null,
                    McpError::Parse(e.to_string()).to_jsonrpc_error(),
                );
            }
        };

        let id = RequestId::from_value(&value);
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(e) => {
                debug!(id = %id, error = %e, "Input is not a request");
                return JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_request(format!("Invalid request: {e}")),
                );
            }
        };

        if request
            .params
            .as_ref()
            .is_some_and(|params| !params.is_object() && !params.is_array())
        {
            return JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_params("Invalid params: expected an object or array"),
            );
        }

        debug!(id = %id, method = %request.method, "Dispatching request");
        let dispatch = async {
            if request.is_notification() {
                // Nothing will be correlated; acknowledge once the server accepts it.
                self.transport
                    .notify(request.into())
                    .await
                    .map(|()| JsonRpcResponse::success(RequestId::Null, json!({})))
            } else {
                self.transport.send(request).await
            }
        };

        match AssertUnwindSafe(dispatch).catch_unwind().await {
            Ok(Ok(mut response)) => {
                if response.id != id {
                    warn!(expected = %id, got = %response.id, "Reply id mismatch, rewriting");
                    response.id = id;
                }
                response
            }
            Ok(Err(e)) => {
                warn!(id = %id, error = %e, "Request failed");
                JsonRpcResponse::error(id, e.to_jsonrpc_error())
            }
            Err(panic) => {
                let msg = panic_message(&*panic);
                error!(id = %id, panic = %msg, "Dispatch panicked");
                JsonRpcResponse::error(id, JsonRpcError::internal_error(format!("Internal error: {msg}")))
            }
        }
    }
}

async fn write_reply<W>(writer: &mut W, reply: &JsonRpcResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(reply).unwrap_or_else(|e| {
        error!(error = %e, "Failed to encode reply");
        FALLBACK_REPLY.as_bytes().to_vec()
    });
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use emotion_mcp_types::{ErrorCode, JsonRpcNotification};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Echoes the request's params back as the result.
    struct EchoTransport;

    #[async_trait]
    impl McpTransport for EchoTransport {
        async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
            Ok(JsonRpcResponse::success(
                request.id,
                request.params.unwrap_or(Value::Null),
            ))
        }

        async fn notify(&self, _notification: JsonRpcNotification) -> Result<()> {
            Ok(())
        }

        fn describe(&self) -> String {
            "echo".to_string()
        }
    }

    struct DownTransport;

    #[async_trait]
    impl McpTransport for DownTransport {
        async fn send(&self, _request: JsonRpcRequest) -> Result<JsonRpcResponse> {
            Err(McpError::Transport("connection refused".to_string()))
        }

        async fn notify(&self, _notification: JsonRpcNotification) -> Result<()> {
            Err(McpError::Transport("connection refused".to_string()))
        }

        fn describe(&self) -> String {
            "down".to_string()
        }
    }

    /// Panics on `explode`, echoes everything else.
    struct FragileTransport;

    #[async_trait]
    impl McpTransport for FragileTransport {
        async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
            if request.method == "explode" {
                panic!("handler blew up");
            }
            EchoTransport.send(request).await
        }

        async fn notify(&self, _notification: JsonRpcNotification) -> Result<()> {
            Ok(())
        }

        fn describe(&self) -> String {
            "fragile".to_string()
        }
    }

    /// Holds the first request until released.
    struct GatedTransport {
        gate: Mutex<Option<oneshot::Receiver<()>>>,
    }

    #[async_trait]
    impl McpTransport for GatedTransport {
        async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
            let gate = self.gate.lock().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            Ok(JsonRpcResponse::success(request.id, json!({})))
        }

        async fn notify(&self, _notification: JsonRpcNotification) -> Result<()> {
            Ok(())
        }

        fn describe(&self) -> String {
            "gated".to_string()
        }
    }

    async fn relay_lines(transport: Arc<dyn McpTransport>, input: &str) -> (Vec<Value>, RelayStats) {
        let relay = Relay::new(transport);
        let mut output = Vec::new();
        let stats = relay.run(input.as_bytes(), &mut output).await.unwrap();
        assert_eq!(relay.state(), RelayState::Idle);

        let text = String::from_utf8(output).unwrap();
        let replies = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        (replies, stats)
    }

    #[tokio::test]
    async fn test_one_reply_per_request_with_matching_id() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":"abc","method":"tools/call","params":{"name":"emotion_detection","arguments":{"text":"I am furious"}}}"#,
            "\n",
        );
        let (replies, stats) = relay_lines(Arc::new(EchoTransport), input).await;

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(replies[1]["id"], "abc");
        assert_eq!(replies[1]["result"]["arguments"]["text"], "I am furious");
        assert_eq!(stats, RelayStats { requests: 2, errors: 0 });
    }

    #[tokio::test]
    async fn test_parse_error_has_null_id_and_loop_continues() {
        let input = "not json\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n";
        let (replies, stats) = relay_lines(Arc::new(EchoTransport), input).await;

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], Value::Null);
        assert_eq!(replies[0]["jsonrpc"], "2.0");
        assert_eq!(replies[0]["error"]["code"], ErrorCode::PARSE_ERROR);
        assert_eq!(replies[1]["id"], 2);
        assert_eq!(stats.errors, 1);
    }

    #[tokio::test]
    async fn test_large_numeric_id_is_echoed() {
        let input = "{\"jsonrpc\":\"2.0\",\"id\":18446744073709551615,\"method\":\"ping\"}\n";
        let relay = Relay::new(Arc::new(EchoTransport));
        let mut output = Vec::new();
        relay.run(input.as_bytes(), &mut output).await.unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.contains(r#""id":18446744073709551615"#), "{text}");
        assert!(!text.contains("\"error\""), "{text}");
    }

    #[tokio::test]
    async fn test_notification_is_acknowledged_without_waiting() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":10,"method":"ping"}"#,
            "\n",
        );
        let (replies, stats) = relay_lines(Arc::new(EchoTransport), input).await;

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], Value::Null);
        assert_eq!(replies[0]["result"], json!({}));
        assert_eq!(replies[1]["id"], 10);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn test_rejected_notification_is_an_error_reply() {
        let input = "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n";
        let (replies, _) = relay_lines(Arc::new(DownTransport), input).await;

        assert_eq!(replies[0]["id"], Value::Null);
        assert_eq!(replies[0]["error"]["code"], ErrorCode::INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn test_scalar_params_are_invalid() {
        let input = "{\"jsonrpc\":\"2.0\",\"id\":12,\"method\":\"tools/call\",\"params\":\"furious\"}\n";
        let (replies, _) = relay_lines(Arc::new(EchoTransport), input).await;

        assert_eq!(replies[0]["id"], 12);
        assert_eq!(replies[0]["error"]["code"], ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let input = "\n   \n{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"ping\"}\n\n";
        let (replies, stats) = relay_lines(Arc::new(EchoTransport), input).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(stats.requests, 1);
    }

    #[tokio::test]
    async fn test_non_request_json_is_invalid_request() {
        let input = "[1,2,3]\n{\"id\":4,\"params\":{}}\n";
        let (replies, _) = relay_lines(Arc::new(EchoTransport), input).await;

        assert_eq!(replies[0]["id"], Value::Null);
        assert_eq!(replies[0]["error"]["code"], ErrorCode::INVALID_REQUEST);
        assert_eq!(replies[1]["id"], 4);
        assert_eq!(replies[1]["error"]["code"], ErrorCode::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_transport_failure_becomes_error_reply() {
        let input = "{\"jsonrpc\":\"2.0\",\"id\":5,\"method\":\"tools/list\"}\n";
        let (replies, _) = relay_lines(Arc::new(DownTransport), input).await;

        assert_eq!(replies[0]["id"], 5);
        assert_eq!(replies[0]["error"]["code"], ErrorCode::INTERNAL_ERROR);
        let message = replies[0]["error"]["message"].as_str().unwrap();
        assert!(message.starts_with("Server error:"), "{message}");
    }

    #[tokio::test]
    async fn test_panic_becomes_internal_error() {
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":6,\"method\":\"explode\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"ping\"}\n",
        );
        let (replies, _) = relay_lines(Arc::new(FragileTransport), input).await;

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], 6);
        assert_eq!(replies[0]["error"]["code"], ErrorCode::INTERNAL_ERROR);
        assert!(
            replies[0]["error"]["message"]
                .as_str()
                .unwrap()
                .contains("handler blew up")
        );
        assert_eq!(replies[1]["id"], 7);
        assert!(replies[1].get("error").is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_is_parse_error() {
        let relay = Relay::new(Arc::new(EchoTransport));
        let mut input = b"\xff\xfe\n".to_vec();
        input.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"id\":8,\"method\":\"ping\"}\n");
        let mut output = Vec::new();

        relay.run(&input[..], &mut output).await.unwrap();

        let text = String::from_utf8(output).unwrap();
        let replies: Vec<Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(replies[0]["error"]["code"], ErrorCode::PARSE_ERROR);
        assert_eq!(replies[1]["id"], 8);
    }

    #[tokio::test]
    async fn test_state_is_dispatching_while_waiting() {
        let (release, gate) = oneshot::channel();
        let relay = Arc::new(Relay::new(Arc::new(GatedTransport {
            gate: Mutex::new(Some(gate)),
        })));
        assert_eq!(relay.state(), RelayState::Idle);

        let running = relay.clone();
        let task = tokio::spawn(async move {
            let input: &'static [u8] = b"{\"jsonrpc\":\"2.0\",\"id\":9,\"method\":\"ping\"}\n";
            let mut output = Vec::new();
            running.run(input, &mut output).await.unwrap();
            output
        });

        for _ in 0..100 {
            if relay.state() == RelayState::Dispatching {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(relay.state(), RelayState::Dispatching);

        release.send(()).unwrap();
        let output = task.await.unwrap();
        assert!(String::from_utf8(output).unwrap().contains("\"id\":9"));
        assert_eq!(relay.state(), RelayState::Idle);
    }
}
