//! MCP client side of the emotion detection bridge.
//!
//! Holds a server-sent event session open, correlates POSTed requests with
//! the replies pushed back on that stream, and relays line-delimited JSON-RPC
//! between a local caller and the server.

pub mod client;
pub mod config;
pub mod correlator;
pub mod error;
pub mod health;
pub mod predict;
pub mod relay;
pub mod session;
pub mod sse;
pub mod transport;

pub use client::{EmotionOutcome, McpClient};
pub use config::{ClientConfig, RequestConfig, SessionConfig};
pub use correlator::{Correlator, RetryPolicy, backoff_delay, post_with_retry};
pub use error::{McpError, Result};
pub use predict::PredictClient;
pub use relay::{Relay, RelayState, RelayStats};
pub use session::{Session, SessionManager, SessionSnapshot, SessionState};
pub use sse::InboundEvent;
pub use transport::{HttpTransport, McpTransport, SessionTransport};
