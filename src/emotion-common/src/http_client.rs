//! Centralized HTTP client factory for the bridge.
//!
//! Provides factory functions to create HTTP clients with consistent configuration:
//! - `create_default_client()` - Standard 30s timeout for request/reply calls
//! - `create_event_stream_client(connect)` - No overall or read timeout, for SSE
//! - `create_health_check_client()` - 5s timeout for readiness probes
//! - `create_client_with_timeout(duration)` - Custom timeout
//!
//! All clients include: User-Agent, tcp_nodelay and a bounded idle pool.

use reqwest::Client;
use std::time::Duration;

/// User-Agent string for all HTTP requests
pub const USER_AGENT: &str = concat!("emotion-bridge/", env!("CARGO_PKG_VERSION"));

/// Default timeout for standard requests (30 seconds)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Short timeout for health checks (5 seconds)
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default connect timeout for long-lived event streams.
pub const STREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Idle pooled connections are dropped after this long so DNS is re-resolved.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Creates an HTTP client with default configuration (30s timeout).
pub fn create_default_client() -> Result<Client, String> {
    create_client_with_timeout(DEFAULT_TIMEOUT)
}

/// Creates an HTTP client for readiness probes (5s timeout).
pub fn create_health_check_client() -> Result<Client, String> {
    create_client_with_timeout(HEALTH_CHECK_TIMEOUT)
}

/// Creates an HTTP client for server-sent event streams.
///
/// The stream is held open indefinitely, so only connection establishment is
/// bounded. Per-request timeouts can still be applied with
/// `RequestBuilder::timeout` for the non-streaming calls sharing this client.
pub fn create_event_stream_client(connect_timeout: Duration) -> Result<Client, String> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .tcp_nodelay(true)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(4)
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {e}"))
}

/// Creates an HTTP client with a custom timeout.
///
/// The read timeout is capped at 60s so a truncated body cannot hang a call
/// for the full request timeout.
pub fn create_client_with_timeout(timeout: Duration) -> Result<Client, String> {
    let read_timeout = timeout.min(Duration::from_secs(60));

    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .read_timeout(read_timeout)
        .tcp_nodelay(true)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(4)
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {e}"))
}
