//! Readiness probing before the event stream is opened.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, info, warn};

/// Whether a probe status means the server is up.
///
/// Anything short of a server error counts: gateways commonly answer `404` or
/// `405` on the probe path while still serving the stream.
pub fn is_ready_status(status: StatusCode) -> bool {
    status == StatusCode::OK || status.as_u16() < 500
}

/// Poll `url` until it answers with a ready status or `attempts` run out.
///
/// Returns `true` once ready. Only the response head is awaited, so probing an
/// event stream endpoint does not block on its body.
pub async fn wait_until_ready(
    client: &reqwest::Client,
    url: &str,
    attempts: u32,
    interval: Duration,
) -> bool {
    for attempt in 1..=attempts {
        match client.get(url).send().await {
            Ok(resp) if is_ready_status(resp.status()) => {
                info!(url, status = %resp.status(), attempt, "Server is ready");
                return true;
            }
            Ok(resp) => {
                debug!(url, status = %resp.status(), attempt, "Server not ready");
            }
            Err(e) => {
                debug!(url, attempt, error = %e, "Waiting for server");
            }
        }
        if attempt < attempts {
            tokio::time::sleep(interval).await;
        }
    }

    warn!(url, attempts, "Server did not become ready");
    false
}
