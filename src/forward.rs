//! Upstream request forwarding with retry.
//!
//! Backends restart, warm up, and occasionally drop connections while a model
//! is still allocating, so transient failures get a bounded retry with
//! exponential backoff. Anything non-transient propagates immediately.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::error::{GatewayError, Result};

/// Total attempts before giving up on a transient failure.
const MAX_ATTEMPTS: u32 = 5;

/// Upstream statuses treated as transient.
const RETRY_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// What the upstream finally answered, relayed to the client unchanged.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
}

/// POST `body` to `url`, retrying 500/502/503/504 and connection errors with
/// a doubling backoff. After the last attempt the
/// upstream's final status and body are returned as-is; 4xx and other
/// failures short-circuit.
pub async fn post_with_retry(
    client: &Client,
    url: &str,
    body: &Value,
    backoff: Duration,
) -> Result<UpstreamResponse> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match client.post(url).json(body).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if RETRY_STATUSES.contains(&status) && attempt < MAX_ATTEMPTS {
                    let delay = backoff * 2u32.saturating_pow(attempt - 1);
                    tracing::debug!(
                        "Upstream {} answered {}; retrying ({}/{}) in {:?}",
                        url,
                        status,
                        attempt,
                        MAX_ATTEMPTS,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                let body = response.json::<Value>().await.map_err(|e| {
                    GatewayError::Upstream(format!("Invalid JSON from {}: {}", url, e))
                })?;
                return Ok(UpstreamResponse { status, body });
            }
            Err(e) if e.is_connect() && attempt < MAX_ATTEMPTS => {
                let delay = backoff * 2u32.saturating_pow(attempt - 1);
                tracing::debug!(
                    "Connection to {} failed ({}); retrying ({}/{}) in {:?}",
                    url,
                    e,
                    attempt,
                    MAX_ATTEMPTS,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(GatewayError::Upstream(format!("{}: {}", url, e))),
        }
    }
}
