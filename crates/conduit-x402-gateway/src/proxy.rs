//! Post-settlement fulfillment: hosted content retrieval and upstream
//! forwarding.
//!
//! Upstream calls are at-most-once with respect to settlement: no retries.
//! A failed upstream fetch is reported to the caller alongside the settlement
//! transaction hash, so "paid but undelivered" is distinguishable from
//! "unpaid, refused".

use actix_web::http::Method;
use alloy::primitives::{Address, TxHash};
use bytes::Bytes;

use crate::metrics;
use crate::validation::ensure_public_host;

/// Parse a HOSTED service's stored content blob. Content is normally JSON;
/// anything else is wrapped as a string value.
pub fn hosted_content(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

/// Forward a paid request to the registered upstream endpoint.
///
/// Only the method, body and the explicit x402 header pair go upstream;
/// client headers never cross the trust boundary.
pub async fn forward_upstream(
    client: &reqwest::Client,
    method: &Method,
    endpoint: &str,
    body: Bytes,
    payer: Address,
    tx_hash: TxHash,
) -> Result<serde_json::Value, String> {
    if let Ok(parsed) = url::Url::parse(endpoint) {
        if let Some(host) = parsed.host_str() {
            if let Err(e) = ensure_public_host(host).await {
                return Err(format!("upstream host rejected: {e}"));
            }
        }
    }

    let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .map_err(|_| format!("unsupported method {method}"))?;

    let mut request = client
        .request(method, endpoint)
        .header("X-402-Payer", format!("{payer:#x}"))
        .header("X-402-TxHash", format!("{tx_hash:#x}"));

    if !body.is_empty() {
        request = request
            .header("Content-Type", "application/json")
            .body(body.to_vec());
    }

    let timer = metrics::PROXY_LATENCY.start_timer();
    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            timer.observe_duration();
            metrics::UPSTREAM_FAILURES.inc();
            tracing::error!(endpoint, error = %e, "upstream request failed");
            return Err("upstream request failed".to_string());
        }
    };
    timer.observe_duration();

    let status = response.status();
    let text = response.bytes().await.map_err(|e| {
        metrics::UPSTREAM_FAILURES.inc();
        tracing::error!(endpoint, error = %e, "failed to read upstream body");
        "failed to read upstream response".to_string()
    })?;

    if !status.is_success() {
        metrics::UPSTREAM_FAILURES.inc();
        tracing::warn!(endpoint, status = %status, "upstream returned an error status");
        return Err(format!("upstream returned {status}"));
    }

    Ok(serde_json::from_slice(&text).unwrap_or_else(|_| {
        serde_json::Value::String(String::from_utf8_lossy(&text).into_owned())
    }))
}

/// Merge the settlement hash into an upstream reply: objects get a top-level
/// `txHash` key, anything else is wrapped.
pub fn merge_tx_hash(upstream: serde_json::Value, tx_hash: TxHash) -> serde_json::Value {
    match upstream {
        serde_json::Value::Object(mut map) => {
            map.insert(
                "txHash".to_string(),
                serde_json::Value::String(format!("{tx_hash:#x}")),
            );
            serde_json::Value::Object(map)
        }
        other => serde_json::json!({
            "response": other,
            "txHash": format!("{tx_hash:#x}"),
        }),
    }
}
