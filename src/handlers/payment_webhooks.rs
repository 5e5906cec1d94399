//! Inbound payment provider webhook endpoint.
//!
//! Order of the guards matters: the signature is verified over the raw body
//! before anything else, then the per-IP rate limit is applied, and only then
//! is the payload parsed and handed to reconciliation. Processing errors for
//! recognized events return 500 so the provider retries; the reconciliation
//! idempotency guard makes those retries safe.

use crate::services::reconciliation::{Outcome, WebhookPayload};
use crate::AppState;
use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Signature header, `ts=<unix seconds>,v1=<hex hmac>` over `"{ts}.{body}"`.
const SIGNATURE_HEADER: &str = "x-signature";

#[utoipa::path(
    post,
    path = "/payments/webhook",
    request_body = WebhookPayload,
    responses(
        (status = 200, description = "Event applied, already processed, or ignored"),
        (status = 401, description = "Missing or invalid signature"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 500, description = "Processing error; the provider should retry")
    ),
    tag = "payments"
)]
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // no configured secret means no event can be authenticated
    let Some(secret) = state.config.payment_webhook_secret.as_deref() else {
        error!("webhook rejected: no signing secret configured");
        return reply(StatusCode::UNAUTHORIZED, "Unauthorized");
    };
    if !verify_signature(
        &headers,
        &body,
        secret,
        state.config.payment_webhook_tolerance_secs,
    ) {
        warn!("webhook signature verification failed");
        return reply(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let source_ip = client_ip(&headers, peer);
    match state.rate_limiter.check_rate_limit(&source_ip).await {
        Ok(result) if !result.allowed => {
            warn!(%source_ip, "webhook rate limit exceeded");
            return reply(StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded");
        }
        Ok(_) => {}
        Err(e) => {
            // limiter failure must not drop provider callbacks
            warn!(error = %e, "rate limiter unavailable; allowing request");
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "malformed webhook payload");
            return reply(StatusCode::BAD_REQUEST, "Invalid payload");
        }
    };

    match state.reconciliation.process_event(&payload).await {
        Ok(Outcome::Applied) | Ok(Outcome::Ignored) => reply(StatusCode::OK, "Received"),
        Ok(Outcome::AlreadyProcessed) => {
            info!(payment_id = %payload.data.id, "duplicate webhook delivery acknowledged");
            reply(StatusCode::OK, "Already processed")
        }
        Err(e) => {
            error!(error = %e, event_type = %payload.event_type, "webhook processing failed");
            reply(StatusCode::INTERNAL_SERVER_ERROR, "Processing error")
        }
    }
}

fn reply(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "status": message }))).into_response()
}

fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| peer.ip().to_string())
}

/// Recomputes the HMAC over `"{ts}.{body}"` and compares in constant time.
/// Timestamps outside the tolerance window are rejected to blunt replays.
pub fn verify_signature(
    headers: &HeaderMap,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
) -> bool {
    let Some(header) = headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok()) else {
        return false;
    };

    let mut ts = "";
    let mut v1 = "";
    for part in header.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("ts"), Some(val)) => ts = val,
            (Some("v1"), Some(val)) => v1 = val,
            _ => {}
        }
    }
    if ts.is_empty() || v1.is_empty() {
        return false;
    }

    let Ok(ts_secs) = ts.parse::<i64>() else {
        return false;
    };
    let now = chrono::Utc::now().timestamp();
    if (now - ts_secs).unsigned_abs() > tolerance_secs {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    constant_time_eq(&expected, v1)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}
