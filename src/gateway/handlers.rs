use super::AppState;
use super::intake::{IntakeOutcome, IntakeRequest, RejectReason};
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json},
};
use chrono::Utc;
use std::net::{IpAddr, SocketAddr};

/// Resolve the caller: first `X-Forwarded-For` hop (the service runs behind
/// a proxy in production), falling back to the socket peer.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .unwrap_or_else(|| peer.ip())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn rejection_response(reason: &RejectReason) -> (StatusCode, Json<serde_json::Value>) {
    let status =
        StatusCode::from_u16(reason.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut body = serde_json::json!({
        "success": false,
        "error_code": reason.error_code(),
    });
    if let RejectReason::Blocked { retry_after_secs } = reason {
        body["retry_after"] = serde_json::json!(retry_after_secs);
    }
    (status, Json(body))
}

/// POST /webhooks/chat — webhook intake
pub(super) async fn handle_webhook(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let request = IntakeRequest {
        declared_len: header_str(&headers, header::CONTENT_LENGTH.as_str())
            .and_then(|v| v.parse().ok()),
        body: &body,
        signature: header_str(&headers, "X-Signature"),
        timestamp: header_str(&headers, "X-Timestamp"),
        source_ip: client_ip(&headers, peer),
        user_agent: header_str(&headers, header::USER_AGENT.as_str()),
    };

    match state.pipeline.evaluate(&request, Utc::now()) {
        IntakeOutcome::Accepted {
            webhook_id,
            queued_at,
        } => {
            let body = serde_json::json!({
                "success": true,
                "webhook_id": webhook_id,
                "processing_status": "queued",
                "queued_at": queued_at.to_rfc3339(),
            });
            (StatusCode::OK, Json(body))
        }
        IntakeOutcome::Duplicate { webhook_id } => {
            let body = serde_json::json!({
                "success": true,
                "status": "duplicate",
                "message": format!("webhook {webhook_id} already processed"),
            });
            (StatusCode::OK, Json(body))
        }
        IntakeOutcome::Rejected(reason) => rejection_response(&reason),
    }
}

#[derive(serde::Deserialize)]
pub(super) struct StatusQuery {
    webhook_id: String,
}

/// GET /webhooks/status — delivery lookup backed solely by the idempotency
/// store: a recorded id was accepted and queued (or already executed).
pub(super) async fn handle_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> impl IntoResponse {
    let processed = state.idempotency.contains(&query.webhook_id, Utc::now());
    let body = serde_json::json!({
        "processed": processed,
        "status": if processed { "completed" } else { "pending" },
    });
    (StatusCode::OK, Json(body))
}

/// GET /health — always public (no secrets leaked)
pub(super) async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let (high, normal) = state.store.depths();
    let body = serde_json::json!({
        "status": "ok",
        "queue": { "high": high, "normal": normal },
    });
    Json(body)
}

/// GET /webhooks/dead-letters — operator triage surface
pub(super) async fn handle_dead_letters(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> impl IntoResponse {
    state
        .monitor
        .record_sensitive_access(client_ip(&headers, peer), Utc::now());

    match state.dead_letters.list(100) {
        Ok(records) => {
            let entries: Vec<serde_json::Value> = records
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "id": r.id,
                        "job_id": r.job_id,
                        "webhook_id": r.webhook_id,
                        "event": r.event,
                        "error": r.error,
                        "error_class": r.error_class,
                        "attempts": r.attempts,
                        "dead_lettered_at": r.dead_lettered_at.to_rfc3339(),
                    })
                })
                .collect();
            (
                StatusCode::OK,
                Json(serde_json::json!({ "dead_letters": entries })),
            )
        }
        Err(error) => {
            tracing::error!("dead-letter listing failed: {error:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "success": false,
                    "error_code": "DEAD_LETTER_STORE_UNAVAILABLE",
                })),
            )
        }
    }
}
