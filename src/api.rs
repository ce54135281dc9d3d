//! HTTP surface (§6) — a thin Axum `Router` over `Core`.
//!
//! Route wiring follows the teacher's `Router::new().route(...).with_state(s)`
//! shape in `examples/burakkonte-sinyalist/backend/src/main.rs`; handlers stay
//! thin, delegating every real decision to `gateway::Core`.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::CoreError;
use crate::eventlog::{AggregateRange, HumanDecision, ListFilter};
use crate::gateway::Core;
use crate::model::{Action, Headers, Request};

pub fn router(core: Arc<Core>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/analyze_request", post(analyze_request))
        .route("/api/requests", get(list_requests))
        .route("/api/requests/pending", get(list_pending))
        .route("/api/feedback", post(feedback))
        .route("/api/stats", get(stats))
        .route("/api/top-ips", get(top_ips))
        .route("/api/recent-events", get(recent_events))
        .route("/api/v1/stats/aggregate", get(aggregate))
        .route("/api/ip/:ip", get(ip_lookup))
        .route("/api/blacklist", post(blacklist))
        .route("/api/whitelist", post(whitelist))
        .route("/api/retrain", post(retrain))
        .route("/ws", get(ws_upgrade))
        .with_state(core)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive()),
        )
}

async fn health(State(core): State<Arc<Core>>) -> Json<serde_json::Value> {
    let dependencies: std::collections::BTreeMap<_, _> = core
        .dependency_health()
        .into_iter()
        .map(|(name, healthy)| (name, healthy))
        .collect();
    let status = if dependencies.values().all(|h| *h) { "ok" } else { "degraded" };
    Json(json!({
        "status": status,
        "dry_run": core.config().dry_run,
        "fail_open": core.config().fail_open,
        "dependencies": dependencies,
    }))
}

#[derive(Debug, Deserialize)]
pub struct RequestMetadata {
    pub source_ip: String,
    pub method: String,
    pub uri: String,
    #[serde(default)]
    pub query_string: String,
    #[serde(default)]
    pub headers: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<RequestMetadata> for Request {
    fn from(m: RequestMetadata) -> Self {
        Request {
            method: m.method,
            uri: m.uri,
            query_string: m.query_string,
            headers: Headers::from_pairs(m.headers),
            body: m.body,
            source_ip: m.source_ip,
            received_at: m.timestamp.unwrap_or_else(chrono::Utc::now),
        }
    }
}

/// Runs the pipeline on a spawned task so a panic anywhere in `Core` surfaces
/// as a `JoinError` here instead of taking the connection down, matching the
/// gateway's global exception handler.
async fn analyze_request(
    State(core): State<Arc<Core>>,
    Json(meta): Json<RequestMetadata>,
) -> Json<serde_json::Value> {
    let request: Request = meta.into();
    match tokio::spawn(async move { core.analyze_request(request).await }).await {
        Ok(resp) => Json(serde_json::to_value(resp).unwrap_or_else(|_| json!({}))),
        Err(e) => {
            tracing::error!(error = %e, "gateway panicked while analyzing request");
            Json(json!({
                "action": "ALLOWED",
                "risk_score": 0.0,
                "reason": format!("WAF error (fail-open): {e}"),
                "attack_type": null,
                "decision_id": 0,
                "latency_ms": 0,
            }))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListRequestsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    pub action: Option<String>,
    pub min_risk_score: Option<f64>,
}

fn default_limit() -> i64 {
    50
}

fn parse_action(s: &str) -> Result<Action, CoreError> {
    match s.to_ascii_uppercase().as_str() {
        "ALLOWED" => Ok(Action::Allowed),
        "BLOCKED" => Ok(Action::Blocked),
        "PENDING" => Ok(Action::Pending),
        other => Err(CoreError::ClientBadInput(format!("unknown action '{other}'"))),
    }
}

async fn list_requests(
    State(core): State<Arc<Core>>,
    Query(q): Query<ListRequestsQuery>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let action = q.action.as_deref().map(parse_action).transpose()?;
    let records = core.list_requests(ListFilter {
        limit: q.limit,
        offset: q.offset,
        action,
        min_risk_score: q.min_risk_score,
    })?;
    Ok(Json(json!({ "requests": records })))
}

async fn list_pending(State(core): State<Arc<Core>>) -> Result<Json<serde_json::Value>, CoreError> {
    let records = core.list_pending()?;
    Ok(Json(json!({ "requests": records })))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    pub request_id: i64,
    pub decision: String,
    pub reviewer: String,
    pub notes: Option<String>,
}

async fn feedback(
    State(core): State<Arc<Core>>,
    Json(body): Json<FeedbackBody>,
) -> Result<StatusCode, CoreError> {
    let decision = match body.decision.to_ascii_uppercase().as_str() {
        "ALLOW" => HumanDecision::Allow,
        "BLOCK" => HumanDecision::Block,
        other => {
            return Err(CoreError::ClientBadInput(format!(
                "decision must be ALLOW or BLOCK, got '{other}'"
            )))
        }
    };
    core.record_feedback(body.request_id, decision, &body.reviewer, body.notes.as_deref())?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stats(State(core): State<Arc<Core>>) -> Result<Json<serde_json::Value>, CoreError> {
    let today = core.today_statistics()?;
    let block_rate = if today.total_requests > 0 {
        (today.blocked_requests as f64 / today.total_requests as f64) * 100.0
    } else {
        0.0
    };
    let block_rate = (block_rate * 10.0).round() / 10.0;
    Ok(Json(json!({
        "total_requests": today.total_requests,
        "allowed_requests": today.allowed_requests,
        "blocked_requests": today.blocked_requests,
        "pending_requests": today.pending_requests,
        "avg_risk_score": today.avg_risk_score,
        "avg_latency_ms": today.avg_latency_ms,
        "unique_ips": today.unique_ips,
        "block_rate": block_rate,
        "top_attack_families": today.top_attack_families,
        "top_attacking_ips": today.top_attacking_ips,
    })))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default = "default_top_limit")]
    pub limit: i64,
}

fn default_top_limit() -> i64 {
    10
}

async fn top_ips(
    State(core): State<Arc<Core>>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let ips = core.top_attacking_ips(q.limit)?;
    Ok(Json(json!({ "ips": ips })))
}

async fn recent_events(
    State(core): State<Arc<Core>>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let events = core.recent_high_severity(q.limit)?;
    Ok(Json(json!({ "events": events })))
}

#[derive(Debug, Deserialize)]
pub struct AggregateQuery {
    pub range: String,
}

async fn aggregate(
    State(core): State<Arc<Core>>,
    Query(q): Query<AggregateQuery>,
) -> Result<Json<serde_json::Value>, CoreError> {
    let range = AggregateRange::parse(&q.range)
        .ok_or_else(|| CoreError::ClientBadInput(format!("unknown range '{}'", q.range)))?;
    let result = core.aggregate(range)?;
    Ok(Json(json!(result)))
}

async fn ip_lookup(State(core): State<Arc<Core>>, Path(ip): Path<String>) -> Json<serde_json::Value> {
    let reputation = core.ip_reputation(&ip);
    let geo = core.geo_for(&ip);
    Json(json!({ "ip": ip, "reputation": reputation, "geo": geo }))
}

#[derive(Debug, Deserialize)]
pub struct BlacklistBody {
    pub ip_address: String,
    #[serde(default = "default_blacklist_ttl")]
    pub ttl: u64,
    pub reason: Option<String>,
}

fn default_blacklist_ttl() -> u64 {
    86_400
}

async fn blacklist(State(core): State<Arc<Core>>, Json(body): Json<BlacklistBody>) -> StatusCode {
    if let Some(reason) = &body.reason {
        tracing::info!(ip = %body.ip_address, reason, "blacklist request");
    }
    core.blacklist(&body.ip_address, Duration::from_secs(body.ttl));
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct WhitelistBody {
    pub ip_address: String,
    pub reason: Option<String>,
}

async fn whitelist(State(core): State<Arc<Core>>, Json(body): Json<WhitelistBody>) -> StatusCode {
    if let Some(reason) = &body.reason {
        tracing::info!(ip = %body.ip_address, reason, "whitelist request");
    }
    core.whitelist(&body.ip_address);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct RetrainBody {
    pub trigger: String,
}

#[derive(Debug, Serialize)]
pub struct RetrainResponse {
    pub accepted: bool,
    pub detail: String,
}

/// Forwards a retrain trigger to the inference service. Best-effort: this
/// core has no model of its own to retrain, so any fault just gets reported
/// back rather than retried (§4.9 admin operations surface faults as typed
/// results, not silent failures).
async fn retrain(
    State(core): State<Arc<Core>>,
    Json(body): Json<RetrainBody>,
) -> Result<Json<RetrainResponse>, CoreError> {
    let url = format!("{}/retrain", core.config().ai_service_url.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| CoreError::Internal(e.to_string()))?;

    match client.post(&url).json(&json!({ "trigger": body.trigger })).send().await {
        Ok(resp) if resp.status().is_success() => Ok(Json(RetrainResponse {
            accepted: true,
            detail: "retrain request forwarded".to_string(),
        })),
        Ok(resp) => Err(CoreError::TransientDependency(format!(
            "inference service returned {}",
            resp.status()
        ))),
        Err(e) => Err(CoreError::TransientDependency(e.to_string())),
    }
}

async fn ws_upgrade(State(core): State<Arc<Core>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_session(socket, core))
}

async fn ws_session(mut socket: WebSocket, core: Arc<Core>) {
    let mut subscriber = core.subscribe();
    loop {
        tokio::select! {
            event = subscriber.receiver.recv() => {
                match event {
                    Some(event) => {
                        let text = event.to_string();
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Text(_))) => {
                        let pong = json!({ "type": "pong" }).to_string();
                        if socket.send(Message::Text(pong)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_action_rejects_unknown() {
        assert!(parse_action("unknown").is_err());
        assert!(parse_action("blocked").is_ok());
    }
}
