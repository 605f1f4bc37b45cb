//! Webhook/Hooks server: token-authenticated HTTP triggers that enqueue
//! tasks or wake events, hosted on the same `axum::Router` the Control
//! Plane's WebSocket endpoint is merged into. Built with the same
//! `axum::Router` + `tower_http` stack `control_plane::server` already
//! depends on — no new HTTP framework introduced.

use crate::control_plane::auth::constant_time_eq;
use crate::control_plane::server::GatewayState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::warn;

const MAX_BODY_BYTES: usize = 1_048_576;
const BODY_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// A configured path, matched on headers and a JSON-pointer equality check
/// against the request body — declarative only, no expression language, per
/// the matcher's explicit scope.
#[derive(Clone, Debug)]
pub struct MappedPath {
    pub path: String,
    pub required_headers: Vec<(String, String)>,
    pub required_pointer: Option<(String, Value)>,
    pub action: MappedAction,
}

#[derive(Clone, Debug)]
pub enum MappedAction {
    Wake,
    Agent { prompt: String },
}

impl MappedPath {
    fn matches(&self, headers: &HeaderMap, body: &Value) -> bool {
        for (name, expected) in &self.required_headers {
            let Some(actual) = headers.get(name).and_then(|v| v.to_str().ok()) else { return false };
            if actual != expected {
                return false;
            }
        }
        if let Some((pointer, expected)) = &self.required_pointer {
            if body.pointer(pointer) != Some(expected) {
                return false;
            }
        }
        true
    }
}

pub fn router() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/health", get(health))
        .route("/wake", post(wake))
        .route("/agent", post(agent))
        .route("/hooks/*path", post(mapped))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
}

fn bearer_or_header_token(headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    if let Some(value) = headers.get("X-CoWork-Token").and_then(|v| v.to_str().ok()) {
        return Some(value.to_string());
    }
    if let Some(query) = uri.query() {
        for pair in query.split('&') {
            if let Some(token) = pair.strip_prefix("token=") {
                warn!("webhook token supplied via query string; this is deprecated, use a header instead");
                return Some(token.to_string());
            }
        }
    }
    None
}

fn authenticate(state: &GatewayState, headers: &HeaderMap, uri: &Uri) -> Result<(), StatusCode> {
    let Some(expected) = state.auth.token.as_deref() else {
        return Err(StatusCode::UNAUTHORIZED);
    };
    let provided = bearer_or_header_token(headers, uri).ok_or(StatusCode::UNAUTHORIZED)?;
    if constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        Err(StatusCode::UNAUTHORIZED)
    }
}

async fn read_body_with_timeout(body: axum::body::Body) -> Result<Value, StatusCode> {
    let bytes = tokio::time::timeout(BODY_READ_TIMEOUT, axum::body::to_bytes(body, MAX_BODY_BYTES))
        .await
        .map_err(|_| StatusCode::REQUEST_TIMEOUT)?
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|_| StatusCode::BAD_REQUEST)
}

async fn health(State(state): State<Arc<GatewayState>>) -> Response {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now(),
        "clients": state.clients.len(),
    }))
    .into_response()
}

#[derive(Deserialize, Default)]
struct WakeBody {
    #[serde(default = "default_wake_mode")]
    mode: String,
    #[serde(default)]
    payload: Value,
}

fn default_wake_mode() -> String {
    "now".to_string()
}

async fn wake(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    uri: Uri,
    request: axum::extract::Request,
) -> Response {
    if let Err(status) = authenticate(&state, &headers, &uri) {
        return status.into_response();
    }
    let raw = match read_body_with_timeout(request.into_body()).await {
        Ok(v) => v,
        Err(status) => return status.into_response(),
    };
    let body: WakeBody = serde_json::from_value(raw).unwrap_or_default();

    if body.mode != "now" && body.mode != "next-heartbeat" {
        return (StatusCode::BAD_REQUEST, "mode must be 'now' or 'next-heartbeat'").into_response();
    }
    // CoWork OS has no standalone daemon heartbeat scheduler distinct from
    // a task's own turn loop, so `next-heartbeat` wakes immediately too;
    // the mode is still recorded on the emitted event for observability.
    let woken = state.daemon.wake_idle_tasks(serde_json::json!({ "mode": body.mode, "payload": body.payload }));
    Json(serde_json::json!({ "woken": woken })).into_response()
}

#[derive(Deserialize)]
struct AgentBody {
    prompt: String,
    model: Option<String>,
}

async fn agent(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    uri: Uri,
    request: axum::extract::Request,
) -> Response {
    if let Err(status) = authenticate(&state, &headers, &uri) {
        return status.into_response();
    }
    let raw = match read_body_with_timeout(request.into_body()).await {
        Ok(v) => v,
        Err(status) => return status.into_response(),
    };
    let body: AgentBody = match serde_json::from_value(raw) {
        Ok(b) => b,
        Err(_) => return (StatusCode::BAD_REQUEST, "prompt is required").into_response(),
    };

    let task_id = state.spawn_task(&body.prompt, body.model);
    (StatusCode::ACCEPTED, Json(serde_json::json!({ "taskId": task_id.as_str() }))).into_response()
}

async fn mapped(
    State(state): State<Arc<GatewayState>>,
    Path(path): Path<String>,
    headers: HeaderMap,
    uri: Uri,
    request: axum::extract::Request,
) -> Response {
    if let Err(status) = authenticate(&state, &headers, &uri) {
        return status.into_response();
    }
    let body = match read_body_with_timeout(request.into_body()).await {
        Ok(v) => v,
        Err(status) => return status.into_response(),
    };

    let Some(entry) = state.mapped_paths.iter().find(|m| m.path == path && m.matches(&headers, &body)) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match &entry.action {
        MappedAction::Wake => {
            let woken = state.daemon.wake_idle_tasks(serde_json::json!({ "mode": "now", "payload": body }));
            Json(serde_json::json!({ "woken": woken })).into_response()
        }
        MappedAction::Agent { prompt } => {
            let task_id = state.spawn_task(prompt, None);
            (StatusCode::ACCEPTED, Json(serde_json::json!({ "taskId": task_id.as_str() }))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapped_path_requires_all_headers() {
        let entry = MappedPath {
            path: "deploy".to_string(),
            required_headers: vec![("X-Source".to_string(), "ci".to_string())],
            required_pointer: None,
            action: MappedAction::Wake,
        };
        let mut headers = HeaderMap::new();
        assert!(!entry.matches(&headers, &Value::Null));
        headers.insert("X-Source", "ci".parse().unwrap());
        assert!(entry.matches(&headers, &Value::Null));
    }

    #[test]
    fn mapped_path_checks_json_pointer() {
        let entry = MappedPath {
            path: "deploy".to_string(),
            required_headers: vec![],
            required_pointer: Some(("/status".to_string(), serde_json::json!("success"))),
            action: MappedAction::Wake,
        };
        assert!(entry.matches(&HeaderMap::new(), &serde_json::json!({"status": "success"})));
        assert!(!entry.matches(&HeaderMap::new(), &serde_json::json!({"status": "failure"})));
    }
}
