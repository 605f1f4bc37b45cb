//! Control Plane wire protocol.
//!
//! Frames on the wire are one of three shapes, distinguished by `type`:
//!
//!   Client -> Server (request):
//!     { "type": "req", "id": "r1", "method": "task.start", "params": { ... } }
//!
//!   Server -> Client (response):
//!     { "type": "res", "id": "r1", "ok": true, "payload": { ... } }
//!     { "type": "res", "id": "r1", "ok": false, "error": { "code": "FORBIDDEN", "message": "..." } }
//!
//!   Server -> Client (event push, no id):
//!     { "type": "event", "event": "task.progress", "seq": 42, "ts": "...", "payload": { ... } }
//!
//! The handshake frame `connect` carries a nonce challenge response before any
//! other request is accepted; see `cowork_gateway::control_plane`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind: "res",
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: "res",
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(RpcError {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }

    pub fn unauthorized(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::err(id, "UNAUTHORIZED", message)
    }

    pub fn unknown_method(id: impl Into<String>, method: &str) -> Self {
        Self::err(id, "UNKNOWN_METHOD", format!("method not found: {method}"))
    }

    pub fn invalid_input(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::err(id, "INVALID_INPUT", message)
    }

    pub fn method_failed(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::err(id, "METHOD_FAILED", message)
    }

    pub fn forbidden(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::err(id, "FORBIDDEN", message)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventFrame {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub event: String,
    pub seq: u64,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub payload: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_version: Option<u64>,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, seq: u64, payload: serde_json::Value) -> Self {
        Self {
            kind: "event",
            event: event.into(),
            seq,
            ts: chrono::Utc::now(),
            payload,
            state_version: None,
        }
    }

    pub fn gap(seq: u64, dropped: u64) -> Self {
        Self::new("gap", seq, serde_json::json!({ "dropped": dropped }))
    }
}

/// The handshake frame every connection must send first.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectFrame {
    pub token: Option<String>,
    pub nonce: String,
}

/// Any frame the server accepts after the handshake completes.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IncomingFrame {
    Connect(ConnectFrame),
    Req(RpcRequest),
}
