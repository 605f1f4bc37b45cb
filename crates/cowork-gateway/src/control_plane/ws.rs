//! The duplex WebSocket loop: a `connect` handshake gate in front of the
//! teacher's `socket.split()` plus `tokio::select!{ws_rx, output_rx}` shape
//! from `ws.rs`, now also folding in a heartbeat tick and per-remote-address
//! lockout on failed handshakes.

use super::rpc::{route_rpc, ConnectionContext};
use super::server::GatewayState;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use cowork_core::{ClientId, ConnectFrame, ControlClient, EventFrame, IncomingFrame, RpcResponse};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

const CLOSE_HANDSHAKE_TIMEOUT: u16 = 4008;
const CLOSE_AUTH_FAILED: u16 = 4001;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const OUTPUT_BUFFER: usize = 256;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, remote_addr, state))
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: impl Into<String>) {
    let _ = socket.send(Message::Close(Some(CloseFrame { code, reason: reason.into().into() }))).await;
}

async fn handle_connection(mut socket: WebSocket, remote_addr: SocketAddr, state: Arc<GatewayState>) {
    let remote_key = remote_addr.ip().to_string();

    if let Some(remaining) = state.failures.banned_for(&remote_key) {
        warn!(remote = %remote_addr, "rejecting connection from banned remote");
        close_with(&mut socket, CLOSE_AUTH_FAILED, format!("banned for {} more seconds", remaining.num_seconds().max(0))).await;
        return;
    }

    let frame = match tokio::time::timeout(HANDSHAKE_TIMEOUT, socket.recv()).await {
        Ok(Some(Ok(Message::Text(text)))) => serde_json::from_str::<IncomingFrame>(&text).ok(),
        _ => None,
    };

    let Some(IncomingFrame::Connect(ConnectFrame { token, .. })) = frame else {
        close_with(&mut socket, CLOSE_HANDSHAKE_TIMEOUT, "expected a connect frame within the handshake window").await;
        return;
    };

    if state.auth.verify_token(token.as_deref()).is_err() {
        if state.failures.record_failure(&remote_key) {
            warn!(remote = %remote_addr, "remote banned after repeated failed handshakes");
        }
        close_with(&mut socket, CLOSE_AUTH_FAILED, "invalid token").await;
        return;
    }
    state.failures.reset(&remote_key);

    let client = ControlClient {
        id: ClientId::generate(),
        remote_addr: remote_addr.to_string(),
        granted_scope: ["admin".to_string()].into_iter().collect(),
        connected_at: chrono::Utc::now(),
    };
    state.clients.insert(client.id.clone(), client.clone());
    info!(client_id = %client.id, remote = %remote_addr, "control client connected");

    let ack = EventFrame::new("connected", 0, serde_json::json!({ "clientId": client.id.as_str() }));
    if socket.send(Message::Text(serde_json::to_string(&ack).unwrap_or_default())).await.is_err() {
        state.clients.remove(&client.id);
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (output_tx, mut output_rx) = mpsc::channel::<EventFrame>(OUTPUT_BUFFER);
    let ctx = ConnectionContext::new(client.clone(), state.clone(), output_tx);

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                let Some(Ok(message)) = incoming else { break };
                match message {
                    Message::Text(text) => {
                        if !dispatch_frame(&text, &ctx, &mut ws_tx).await {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            event = output_rx.recv() => {
                let Some(event) = event else { continue };
                if ws_tx.send(Message::Text(serde_json::to_string(&event).unwrap_or_default())).await.is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    for entry in ctx.subscriptions.iter() {
        entry.value().cancel();
    }
    state.clients.remove(&client.id);
    info!(client_id = %client.id, "control client disconnected");
}

/// Parse and route one incoming text frame. Returns `false` when the
/// connection should be torn down (send failure or malformed response).
async fn dispatch_frame(
    text: &str,
    ctx: &ConnectionContext,
    ws_tx: &mut futures::stream::SplitSink<WebSocket, Message>,
) -> bool {
    match serde_json::from_str::<IncomingFrame>(text) {
        Ok(IncomingFrame::Req(req)) => {
            let response = route_rpc(&req, ctx).await;
            ws_tx.send(Message::Text(serde_json::to_string(&response).unwrap_or_default())).await.is_ok()
        }
        Ok(IncomingFrame::Connect(_)) => true,
        Err(e) => {
            warn!(client_id = %ctx.client.id, error = %e, "malformed frame");
            let err = RpcResponse::invalid_input("", format!("malformed frame: {e}"));
            ws_tx.send(Message::Text(serde_json::to_string(&err).unwrap_or_default())).await.is_ok()
        }
    }
}
