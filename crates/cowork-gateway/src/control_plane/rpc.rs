//! `route_rpc` — the Control Plane's method dispatch table, generalized
//! from the teacher's `chat.*`/`sessions.*`/`tools.list` surface into the
//! `task.*`/`workspace.*`/`channel.*`/`approval.*`/`config.*` surface
//! spec.md names, while keeping the same per-connection spawn-one-task
//! pattern the teacher uses for `chat.send`.

use super::server::GatewayState;
use cowork_core::{ApprovalId, ChannelId, ClientId, ControlClient, EventFrame, RpcRequest, RpcResponse, TaskId};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct ConnectionContext {
    pub client: ControlClient,
    pub state: Arc<GatewayState>,
    pub output_tx: mpsc::Sender<EventFrame>,
    pub subscriptions: DashMap<TaskId, CancellationToken>,
}

impl ConnectionContext {
    pub fn new(client: ControlClient, state: Arc<GatewayState>, output_tx: mpsc::Sender<EventFrame>) -> Self {
        Self { client, state, output_tx, subscriptions: DashMap::new() }
    }
}

/// Scope required to invoke a method, by its `.`-delimited prefix.
/// `None` means any authenticated client may call it.
fn required_scope(method: &str) -> Option<&'static str> {
    match method.split('.').next().unwrap_or(method) {
        "ping" | "health" | "status" => None,
        "config" => Some("config"),
        "llm" => Some("admin"),
        "channel" => Some("channel"),
        "workspace" => Some("workspace"),
        "task" => Some("task"),
        "approval" => Some("approval"),
        _ => Some("admin"),
    }
}

pub async fn route_rpc(req: &RpcRequest, ctx: &ConnectionContext) -> RpcResponse {
    if let Some(scope) = required_scope(&req.method) {
        if !ctx.client.has_scope(scope) {
            return RpcResponse::forbidden(req.id.clone(), format!("missing scope: {scope}"));
        }
    }

    match req.method.as_str() {
        "ping" => RpcResponse::ok(req.id.clone(), serde_json::json!({ "pong": true })),
        "health" => handle_health(req, ctx),
        "status" => handle_status(req, ctx),
        "config.get" => handle_config_get(req, ctx),
        "llm.configure" => handle_llm_configure(req, ctx),
        "channel.pair.begin" => handle_channel_pair_begin(req, ctx).await,
        "channel.pair.confirm" => handle_channel_pair_confirm(req, ctx).await,
        "channel.list" => handle_channel_list(req, ctx),
        "workspace.get" => handle_workspace_get(req, ctx),
        "task.start" => handle_task_start(req, ctx).await,
        "task.send" => handle_task_send(req, ctx).await,
        "task.cancel" => handle_task_cancel(req, ctx),
        "task.get" => handle_task_get(req, ctx),
        "task.history" => handle_task_history(req, ctx),
        "approval.list" => handle_approval_list(req, ctx),
        "approval.respond" => handle_approval_respond(req, ctx),
        other => RpcResponse::unknown_method(req.id.clone(), other),
    }
}

fn handle_health(req: &RpcRequest, ctx: &ConnectionContext) -> RpcResponse {
    RpcResponse::ok(
        req.id.clone(),
        serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "uptime_secs": ctx.state.started_at.elapsed().as_secs(),
        }),
    )
}

fn handle_status(req: &RpcRequest, ctx: &ConnectionContext) -> RpcResponse {
    RpcResponse::ok(
        req.id.clone(),
        serde_json::json!({
            "clients": ctx.state.clients.len(),
            "pending_approvals": ctx.state.approvals.list_pending().len(),
        }),
    )
}

fn handle_config_get(req: &RpcRequest, ctx: &ConnectionContext) -> RpcResponse {
    RpcResponse::ok(
        req.id.clone(),
        serde_json::json!({
            "default_model": ctx.state.default_model,
            "workspace_root": ctx.state.workspace.path.display().to_string(),
            "anthropic_api_key": ctx.state.secrets.mask("anthropic_api_key"),
        }),
    )
}

fn handle_llm_configure(req: &RpcRequest, ctx: &ConnectionContext) -> RpcResponse {
    let Some(api_key) = req.params.get("apiKey").and_then(|v| v.as_str()) else {
        return RpcResponse::invalid_input(req.id.clone(), "apiKey is required");
    };
    match ctx.state.secrets.set("anthropic_api_key", api_key) {
        Ok(()) => RpcResponse::ok(req.id.clone(), serde_json::json!({ "configured": true })),
        Err(e) => RpcResponse::method_failed(req.id.clone(), e.to_string()),
    }
}

async fn handle_channel_pair_begin(req: &RpcRequest, ctx: &ConnectionContext) -> RpcResponse {
    let Some(channel_id) = req.params.get("channelId").and_then(|v| v.as_str()) else {
        return RpcResponse::invalid_input(req.id.clone(), "channelId is required");
    };
    match ctx.state.channels.begin_pairing(&ChannelId::new(channel_id)).await {
        Ok(code) => RpcResponse::ok(req.id.clone(), serde_json::json!({ "code": code })),
        Err(e) => RpcResponse::method_failed(req.id.clone(), e.to_string()),
    }
}

async fn handle_channel_pair_confirm(req: &RpcRequest, ctx: &ConnectionContext) -> RpcResponse {
    let (Some(channel_id), Some(code)) = (
        req.params.get("channelId").and_then(|v| v.as_str()),
        req.params.get("code").and_then(|v| v.as_str()),
    ) else {
        return RpcResponse::invalid_input(req.id.clone(), "channelId and code are required");
    };
    match ctx.state.channels.confirm_pairing(&ChannelId::new(channel_id), code).await {
        Ok(()) => RpcResponse::ok(req.id.clone(), serde_json::json!({ "paired": true })),
        Err(e) => RpcResponse::method_failed(req.id.clone(), e.to_string()),
    }
}

fn handle_channel_list(req: &RpcRequest, ctx: &ConnectionContext) -> RpcResponse {
    RpcResponse::ok(req.id.clone(), serde_json::json!({ "channels": ctx.state.channels.list() }))
}

fn handle_workspace_get(req: &RpcRequest, ctx: &ConnectionContext) -> RpcResponse {
    match serde_json::to_value(&ctx.state.workspace) {
        Ok(value) => RpcResponse::ok(req.id.clone(), value),
        Err(e) => RpcResponse::method_failed(req.id.clone(), e.to_string()),
    }
}

async fn handle_task_start(req: &RpcRequest, ctx: &ConnectionContext) -> RpcResponse {
    let Some(prompt) = req.params.get("prompt").and_then(|v| v.as_str()) else {
        return RpcResponse::invalid_input(req.id.clone(), "prompt is required");
    };
    let model = req.params.get("model").and_then(|v| v.as_str()).map(str::to_string);

    let task_id = ctx.state.spawn_task(prompt, model);
    spawn_task_subscription(ctx, task_id.clone());

    RpcResponse::ok(req.id.clone(), serde_json::json!({ "taskId": task_id.as_str() }))
}

async fn handle_task_send(req: &RpcRequest, ctx: &ConnectionContext) -> RpcResponse {
    let (Some(task_id), Some(message)) =
        (req.params.get("taskId").and_then(|v| v.as_str()), req.params.get("message").and_then(|v| v.as_str()))
    else {
        return RpcResponse::invalid_input(req.id.clone(), "taskId and message are required");
    };
    let task_id = TaskId::new(task_id);
    let Some(conversation) = ctx.state.conversations.get(&task_id).map(|e| e.clone()) else {
        return RpcResponse::method_failed(req.id.clone(), format!("no conversation for task '{task_id}'"));
    };

    let executor = ctx.state.executor.clone();
    let workspace = ctx.state.workspace.clone();
    let message = message.to_string();
    let spawned_id = task_id.clone();
    tokio::spawn(async move {
        let cancel = CancellationToken::new();
        if let Err(e) = executor.run_turn(&spawned_id, &conversation, &workspace, None, &message, cancel).await {
            warn!(task_id = %spawned_id, error = %e, "task run_turn failed");
        }
    });

    RpcResponse::ok(req.id.clone(), serde_json::json!({ "accepted": true }))
}

fn handle_task_cancel(req: &RpcRequest, ctx: &ConnectionContext) -> RpcResponse {
    let Some(task_id) = req.params.get("taskId").and_then(|v| v.as_str()) else {
        return RpcResponse::invalid_input(req.id.clone(), "taskId is required");
    };
    match ctx.state.daemon.cancel(&TaskId::new(task_id)) {
        Some(()) => RpcResponse::ok(req.id.clone(), serde_json::json!({ "cancelled": true })),
        None => RpcResponse::method_failed(req.id.clone(), format!("task '{task_id}' not found")),
    }
}

fn handle_task_get(req: &RpcRequest, ctx: &ConnectionContext) -> RpcResponse {
    let Some(task_id) = req.params.get("taskId").and_then(|v| v.as_str()) else {
        return RpcResponse::invalid_input(req.id.clone(), "taskId is required");
    };
    match ctx.state.daemon.get(&TaskId::new(task_id)) {
        Some(task) => RpcResponse::ok(req.id.clone(), serde_json::to_value(task).unwrap_or_default()),
        None => RpcResponse::method_failed(req.id.clone(), format!("task '{task_id}' not found")),
    }
}

fn handle_task_history(req: &RpcRequest, ctx: &ConnectionContext) -> RpcResponse {
    let Some(task_id) = req.params.get("taskId").and_then(|v| v.as_str()) else {
        return RpcResponse::invalid_input(req.id.clone(), "taskId is required");
    };
    match ctx.state.event_log.replay(&TaskId::new(task_id)) {
        Ok(events) => RpcResponse::ok(req.id.clone(), serde_json::to_value(events).unwrap_or_default()),
        Err(e) => RpcResponse::method_failed(req.id.clone(), e.to_string()),
    }
}

fn handle_approval_list(req: &RpcRequest, ctx: &ConnectionContext) -> RpcResponse {
    RpcResponse::ok(req.id.clone(), serde_json::to_value(ctx.state.approvals.list_pending()).unwrap_or_default())
}

fn handle_approval_respond(req: &RpcRequest, ctx: &ConnectionContext) -> RpcResponse {
    let (Some(approval_id), Some(approve)) =
        (req.params.get("approvalId").and_then(|v| v.as_str()), req.params.get("approve").and_then(|v| v.as_bool()))
    else {
        return RpcResponse::invalid_input(req.id.clone(), "approvalId and approve are required");
    };
    match ctx.state.approvals.respond(&ApprovalId::new(approval_id), approve) {
        Ok(()) => RpcResponse::ok(req.id.clone(), serde_json::json!({ "resolved": true })),
        Err(e) => RpcResponse::method_failed(req.id.clone(), e),
    }
}

/// Forward a task's event stream to this connection as `EventFrame`s until
/// the task finishes, the subscription is replaced, or the connection
/// closes — mirrors the teacher's one-`tokio::spawn`-per-`chat.send`
/// forwarding task in `handle_chat_send`, generalized to the Daemon's
/// per-task broadcast channel instead of a single session-wide one.
fn spawn_task_subscription(ctx: &ConnectionContext, task_id: TaskId) {
    let Some(mut rx) = ctx.state.daemon.subscribe(&task_id) else { return };
    let cancel = CancellationToken::new();
    ctx.subscriptions.insert(task_id.clone(), cancel.clone());

    let output_tx = ctx.output_tx.clone();
    let client_id: ClientId = ctx.client.id.clone();
    tokio::spawn(async move {
        let mut seq = 0u64;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = cowork_agent::recv_or_gap(&task_id, &mut rx) => {
                    let Some(event) = event else { break };
                    let frame = EventFrame::new(format!("task.{}", event.kind), seq, serde_json::json!({
                        "taskId": task_id.as_str(),
                        "event": event,
                    }));
                    seq += 1;
                    if output_tx.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
        info!(client_id = %client_id, task_id = %task_id, "task subscription ended");
    });
}
