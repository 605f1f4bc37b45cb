//! Axum wiring for the Control Plane: one `Router` serving the WebSocket
//! endpoint, shared with the Webhook server under [`crate::webhook`] on the
//! same listener, the way the teacher's `server.rs` hosts its bee-protocol
//! routes and `ws.rs` endpoint side by side.

use super::auth::ResolvedAuth;
use super::ws::ws_handler;
use cowork_agent::{ApprovalGate, Conversation, ExecutorConfig, AgentDaemon, TaskExecutor};
use cowork_channels::ChannelSecurity;
use cowork_core::{ClientId, ControlClient, GatewayConfig, TaskId, Workspace, WorkspaceId};
use cowork_llm::AnthropicProvider;
use cowork_policy::PolicyManager;
use cowork_store::{EventLog, SecretStore};
use cowork_tools::create_default_registry;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Everything a running gateway needs beyond the wire-level [`GatewayConfig`]:
/// where the workspace lives, which model to default to, and the credentials
/// it was launched with. Generalizes the teacher's `ExtendedConfig`.
pub struct ExtendedConfig {
    pub gateway: GatewayConfig,
    pub anthropic_api_key: Option<String>,
    pub workspace_root: PathBuf,
    pub system_prompt: Option<String>,
}

pub struct GatewayState {
    pub auth: ResolvedAuth,
    pub daemon: Arc<AgentDaemon>,
    pub executor: Arc<TaskExecutor>,
    pub conversations: DashMap<TaskId, Arc<Conversation>>,
    pub workspace: Workspace,
    pub approvals: Arc<ApprovalGate>,
    pub channels: Arc<ChannelSecurity>,
    pub policy: Arc<PolicyManager>,
    pub clients: DashMap<ClientId, ControlClient>,
    pub failures: cowork_core::LockoutTracker<String>,
    pub event_log: Arc<EventLog>,
    pub secrets: Arc<SecretStore>,
    pub started_at: Instant,
    pub default_model: String,
    pub system_prompt: Option<String>,
    pub mapped_paths: Vec<crate::webhook::MappedPath>,
}

/// Context window handed to every task's [`Conversation`]; kept in one place
/// so the Control Plane's `task.start` and the Webhook server's `/agent`
/// agree on it.
pub const CONVERSATION_CONTEXT_TOKENS: usize = 200_000;

/// Remote addresses accumulate 10 failed handshakes before a 15 minute ban,
/// matching the channel pairing lockout in `cowork-channels`.
const MAX_AUTH_FAILURES: u32 = 10;
const AUTH_BAN_MINUTES: i64 = 15;

impl GatewayState {
    /// Register a task, give it a conversation, and spawn its first turn in
    /// the background. Shared by `task.start` (Control Plane) and `/agent`
    /// (Webhook server) so the two entrypoints can't drift.
    pub fn spawn_task(self: &Arc<Self>, prompt: &str, model: Option<String>) -> cowork_core::TaskId {
        let model = model.unwrap_or_else(|| self.default_model.clone());
        let task = self.daemon.create_task(self.workspace.id.clone(), prompt, model);
        let conversation = Arc::new(Conversation::new(task.id.clone(), self.system_prompt.as_deref(), CONVERSATION_CONTEXT_TOKENS));
        self.conversations.insert(task.id.clone(), conversation.clone());

        let executor = self.executor.clone();
        let workspace = self.workspace.clone();
        let task_id = task.id.clone();
        let prompt = prompt.to_string();
        tokio::spawn(async move {
            let cancel = tokio_util::sync::CancellationToken::new();
            if let Err(e) = executor.run_turn(&task_id, &conversation, &workspace, None, &prompt, cancel).await {
                tracing::warn!(task_id = %task_id, error = %e, "task run_turn failed");
            }
        });
        task.id
    }
}

pub async fn start_gateway(config: ExtendedConfig) -> anyhow::Result<()> {
    let auth = ResolvedAuth::from_config(&config.gateway.auth, std::env::var("COWORK_TOKEN").ok());

    let api_key = config
        .anthropic_api_key
        .clone()
        .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
        .unwrap_or_default();
    let provider = Arc::new(AnthropicProvider::new(api_key));

    let network_allowed = std::env::var("COWORK_ALLOW_NETWORK").is_ok();
    let tools = Arc::new(create_default_registry(&config.workspace_root, network_allowed).await);
    let policy = Arc::new(PolicyManager::new(Default::default()));
    let approvals = Arc::new(ApprovalGate::default());
    let daemon = Arc::new(AgentDaemon::new());

    let log_dir = config.workspace_root.join(".cowork").join("events");
    let event_log = Arc::new(EventLog::new(log_dir));

    let executor = Arc::new(TaskExecutor::new(
        provider,
        tools,
        policy.clone(),
        approvals.clone(),
        daemon.clone(),
        event_log.clone(),
        ExecutorConfig::default(),
    ));

    let now = chrono::Utc::now();
    let workspace = Workspace {
        id: WorkspaceId::generate(),
        name: config
            .workspace_root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "workspace".to_string()),
        path: config.workspace_root.clone(),
        allowed_paths: vec![],
        network_allowed,
        created_at: now,
        last_used_at: now,
    };

    let state = Arc::new(GatewayState {
        auth,
        daemon,
        executor,
        conversations: DashMap::new(),
        workspace,
        approvals,
        channels: Arc::new(ChannelSecurity::new()),
        policy,
        clients: DashMap::new(),
        failures: cowork_core::LockoutTracker::new(MAX_AUTH_FAILURES, chrono::Duration::minutes(AUTH_BAN_MINUTES)),
        event_log,
        secrets: Arc::new(SecretStore::new()),
        started_at: Instant::now(),
        default_model: ExecutorConfig::default().default_model,
        system_prompt: config.system_prompt,
        mapped_paths: Vec::new(),
    });

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .merge(crate::webhook::router())
        .layer(cors)
        .with_state(state);

    let bind_addr = config.gateway.bind.to_addr();
    let addr = format!("{bind_addr}:{}", config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "gateway listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
