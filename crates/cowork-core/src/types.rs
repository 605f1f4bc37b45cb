//! Core data model shared by every crate in the workspace.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(Arc::from(s.into()))
            }

            pub fn generate() -> Self {
                Self::new(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    };
}

id_newtype!(SessionKey);
id_newtype!(WorkspaceId);
id_newtype!(TaskId);
id_newtype!(ApprovalId);
id_newtype!(ArtifactId);
id_newtype!(ChannelId);
id_newtype!(ClientId);

/// A directory the agent is permitted to operate against.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub path: PathBuf,
    /// Additional roots outside `path` the agent may also touch.
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,
    #[serde(default)]
    pub network_allowed: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_used_at: chrono::DateTime<chrono::Utc>,
}

/// Lifecycle state of a `Task`, per the plan-execute-observe state machine.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Idle,
    Preflight,
    Executing,
    AwaitingApproval,
    AwaitingUserInput,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub workspace_id: WorkspaceId,
    pub parent_task_id: Option<TaskId>,
    pub depth: u32,
    pub status: TaskStatus,
    pub prompt: String,
    pub model: String,
    #[serde(default)]
    pub fail_reason: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// One append-only entry in a task's event log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    /// Monotonically increasing per task; gaps mean a lagged subscriber missed entries.
    pub seq: u64,
    pub ts: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
}

impl TaskEvent {
    pub fn gap(task_id: TaskId, seq: u64, dropped: u64) -> Self {
        Self {
            task_id,
            seq,
            ts: chrono::Utc::now(),
            kind: "gap".to_string(),
            payload: serde_json::json!({ "dropped": dropped }),
        }
    }
}

/// A file produced or modified by a task, tracked for audit purposes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub task_id: TaskId,
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

/// An outstanding request for human sign-off before a gated tool call proceeds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub task_id: TaskId,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub reason: String,
    pub status: ApprovalStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub resolved_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// State for an in-progress or completed channel pairing handshake.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PairingRecord {
    pub channel_id: ChannelId,
    pub code_hash: String,
    pub attempts: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub banned_until: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChannelContext {
    Private,
    Group,
    Public,
}

/// A configured, paired external channel (e.g. a chat bridge) and the
/// capability attenuation that applies to messages arriving on it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub id: ChannelId,
    pub kind: String,
    pub context: ChannelContext,
    pub allowlisted: bool,
    pub workspace_id: Option<WorkspaceId>,
}

/// An authenticated Control Plane connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlClient {
    pub id: ClientId,
    pub remote_addr: String,
    pub granted_scope: std::collections::HashSet<String>,
    pub connected_at: chrono::DateTime<chrono::Utc>,
}

impl ControlClient {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.granted_scope.contains("admin") || self.granted_scope.contains(scope)
    }
}

/// Role a message played in an LLM conversation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Gateway (Control Plane) configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub bind: BindMode,
    #[serde(default)]
    pub auth: AuthConfig,
}

fn default_port() -> u16 {
    7337
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: BindMode::default(),
            auth: AuthConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    Loopback,
    #[default]
    Lan,
}

impl BindMode {
    pub fn to_addr(&self) -> &str {
        match self {
            BindMode::Loopback => "127.0.0.1",
            BindMode::Lan => "0.0.0.0",
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    pub token: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    #[default]
    Token,
    None,
}
