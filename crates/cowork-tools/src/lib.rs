//! Modular tool implementations, dispatched through the Policy Manager and
//! Approval Gate via [`registry::ToolRegistry::dispatch`].
//!
//! Each tool is a self-contained file in `tools/`. To add one: create the
//! file, implement `Tool`, register it in `create_default_registry`.

pub mod registry;
pub mod tools;

pub use registry::{ApprovalSink, Tool, ToolRegistry, ToolResult};
pub use tools::agent_control::{AgentControlTool, TaskControl, TaskSnapshot};

use std::path::Path;
use std::sync::Arc;

/// Build the registry of tools available to every task: filesystem
/// read/write/edit, search, shell, and destructive file operations.
/// `agent_control` is registered separately per task (see
/// `with_agent_control`) since it needs that task's id and the daemon's
/// task tree, neither of which exist at registry-construction time.
pub async fn create_default_registry(workspace_root: impl AsRef<Path>, network_allowed: bool) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let root = workspace_root.as_ref();
    let tier: Arc<dyn cowork_sandbox::SandboxTier> = Arc::from(cowork_sandbox::select_tier(root.to_path_buf()).await);

    registry.register(tools::read::ReadTool::new(root));
    registry.register(tools::glob::GlobTool::new(root));
    registry.register(tools::grep::GrepTool::new(root));

    registry.register(tools::write::WriteTool::new(root));
    registry.register(tools::edit::EditTool::new(root));
    registry.register(tools::bash::BashTool::new(tier, network_allowed));

    registry.register(tools::delete::DeleteTool::new(root));
    registry.register(tools::bulk_rename::BulkRenameTool::new(root));

    registry
}

/// Register the `agent_control` tool for a specific task against the given
/// task tree handle.
pub fn with_agent_control(registry: &mut ToolRegistry, current_task_id: impl Into<String>, control: Arc<dyn TaskControl>) {
    registry.register(AgentControlTool::new(current_task_id, control));
}

/// Only register tools named in `allowed_tools`. Used when a workspace's
/// configuration restricts the tool surface a task may even see.
pub async fn create_policy_registry(workspace_root: impl AsRef<Path>, allowed_tools: &[&str], network_allowed: bool) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let root = workspace_root.as_ref();
    let mut tier: Option<Arc<dyn cowork_sandbox::SandboxTier>> = None;

    for name in allowed_tools {
        match *name {
            "read" => registry.register(tools::read::ReadTool::new(root)),
            "glob" => registry.register(tools::glob::GlobTool::new(root)),
            "grep" => registry.register(tools::grep::GrepTool::new(root)),
            "write" => registry.register(tools::write::WriteTool::new(root)),
            "edit" => registry.register(tools::edit::EditTool::new(root)),
            "bash" => {
                if tier.is_none() {
                    tier = Some(Arc::from(cowork_sandbox::select_tier(root.to_path_buf()).await));
                }
                registry.register(tools::bash::BashTool::new(tier.clone().unwrap(), network_allowed));
            }
            "delete" => registry.register(tools::delete::DeleteTool::new(root)),
            "bulk_rename" => registry.register(tools::bulk_rename::BulkRenameTool::new(root)),
            _ => tracing::warn!("Unknown tool in policy: {}", name),
        }
    }

    registry
}
