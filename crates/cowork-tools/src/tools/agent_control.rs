//! Controls over the calling task's own descendant tasks: list, query,
//! message, wait, and cancel. A task may only ever touch its own subtree —
//! enforced here via [`TaskControl::is_descendant`], not by trusting the
//! model to only name its own children.

use crate::registry::{Tool, ToolResult};
use serde_json::{json, Value};
use std::sync::Arc;

/// A snapshot of one task's state, independent of the concrete Task type so
/// this crate never depends on the Agent Daemon that implements the trait.
#[derive(Clone, Debug)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: String,
    pub prompt: String,
    pub last_output: String,
}

#[async_trait::async_trait]
pub trait TaskControl: Send + Sync {
    fn is_descendant(&self, ancestor: &str, task_id: &str) -> bool;
    fn list_descendants(&self, of: &str) -> Vec<TaskSnapshot>;
    fn query(&self, task_id: &str) -> Result<TaskSnapshot, String>;
    async fn send_message(&self, task_id: &str, message: &str) -> Result<(), String>;
    async fn wait_for_completion(&self, task_id: &str, timeout_secs: u64) -> Result<TaskSnapshot, String>;
    fn cancel(&self, task_id: &str) -> Result<(), String>;
}

pub struct AgentControlTool {
    current_task_id: String,
    control: Arc<dyn TaskControl>,
}

impl AgentControlTool {
    pub fn new(current_task_id: impl Into<String>, control: Arc<dyn TaskControl>) -> Self {
        Self { current_task_id: current_task_id.into(), control }
    }

    fn check_descendant(&self, task_id: &str) -> Result<(), String> {
        if self.control.is_descendant(&self.current_task_id, task_id) {
            Ok(())
        } else {
            Err(format!("'{task_id}' is not a descendant of this task"))
        }
    }
}

#[async_trait::async_trait]
impl Tool for AgentControlTool {
    fn name(&self) -> &str {
        "agent_control"
    }

    fn description(&self) -> &str {
        "List, query, message, wait on, or cancel sub-agent tasks spawned by this task."
    }

    fn prompt(&self) -> &str {
        "Use agent_control to manage sub-agents you have spawned:\n\
         - list: show all of your descendant tasks\n\
         - query <task_id>: get the status of one\n\
         - send_message <task_id> <message>: nudge a running sub-agent\n\
         - wait <task_id> [timeout_secs]: block until it finishes\n\
         - cancel <task_id>: stop it\n\n\
         You can only act on tasks you spawned, directly or transitively."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": {
                    "type": "string",
                    "enum": ["list", "query", "send_message", "wait", "cancel"]
                },
                "task_id": { "type": "string" },
                "message": { "type": "string" },
                "timeout_secs": { "type": "integer" }
            }
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let command = match args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolResult::error("'command' is required"),
        };

        if command == "list" {
            let children = self.control.list_descendants(&self.current_task_id);
            if children.is_empty() {
                return ToolResult::text("No sub-agent tasks running.");
            }
            let lines: Vec<String> = children
                .iter()
                .map(|c| format!("{} [{}] {}", c.task_id, c.status, c.prompt))
                .collect();
            return ToolResult::text(lines.join("\n"));
        }

        let task_id = match args.get("task_id").and_then(|v| v.as_str()) {
            Some(t) => t,
            None => return ToolResult::error(format!("'task_id' is required for '{command}'")),
        };

        if let Err(e) = self.check_descendant(task_id) {
            return ToolResult::error(e);
        }

        match command {
            "query" => match self.control.query(task_id) {
                Ok(snapshot) => ToolResult::text(format!(
                    "{} [{}]\n{}",
                    snapshot.task_id, snapshot.status, snapshot.last_output
                )),
                Err(e) => ToolResult::error(e),
            },
            "send_message" => {
                let message = match args.get("message").and_then(|v| v.as_str()) {
                    Some(m) => m,
                    None => return ToolResult::error("'message' is required for 'send_message'"),
                };
                match self.control.send_message(task_id, message).await {
                    Ok(()) => ToolResult::text(format!("Sent to {task_id}")),
                    Err(e) => ToolResult::error(e),
                }
            }
            "wait" => {
                let timeout_secs = args.get("timeout_secs").and_then(|v| v.as_u64()).unwrap_or(300);
                match self.control.wait_for_completion(task_id, timeout_secs).await {
                    Ok(snapshot) => ToolResult::text(format!(
                        "{} finished as [{}]\n{}",
                        snapshot.task_id, snapshot.status, snapshot.last_output
                    )),
                    Err(e) => ToolResult::error(e),
                }
            }
            "cancel" => match self.control.cancel(task_id) {
                Ok(()) => ToolResult::text(format!("Cancelled {task_id}")),
                Err(e) => ToolResult::error(e),
            },
            other => ToolResult::error(format!("Unknown command: {other}")),
        }
    }
}
