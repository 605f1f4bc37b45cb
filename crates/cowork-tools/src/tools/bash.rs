//! Shell command tool — runs through whichever sandbox tier was selected for
//! the workspace (`cowork-sandbox::select_tier`) instead of a bare
//! `tokio::process::Command`. Tagged `system` risk; the Policy Manager routes
//! most calls through the Approval Gate before they ever reach `execute`.

use crate::registry::{Tool, ToolResult};
use cowork_sandbox::{SandboxRequest, SandboxTier};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct BashTool {
    tier: Arc<dyn SandboxTier>,
    default_timeout_secs: u64,
    network_allowed: bool,
}

impl BashTool {
    pub fn new(tier: Arc<dyn SandboxTier>, network_allowed: bool) -> Self {
        Self { tier, default_timeout_secs: 120, network_allowed }
    }
}

#[async_trait::async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command inside the sandboxed workspace. Use for git, npm, \
         build tools, and other system commands. Captures stdout and stderr. \
         Set timeout in seconds (default 120, max 600)."
    }

    fn prompt(&self) -> &str {
        "Use the bash tool for terminal operations. Quote paths with spaces. \
         Prefer dedicated tools (read, write, edit, glob, grep) over bash equivalents."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The shell command to execute" },
                "timeout": { "type": "integer", "description": "Timeout in seconds (default 120, max 600)" },
                "description": { "type": "string", "description": "Short description of what this command does" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        self.execute_cancellable(args, CancellationToken::new()).await
    }

    async fn execute_cancellable(&self, args: Value, cancel: CancellationToken) -> ToolResult {
        let command = match args["command"].as_str() {
            Some(c) => c.to_string(),
            None => return ToolResult::error("Missing required parameter: command"),
        };

        let timeout_secs = args["timeout"].as_u64().unwrap_or(self.default_timeout_secs).min(600);

        if let Some(desc) = args["description"].as_str() {
            debug!("bash [{}] via {:?}: {}", desc, self.tier.kind(), &command[..command.len().min(80)]);
        } else {
            debug!("bash via {:?}: {}", self.tier.kind(), &command[..command.len().min(80)]);
        }

        let request = SandboxRequest {
            command,
            working_dir: std::env::current_dir().unwrap_or_default(),
            timeout: Duration::from_secs(timeout_secs),
            network_allowed: self.network_allowed,
        };

        match self.tier.run(&request, cancel).await {
            Ok(result) => format_result(&result),
            Err(e) => ToolResult::error(format!("sandbox error: {e}")),
        }
    }
}

fn format_result(result: &cowork_sandbox::SandboxResult) -> ToolResult {
    if result.timed_out {
        return ToolResult::error("Command timed out");
    }

    let stdout = result.stdout.trim();
    let stderr = result.stderr.trim();

    let mut text = if result.success() {
        if stderr.is_empty() {
            stdout.to_string()
        } else {
            format!("{stdout}\n{stderr}")
        }
    } else {
        format!("Exit code: {}\n{}\n{}", result.exit_code.unwrap_or(-1), stdout, stderr)
    };

    if result.stdout_truncated || result.stderr_truncated {
        text.push_str("\n... [output truncated]");
    }

    if text.is_empty() {
        ToolResult::text("(no output)")
    } else if result.success() {
        ToolResult::text(text)
    } else {
        ToolResult::error(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowork_sandbox::SubprocessTier;

    fn tool() -> BashTool {
        BashTool::new(Arc::new(SubprocessTier::new(std::env::temp_dir())), false)
    }

    #[tokio::test]
    async fn runs_a_simple_command() {
        let result = tool().execute(json!({"command": "echo hi"})).await;
        assert!(!result.is_error());
        assert_eq!(result.to_content_string(), "hi");
    }

    #[tokio::test]
    async fn reports_nonzero_exit() {
        let result = tool().execute(json!({"command": "exit 3"})).await;
        assert!(result.is_error());
        assert!(result.to_content_string().contains("Exit code: 3"));
    }

    #[tokio::test]
    async fn missing_command_is_an_error() {
        let result = tool().execute(json!({})).await;
        assert!(result.is_error());
    }
}
