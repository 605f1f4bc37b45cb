//! Four-layer, deny-wins Policy Manager.
//!
//! Each layer is a plain function over the prior layer's outcome; a `Deny`
//! from any layer short-circuits the rest. Layers, in order: global
//! guardrails, workspace permissions, channel context restrictions, and
//! per-tool risk rules.

use crate::guardrails::{self, BUILTIN_DENY_COMMANDS};
use cowork_core::{ChannelContext, Workspace};
use std::path::{Path, PathBuf};

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    RequireApproval(String),
    Deny(String),
}

impl PolicyDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }
}

/// Combine two decisions, keeping the more restrictive: `Deny` beats
/// `RequireApproval` beats `Allow`.
fn most_restrictive(a: PolicyDecision, b: PolicyDecision) -> PolicyDecision {
    match (a, b) {
        (PolicyDecision::Deny(r), _) | (_, PolicyDecision::Deny(r)) => PolicyDecision::Deny(r),
        (PolicyDecision::RequireApproval(r), _) | (_, PolicyDecision::RequireApproval(r)) => {
            PolicyDecision::RequireApproval(r)
        }
        _ => PolicyDecision::Allow,
    }
}

/// Static risk classification for a tool, consulted by layer 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolRisk {
    ReadOnly,
    Write,
    Destructive,
    System,
    Network,
}

/// User-configurable policy knobs layered on top of the built-in guardrails.
#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    pub extra_deny_patterns: Vec<String>,
    pub extra_ask_patterns: Vec<String>,
}

/// Per-decision context: the active workspace and, for messages arriving
/// over an external channel, the attenuation that applies.
pub struct PolicyContext<'a> {
    pub workspace: &'a Workspace,
    pub channel_context: Option<ChannelContext>,
}

pub struct PolicyManager {
    config: PolicyConfig,
}

impl PolicyManager {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn decide(&self, tool: &str, input: &serde_json::Value, ctx: &PolicyContext<'_>) -> PolicyDecision {
        let decision = self.check_guardrails(tool, input);
        if matches!(decision, PolicyDecision::Deny(_)) {
            return decision;
        }

        let decision = most_restrictive(decision, self.check_workspace_permissions(tool, input, ctx.workspace));
        if matches!(decision, PolicyDecision::Deny(_)) {
            return decision;
        }

        let decision = most_restrictive(decision, self.check_context_restrictions(tool, ctx.channel_context));
        if matches!(decision, PolicyDecision::Deny(_)) {
            return decision;
        }

        most_restrictive(decision, self.check_tool_risk(tool, input))
    }

    /// Layer 1: built-in + configured deny/ask command and path patterns.
    fn check_guardrails(&self, tool: &str, input: &serde_json::Value) -> PolicyDecision {
        if tool == "bash" || tool == "run_shell_command" {
            if let Some(command) = input.get("command").and_then(|v| v.as_str()) {
                if guardrails::detect_obfuscation(command) {
                    return PolicyDecision::Deny("obfuscated command".to_string());
                }
                let candidates = guardrails::bash_candidates(command);
                for candidate in &candidates {
                    for pattern in BUILTIN_DENY_COMMANDS.iter().copied().chain(self.config.extra_deny_patterns.iter().map(String::as_str)) {
                        if guardrails::glob_match_permissive(pattern, candidate) {
                            return PolicyDecision::Deny(format!("command matches denied pattern: {pattern}"));
                        }
                    }
                }
                for candidate in &candidates {
                    for pattern in &self.config.extra_ask_patterns {
                        if guardrails::glob_match_permissive(pattern, candidate) {
                            return PolicyDecision::RequireApproval(format!("command matches ask pattern: {pattern}"));
                        }
                    }
                }
            }
        }

        if matches!(tool, "read" | "glob" | "grep" | "write" | "edit" | "delete") {
            if let Some(path) = guardrails::extract_path(input) {
                if guardrails::detect_path_traversal(&path) {
                    return PolicyDecision::Deny("path traversal attempt".to_string());
                }
            }
        }

        PolicyDecision::Allow
    }

    /// Layer 2: path containment against the active workspace's roots.
    fn check_workspace_permissions(
        &self,
        tool: &str,
        input: &serde_json::Value,
        workspace: &Workspace,
    ) -> PolicyDecision {
        let Some(path) = guardrails::extract_path(input) else {
            if tool == "bash" || tool == "run_shell_command" {
                if !workspace.network_allowed {
                    if let Some(command) = input.get("command").and_then(|v| v.as_str()) {
                        if references_network(command) {
                            return PolicyDecision::Deny("network access not permitted for this workspace".to_string());
                        }
                    }
                }
            }
            return PolicyDecision::Allow;
        };

        let resolved = PathBuf::from(&path);
        if !guardrails::is_within(&resolved, &workspace.path, &workspace.allowed_paths) {
            return PolicyDecision::Deny(format!("{path} is outside the workspace"));
        }

        if matches!(tool, "write" | "edit" | "delete") && guardrails::touches_protected_root(Path::new(&path)) {
            return PolicyDecision::Deny(format!("{path} is a protected system path"));
        }

        PolicyDecision::Allow
    }

    /// Layer 3: attenuate by the channel a message arrived on, if any.
    fn check_context_restrictions(&self, tool: &str, channel_context: Option<ChannelContext>) -> PolicyDecision {
        match channel_context {
            None | Some(ChannelContext::Private) => PolicyDecision::Allow,
            Some(ChannelContext::Group) => match classify(tool) {
                ToolRisk::Destructive | ToolRisk::System => {
                    PolicyDecision::RequireApproval("destructive tool invoked from a group channel".to_string())
                }
                _ => PolicyDecision::Allow,
            },
            Some(ChannelContext::Public) => match classify(tool) {
                ToolRisk::ReadOnly => PolicyDecision::Allow,
                _ => PolicyDecision::Deny("only read-only tools are permitted from public channels".to_string()),
            },
        }
    }

    /// Layer 4: the tool's own static risk level.
    fn check_tool_risk(&self, tool: &str, input: &serde_json::Value) -> PolicyDecision {
        match classify(tool) {
            ToolRisk::ReadOnly => PolicyDecision::Allow,
            ToolRisk::Write => PolicyDecision::Allow,
            ToolRisk::Destructive => {
                PolicyDecision::RequireApproval(format!("{tool} is destructive and requires approval"))
            }
            ToolRisk::System => PolicyDecision::RequireApproval(format!("{tool} affects the host system")),
            ToolRisk::Network => {
                if input.get("url").and_then(|v| v.as_str()).map(is_local_address).unwrap_or(false) {
                    PolicyDecision::Deny("refusing to target a local/loopback address".to_string())
                } else {
                    PolicyDecision::Allow
                }
            }
        }
    }
}

fn classify(tool: &str) -> ToolRisk {
    match tool {
        "read" | "glob" | "grep" => ToolRisk::ReadOnly,
        "write" | "edit" => ToolRisk::Write,
        "delete" | "bulk_rename" => ToolRisk::Destructive,
        "bash" | "run_shell_command" => ToolRisk::System,
        "web_fetch" | "web_request" => ToolRisk::Network,
        _ => ToolRisk::Write,
    }
}

fn references_network(command: &str) -> bool {
    let lower = command.to_lowercase();
    ["curl", "wget", "nc ", "ssh ", "scp ", "rsync"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn is_local_address(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains("127.0.0.1") || lower.contains("localhost") || lower.contains("169.254.") || lower.contains("::1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use cowork_core::WorkspaceId;

    fn workspace() -> Workspace {
        Workspace {
            id: WorkspaceId::new("w1"),
            name: "demo".into(),
            path: PathBuf::from("/workspace"),
            allowed_paths: vec![],
            network_allowed: false,
            created_at: Utc::now(),
            last_used_at: Utc::now(),
        }
    }

    fn manager() -> PolicyManager {
        PolicyManager::new(PolicyConfig::default())
    }

    #[test]
    fn allows_read_within_workspace() {
        let ws = workspace();
        let ctx = PolicyContext { workspace: &ws, channel_context: None };
        let input = serde_json::json!({"file_path": "/workspace/src/main.rs"});
        assert_eq!(manager().decide("read", &input, &ctx), PolicyDecision::Allow);
    }

    #[test]
    fn denies_path_outside_workspace() {
        let ws = workspace();
        let ctx = PolicyContext { workspace: &ws, channel_context: None };
        let input = serde_json::json!({"file_path": "/etc/shadow"});
        assert!(matches!(manager().decide("read", &input, &ctx), PolicyDecision::Deny(_)));
    }

    #[test]
    fn denies_traversal_before_containment_check() {
        let ws = workspace();
        let ctx = PolicyContext { workspace: &ws, channel_context: None };
        let input = serde_json::json!({"file_path": "/workspace/../etc/shadow"});
        assert!(matches!(manager().decide("read", &input, &ctx), PolicyDecision::Deny(_)));
    }

    #[test]
    fn denies_fork_bomb() {
        let ws = workspace();
        let ctx = PolicyContext { workspace: &ws, channel_context: None };
        let input = serde_json::json!({"command": ":(){ :|:& };:"});
        assert!(matches!(manager().decide("bash", &input, &ctx), PolicyDecision::Deny(_)));
    }

    #[test]
    fn denies_rm_rf_root() {
        let ws = workspace();
        let ctx = PolicyContext { workspace: &ws, channel_context: None };
        let input = serde_json::json!({"command": "rm -rf /"});
        assert!(matches!(manager().decide("bash", &input, &ctx), PolicyDecision::Deny(_)));
    }

    #[test]
    fn delete_requires_approval_in_private_context() {
        let ws = workspace();
        let ctx = PolicyContext { workspace: &ws, channel_context: None };
        let input = serde_json::json!({"file_path": "/workspace/old.txt"});
        assert!(matches!(
            manager().decide("delete", &input, &ctx),
            PolicyDecision::RequireApproval(_)
        ));
    }

    #[test]
    fn public_channel_denies_non_read_only_tools() {
        let ws = workspace();
        let ctx = PolicyContext { workspace: &ws, channel_context: Some(ChannelContext::Public) };
        let input = serde_json::json!({"file_path": "/workspace/a.txt", "content": "x"});
        assert!(matches!(manager().decide("write", &input, &ctx), PolicyDecision::Deny(_)));
    }

    #[test]
    fn public_channel_allows_read() {
        let ws = workspace();
        let ctx = PolicyContext { workspace: &ws, channel_context: Some(ChannelContext::Public) };
        let input = serde_json::json!({"file_path": "/workspace/a.txt"});
        assert_eq!(manager().decide("read", &input, &ctx), PolicyDecision::Allow);
    }

    #[test]
    fn network_disallowed_denies_bash_curl() {
        let ws = workspace();
        let ctx = PolicyContext { workspace: &ws, channel_context: None };
        let input = serde_json::json!({"command": "curl https://example.com"});
        assert!(matches!(manager().decide("bash", &input, &ctx), PolicyDecision::Deny(_)));
    }

    #[test]
    fn web_fetch_denies_loopback_targets() {
        let ws = workspace();
        let ctx = PolicyContext { workspace: &ws, channel_context: None };
        let input = serde_json::json!({"url": "http://127.0.0.1:9000/admin"});
        assert!(matches!(manager().decide("web_fetch", &input, &ctx), PolicyDecision::Deny(_)));
    }
}
