//! Integration tests: ContextManager token accounting plus a real-API
//! exercise of the full turn loop (TaskExecutor + Conversation + AgentDaemon).

use cowork_agent::{AgentDaemon, ApprovalGate, ContextManager, Conversation, ExecutorConfig, TaskExecutor};
use cowork_core::{TaskStatus, Workspace, WorkspaceId};
use cowork_llm::{AnthropicProvider, ContentBlock, LlmContent, LlmMessage};
use cowork_policy::PolicyManager;
use cowork_store::EventLog;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// ===========================================================================
// ContextManager
// ===========================================================================

#[test]
fn context_manager_estimate_tokens() {
    assert_eq!(ContextManager::estimate_tokens(""), 0);
    assert_eq!(ContextManager::estimate_tokens("hi"), 1);
    assert_eq!(ContextManager::estimate_tokens("hello"), 2);
    assert_eq!(ContextManager::estimate_tokens("hello world"), 3);
}

#[test]
fn context_manager_message_tokens_blocks() {
    let msg = LlmMessage {
        role: "assistant".into(),
        content: LlmContent::Blocks(vec![
            ContentBlock::Text { text: "hi".into() },
            ContentBlock::ToolUse { id: "tc-1".into(), name: "read".into(), input: serde_json::json!({"path": "/tmp/foo"}) },
        ]),
    };
    let tokens = ContextManager::message_tokens(&msg);
    assert!(tokens > 10, "expected > 10 tokens, got {tokens}");
}

#[test]
fn context_manager_compact_removes_old_messages() {
    let cm = ContextManager::new(100);
    let mut messages: Vec<LlmMessage> = (0..50)
        .map(|i| LlmMessage { role: "user".into(), content: LlmContent::Text(format!("padding message {i} to use tokens")) })
        .collect();
    let before = messages.len();
    cm.compact(&mut messages);
    assert!(messages.len() < before);
    assert!(messages.len() >= 2);
}

// ===========================================================================
// TaskExecutor — real API integration
// ===========================================================================

fn load_api_key() -> Option<String> {
    let output = std::process::Command::new("bash").args(["-c", "source ~/.keys.sh 2>/dev/null && echo $ANTHROPIC_API_KEY"]).output().ok()?;
    let key = String::from_utf8(output.stdout).ok()?.trim().to_string();
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

fn test_workspace(path: PathBuf) -> Workspace {
    let now = chrono::Utc::now();
    Workspace { id: WorkspaceId::new("test-ws"), name: "test".into(), path, allowed_paths: vec![], network_allowed: false, created_at: now, last_used_at: now }
}

#[tokio::test]
async fn executor_simple_text_turn() {
    let api_key = match load_api_key() {
        Some(k) => k,
        None => {
            eprintln!("SKIP: no ANTHROPIC_API_KEY");
            return;
        }
    };

    let daemon = Arc::new(AgentDaemon::new());
    let task = daemon.create_task(WorkspaceId::new("test-ws"), "ping", "claude-haiku-4-5-20251001");
    let dir = tempfile::tempdir().unwrap();
    let executor = TaskExecutor::new(
        Arc::new(AnthropicProvider::new(&api_key)),
        Arc::new(cowork_tools::ToolRegistry::new()),
        Arc::new(PolicyManager::new(Default::default())),
        Arc::new(ApprovalGate::default()),
        daemon.clone(),
        Arc::new(EventLog::new(dir.path())),
        ExecutorConfig { default_model: "claude-haiku-4-5-20251001".into(), max_tool_iterations: 5, sleep_threshold_pct: 1.0, max_tokens: 1024 },
    );

    let conversation = Conversation::new(task.id.clone(), Some("Reply with exactly the word 'pong' and nothing else."), 200_000);
    let ws = test_workspace(std::env::temp_dir());

    let result = executor.run_turn(&task.id, &conversation, &ws, None, "ping", CancellationToken::new()).await;
    assert!(result.is_ok(), "run_turn failed: {result:?}");

    assert_eq!(daemon.get(&task.id).unwrap().status, TaskStatus::Completed);
    let messages = conversation.get_messages().await;
    assert!(messages.len() >= 2);
    let reply = messages.last().unwrap();
    if let LlmContent::Text(text) = &reply.content {
        assert!(text.to_lowercase().contains("pong"), "expected 'pong', got: {text}");
    }
}

#[tokio::test]
async fn executor_runs_a_tool_call_end_to_end() {
    let api_key = match load_api_key() {
        Some(k) => k,
        None => {
            eprintln!("SKIP: no ANTHROPIC_API_KEY");
            return;
        }
    };

    let ws_path = std::env::temp_dir().join("cowork-agent-executor-test");
    std::fs::create_dir_all(&ws_path).unwrap();
    std::fs::write(ws_path.join("secret.txt"), "The answer is 42.").unwrap();

    let daemon = Arc::new(AgentDaemon::new());
    let task = daemon.create_task(WorkspaceId::new("test-ws"), "read the secret", "claude-haiku-4-5-20251001");
    let dir = tempfile::tempdir().unwrap();
    let tools = cowork_tools::create_default_registry(&ws_path, false).await;
    let executor = TaskExecutor::new(
        Arc::new(AnthropicProvider::new(&api_key)),
        Arc::new(tools),
        Arc::new(PolicyManager::new(Default::default())),
        Arc::new(ApprovalGate::default()),
        daemon.clone(),
        Arc::new(EventLog::new(dir.path())),
        ExecutorConfig { default_model: "claude-haiku-4-5-20251001".into(), max_tool_iterations: 5, sleep_threshold_pct: 1.0, max_tokens: 2048 },
    );

    let conversation = Conversation::new(task.id.clone(), Some("You have access to tools. Use the read tool to read files when asked."), 200_000);
    let ws = test_workspace(ws_path.clone());

    let result = executor.run_turn(&task.id, &conversation, &ws, None, "Read secret.txt and tell me what it says.", CancellationToken::new()).await;
    assert!(result.is_ok(), "run_turn failed: {result:?}");
    assert_eq!(daemon.get(&task.id).unwrap().status, TaskStatus::Completed);

    let events = EventLog::new(dir.path()).replay(&task.id).unwrap();
    assert!(events.iter().any(|e| e.kind == "tool_result" && e.payload.get("result").and_then(|v| v.as_str()).unwrap_or("").contains("42")));

    let _ = std::fs::remove_dir_all(&ws_path);
}
