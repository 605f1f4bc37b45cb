//! Task Executor — the agentic turn loop, generalized from the teacher's
//! single-session `run_turn_cancellable` into a state machine over a
//! [`cowork_core::Task`]: `idle -> preflight -> executing <-> awaiting_approval
//! -> executing <-> awaiting_user_input -> executing -> finalizing ->
//! {completed, failed, cancelled}`. Every transition and LLM/tool event is
//! published on the task's [`crate::daemon::AgentDaemon`] channel and
//! appended to its [`cowork_store::EventLog`].

use crate::approval::TaskApprovalSink;
use crate::conversation::Conversation;
use crate::daemon::AgentDaemon;
use cowork_core::{ChannelContext, TaskId, TaskStatus, Workspace};
use cowork_llm::{AccumulatedToolCall, ContentBlock, LlmProvider, LlmRequest, StreamDelta};
use cowork_policy::{PolicyContext, PolicyDecision, PolicyManager};
use cowork_store::EventLog;
use cowork_tools::ToolRegistry;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Context window assumed when deciding whether a task should sleep instead
/// of continuing. TODO: resolve this from the provider per model.
const ASSUMED_CONTEXT_WINDOW: usize = 200_000;

pub struct ExecutorConfig {
    pub default_model: String,
    pub max_tool_iterations: usize,
    pub sleep_threshold_pct: f64,
    pub max_tokens: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_model: "claude-sonnet-4-20250514".to_string(),
            max_tool_iterations: 25,
            sleep_threshold_pct: 0.55,
            max_tokens: 8192,
        }
    }
}

pub struct TaskExecutor {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    policy: Arc<PolicyManager>,
    approvals: Arc<crate::approval::ApprovalGate>,
    daemon: Arc<AgentDaemon>,
    event_log: Arc<EventLog>,
    config: ExecutorConfig,
}

impl TaskExecutor {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        policy: Arc<PolicyManager>,
        approvals: Arc<crate::approval::ApprovalGate>,
        daemon: Arc<AgentDaemon>,
        event_log: Arc<EventLog>,
        config: ExecutorConfig,
    ) -> Self {
        Self { provider, tools, policy, approvals, daemon, event_log, config }
    }

    fn publish(&self, task_id: &TaskId, kind: &str, payload: serde_json::Value) {
        if let Some(event) = self.daemon.publish(task_id, kind, payload) {
            if let Err(e) = self.event_log.append(&event) {
                warn!(task_id = %task_id, error = %e, "failed to persist task event");
            }
        }
    }

    fn set_status(&self, task_id: &TaskId, status: TaskStatus, fail_reason: Option<String>) {
        self.daemon.set_status(task_id, status, fail_reason.clone());
        self.publish(task_id, "status", serde_json::json!({ "status": format!("{status:?}"), "fail_reason": fail_reason }));
    }

    /// Drive one turn of a task to completion: feed `user_message` into its
    /// conversation and keep looping model calls and tool dispatches until
    /// the model stops asking for tools, the task is cancelled, or the
    /// iteration cap is hit.
    pub async fn run_turn(
        &self,
        task_id: &TaskId,
        conversation: &Conversation,
        workspace: &Workspace,
        channel_context: Option<ChannelContext>,
        user_message: &str,
        cancel: CancellationToken,
    ) -> Result<(), String> {
        self.set_status(task_id, TaskStatus::Preflight, None);

        let total_tokens = conversation.add_user_message(user_message).await;
        let budget = (ASSUMED_CONTEXT_WINDOW as f64 * self.config.sleep_threshold_pct) as usize;
        if total_tokens > budget {
            self.set_status(task_id, TaskStatus::Idle, None);
            self.publish(task_id, "sleep", serde_json::json!({ "token_count": total_tokens }));
            return Ok(());
        }

        let mut iterations = 0usize;
        let policy_ctx = PolicyContext { workspace, channel_context };
        let approval_sink = TaskApprovalSink { task_id: task_id.clone(), gate: self.approvals.clone() };

        loop {
            if cancel.is_cancelled() {
                return self.finish_cancelled(task_id, conversation).await;
            }

            iterations += 1;
            if iterations > self.config.max_tool_iterations {
                self.set_status(task_id, TaskStatus::Failed, Some("max tool iterations exceeded".to_string()));
                self.publish(task_id, "error", serde_json::json!({ "message": "max tool iterations exceeded" }));
                return Err("max tool iterations exceeded".to_string());
            }

            self.set_status(task_id, TaskStatus::Executing, None);

            let model = conversation.model().await.unwrap_or_else(|| self.config.default_model.clone());
            let request = LlmRequest {
                model,
                messages: conversation.get_messages().await,
                tools: Some(self.tools.get_definitions()),
                max_tokens: Some(self.config.max_tokens),
                system: conversation.system_prompt().await,
                ..Default::default()
            };

            let stream = match self.provider.complete_stream(request, Some(cancel.clone())).await {
                Ok(s) => s,
                Err(e) => {
                    self.set_status(task_id, TaskStatus::Failed, Some(e.to_string()));
                    self.publish(task_id, "error", serde_json::json!({ "message": e.to_string() }));
                    return Err(e.to_string());
                }
            };

            let mut text_content = String::new();
            let mut tool_calls: Vec<AccumulatedToolCall> = Vec::new();
            let mut current_tool: Option<AccumulatedToolCall> = None;
            let mut stop_reason = "end_turn".to_string();
            let mut cancelled = false;

            tokio::pin!(stream);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(task_id = %task_id, "stream cancelled");
                        cancelled = true;
                        break;
                    }
                    delta_opt = stream.next() => {
                        match delta_opt {
                            Some(Ok(delta)) => match delta {
                                StreamDelta::Text(text) => {
                                    text_content.push_str(&text);
                                    self.publish(task_id, "text", serde_json::json!({ "text": text }));
                                }
                                StreamDelta::Thinking(thinking) => {
                                    self.publish(task_id, "thinking", serde_json::json!({ "text": thinking }));
                                }
                                StreamDelta::ToolCallStart { id, name } => {
                                    current_tool = Some(AccumulatedToolCall { id: id.clone(), name: name.clone(), arguments: String::new() });
                                    self.publish(task_id, "tool_call_start", serde_json::json!({ "id": id, "name": name }));
                                }
                                StreamDelta::ToolCallDelta { id, arguments } => {
                                    if let Some(ref mut tool) = current_tool {
                                        tool.arguments.push_str(&arguments);
                                    }
                                    self.publish(task_id, "tool_call_delta", serde_json::json!({ "id": id, "arguments": arguments }));
                                }
                                StreamDelta::ToolCallEnd { id: _ } => {
                                    if let Some(tool) = current_tool.take() {
                                        tool_calls.push(tool);
                                    }
                                }
                                StreamDelta::Done { stop_reason: sr, .. } => {
                                    if let Some(r) = sr {
                                        stop_reason = format!("{r:?}");
                                    }
                                }
                                StreamDelta::Error(e) => {
                                    self.publish(task_id, "error", serde_json::json!({ "message": e }));
                                }
                            },
                            Some(Err(e)) => {
                                self.publish(task_id, "error", serde_json::json!({ "message": e.to_string() }));
                            }
                            None => break,
                        }
                    }
                }
            }

            if cancelled {
                if !text_content.is_empty() {
                    conversation.add_assistant_text(&text_content).await;
                }
                return self.finish_cancelled(task_id, conversation).await;
            }

            if tool_calls.is_empty() {
                conversation.add_assistant_text(&text_content).await;
                self.set_status(task_id, TaskStatus::Finalizing, None);
                self.set_status(task_id, TaskStatus::Completed, None);
                self.publish(task_id, "done", serde_json::json!({ "stop_reason": stop_reason }));
                self.daemon.set_last_output(task_id, text_content);
                return Ok(());
            }

            let blocks: Vec<ContentBlock> = tool_calls
                .iter()
                .map(|tc| ContentBlock::ToolUse { id: tc.id.clone(), name: tc.name.clone(), input: tc.parse_arguments().unwrap_or_default() })
                .collect();
            conversation
                .add_assistant_with_tools(if text_content.is_empty() { None } else { Some(&text_content) }, blocks)
                .await;

            for tc in tool_calls {
                if cancel.is_cancelled() {
                    return self.finish_cancelled(task_id, conversation).await;
                }

                let args = tc.parse_arguments().unwrap_or_default();
                if matches!(self.policy.decide(&tc.name, &args, &policy_ctx), PolicyDecision::RequireApproval(_)) {
                    self.set_status(task_id, TaskStatus::AwaitingApproval, None);
                }

                self.publish(task_id, "tool_executing", serde_json::json!({ "id": tc.id, "name": tc.name }));
                let result = self.tools.dispatch(&tc.name, args, cancel.clone(), &self.policy, &policy_ctx, &approval_sink).await;
                self.set_status(task_id, TaskStatus::Executing, None);

                let is_error = result.is_error();
                let result_str = result.to_content_string();
                let result_str = if result_str.len() > 50_000 {
                    format!("{}...\n[truncated, {} total chars]", &result_str[..50_000], result_str.len())
                } else {
                    result_str
                };
                self.publish(
                    task_id,
                    "tool_result",
                    serde_json::json!({ "id": tc.id, "name": tc.name, "result": result_str, "is_error": is_error }),
                );
                conversation.add_tool_result(&tc.id, &result_str, is_error).await;
            }

            if conversation.token_count().await > budget {
                conversation.compact().await;
            }

            info!(task_id = %task_id, iterations, "tool round complete, continuing");
        }
    }

    async fn finish_cancelled(&self, task_id: &TaskId, conversation: &Conversation) -> Result<(), String> {
        self.set_status(task_id, TaskStatus::Cancelled, None);
        self.publish(task_id, "done", serde_json::json!({ "stop_reason": "cancelled" }));
        let messages = conversation.message_count().await;
        info!(task_id = %task_id, messages, "turn cancelled");
        Ok(())
    }
}
