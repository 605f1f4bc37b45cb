//! Per-task conversation state: message history, system prompt, and model
//! override. One [`Conversation`] backs exactly one [`cowork_core::Task`];
//! the [`crate::executor::TaskExecutor`] is the only thing that mutates it.

use crate::context::ContextManager;
use cowork_core::TaskId;
use cowork_llm::{ContentBlock, LlmContent, LlmMessage};
use tokio::sync::RwLock;

pub struct Conversation {
    pub task_id: TaskId,
    system_prompt: RwLock<Option<String>>,
    messages: RwLock<Vec<LlmMessage>>,
    context: RwLock<ContextManager>,
    model: RwLock<Option<String>>,
}

impl Conversation {
    pub fn new(task_id: TaskId, system_prompt: Option<&str>, max_context_tokens: usize) -> Self {
        let mut context = ContextManager::new(max_context_tokens);
        if let Some(sys) = system_prompt {
            context.set_system(sys);
        }
        Self {
            task_id,
            system_prompt: RwLock::new(system_prompt.map(String::from)),
            messages: RwLock::new(Vec::new()),
            context: RwLock::new(context),
            model: RwLock::new(None),
        }
    }

    pub async fn system_prompt(&self) -> Option<String> {
        self.system_prompt.read().await.clone()
    }

    pub async fn set_system_prompt(&self, prompt: &str) {
        *self.system_prompt.write().await = Some(prompt.to_string());
        self.context.write().await.set_system(prompt);
    }

    /// Append a user message. Returns the estimated token total afterward,
    /// so the caller can decide whether to sleep instead of compacting.
    pub async fn add_user_message(&self, content: &str) -> usize {
        let message = LlmMessage { role: "user".to_string(), content: LlmContent::Text(content.to_string()) };
        let mut messages = self.messages.write().await;
        messages.push(message);
        self.context.read().await.calculate_total(&messages)
    }

    pub async fn add_assistant_text(&self, content: &str) {
        let message = LlmMessage { role: "assistant".to_string(), content: LlmContent::Text(content.to_string()) };
        self.messages.write().await.push(message);
    }

    pub async fn add_assistant_with_tools(&self, text: Option<&str>, tool_calls: Vec<ContentBlock>) {
        let mut blocks = Vec::new();
        if let Some(t) = text {
            if !t.is_empty() {
                blocks.push(ContentBlock::Text { text: t.to_string() });
            }
        }
        blocks.extend(tool_calls);
        let message = LlmMessage { role: "assistant".to_string(), content: LlmContent::Blocks(blocks) };
        self.messages.write().await.push(message);
    }

    /// Append a tool result. Anthropic requires all `tool_result` blocks for
    /// a turn in a single user message, so this appends to the trailing
    /// user/tool_result message instead of opening a new one.
    pub async fn add_tool_result(&self, tool_use_id: &str, content: &str, is_error: bool) {
        let block = ContentBlock::ToolResult {
            tool_use_id: tool_use_id.to_string(),
            content: content.to_string(),
            is_error: if is_error { Some(true) } else { None },
        };

        let mut messages = self.messages.write().await;
        let appended = if let Some(last) = messages.last_mut() {
            if last.role == "user" {
                if let LlmContent::Blocks(ref mut blocks) = last.content {
                    if blocks.iter().any(|b| matches!(b, ContentBlock::ToolResult { .. })) {
                        blocks.push(block.clone());
                        true
                    } else {
                        false
                    }
                } else {
                    false
                }
            } else {
                false
            }
        } else {
            false
        };

        if !appended {
            messages.push(LlmMessage { role: "user".to_string(), content: LlmContent::Blocks(vec![block]) });
        }
    }

    pub async fn get_messages(&self) -> Vec<LlmMessage> {
        self.messages.read().await.clone()
    }

    pub async fn message_count(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn token_count(&self) -> usize {
        let messages = self.messages.read().await;
        self.context.read().await.calculate_total(&messages)
    }

    pub async fn compact(&self) {
        let mut messages = self.messages.write().await;
        self.context.read().await.compact(&mut messages);
    }

    pub async fn model(&self) -> Option<String> {
        self.model.read().await.clone()
    }

    pub async fn set_model(&self, model: &str) {
        *self.model.write().await = Some(model.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> Conversation {
        Conversation::new(TaskId::new("t1"), None, 128_000)
    }

    #[tokio::test]
    async fn adds_and_reads_messages() {
        let c = conv();
        c.add_user_message("hi").await;
        assert_eq!(c.message_count().await, 1);
        assert_eq!(c.get_messages().await[0].role, "user");
    }

    #[tokio::test]
    async fn collects_tool_results_into_one_message() {
        let c = conv();
        c.add_assistant_with_tools(
            None,
            vec![
                ContentBlock::ToolUse { id: "a".into(), name: "bash".into(), input: serde_json::json!({}) },
                ContentBlock::ToolUse { id: "b".into(), name: "read".into(), input: serde_json::json!({}) },
            ],
        )
        .await;
        c.add_tool_result("a", "out a", false).await;
        c.add_tool_result("b", "out b", true).await;

        let messages = c.get_messages().await;
        let user_msgs: Vec<_> = messages.iter().filter(|m| m.role == "user").collect();
        assert_eq!(user_msgs.len(), 1);
        if let LlmContent::Blocks(blocks) = &user_msgs[0].content {
            assert_eq!(blocks.iter().filter(|b| matches!(b, ContentBlock::ToolResult { .. })).count(), 2);
        } else {
            panic!("expected blocks");
        }
    }

    #[tokio::test]
    async fn system_prompt_round_trips() {
        let c = Conversation::new(TaskId::new("t1"), Some("be helpful"), 128_000);
        assert_eq!(c.system_prompt().await, Some("be helpful".into()));
        c.set_system_prompt("be concise").await;
        assert_eq!(c.system_prompt().await, Some("be concise".into()));
    }
}
