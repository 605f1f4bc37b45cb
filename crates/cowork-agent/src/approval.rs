//! Approval Gate — suspends a gated tool call until a human responds, or the
//! request's TTL elapses. The rendezvous is the teacher's single-slot
//! `mpsc::channel(1)` abort signal generalized from "fire one signal" to "a
//! keyed map of resolvable-with-a-value channels": one `oneshot` per
//! outstanding [`Approval`].

use cowork_core::{Approval, ApprovalId, ApprovalStatus, TaskId};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::info;

const DEFAULT_TTL_SECS: u64 = 600;

pub struct ApprovalGate {
    pending: DashMap<ApprovalId, Approval>,
    waiters: DashMap<ApprovalId, oneshot::Sender<bool>>,
    ttl: Duration,
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TTL_SECS))
    }
}

impl ApprovalGate {
    pub fn new(ttl: Duration) -> Self {
        Self { pending: DashMap::new(), waiters: DashMap::new(), ttl }
    }

    /// Create a pending approval and block until it is resolved or the TTL
    /// elapses. Returns `true` only if a human explicitly approved it.
    pub async fn request(&self, task_id: &TaskId, tool_name: &str, input: &Value, reason: &str) -> bool {
        let id = ApprovalId::generate();
        let now = chrono::Utc::now();
        let approval = Approval {
            id: id.clone(),
            task_id: task_id.clone(),
            tool_name: tool_name.to_string(),
            input: input.clone(),
            reason: reason.to_string(),
            status: ApprovalStatus::Pending,
            created_at: now,
            expires_at: now + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::seconds(600)),
            resolved_at: None,
        };
        self.pending.insert(id.clone(), approval);

        let (tx, rx) = oneshot::channel();
        self.waiters.insert(id.clone(), tx);

        info!(approval_id = %id, tool = tool_name, reason, "approval requested");

        let outcome = tokio::select! {
            biased;
            result = rx => result.unwrap_or(false),
            _ = tokio::time::sleep(self.ttl) => {
                self.waiters.remove(&id);
                self.mark(&id, ApprovalStatus::Expired);
                false
            }
        };
        outcome
    }

    /// Resolve a pending approval. A second call for the same id is a no-op
    /// — it does not re-notify the (already gone) waiter, matching "duplicate
    /// responses are no-ops".
    pub fn respond(&self, id: &ApprovalId, approve: bool) -> Result<(), String> {
        match self.waiters.remove(id) {
            Some((_, tx)) => {
                self.mark(id, if approve { ApprovalStatus::Approved } else { ApprovalStatus::Denied });
                let _ = tx.send(approve);
                Ok(())
            }
            None => {
                if self.pending.contains_key(id) {
                    Ok(()) // already resolved or expired; no-op
                } else {
                    Err(format!("approval '{id}' not found"))
                }
            }
        }
    }

    fn mark(&self, id: &ApprovalId, status: ApprovalStatus) {
        if let Some(mut entry) = self.pending.get_mut(id) {
            entry.status = status;
            entry.resolved_at = Some(chrono::Utc::now());
        }
    }

    pub fn get(&self, id: &ApprovalId) -> Option<Approval> {
        self.pending.get(id).map(|e| e.clone())
    }

    pub fn list_pending(&self) -> Vec<Approval> {
        self.pending.iter().filter(|e| e.status == ApprovalStatus::Pending).map(|e| e.clone()).collect()
    }
}

/// Adapts [`ApprovalGate`] to [`cowork_tools::ApprovalSink`] for one task —
/// the trait itself carries no task identity, so each task's dispatch loop
/// gets its own thin sink bound to its `TaskId`.
pub struct TaskApprovalSink {
    pub task_id: TaskId,
    pub gate: Arc<ApprovalGate>,
}

#[async_trait::async_trait]
impl cowork_tools::ApprovalSink for TaskApprovalSink {
    async fn request_approval(&self, tool_name: &str, input: &Value, reason: &str) -> bool {
        self.gate.request(&self.task_id, tool_name, input, reason).await
    }
}
