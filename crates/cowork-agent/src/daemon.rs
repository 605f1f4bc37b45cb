//! Agent Daemon — the task tree. Generalizes the teacher's `SessionRegistry`
//! (`DashMap<SessionKey, Arc<Session>>`, one entry per conversation) into one
//! `Task` record plus a broadcast event channel per task, and the teacher's
//! `spawn_child` parent/child bookkeeping into an explicit depth-capped tree
//! used to enforce the descendant-only control invariant.

use cowork_core::{Task, TaskEvent, TaskId, TaskStatus, WorkspaceId};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Sub-agent nesting beyond this depth is refused at spawn time.
pub const MAX_TASK_DEPTH: u32 = 8;

/// Event channel capacity per task before a slow subscriber starts lagging
/// and receives a synthetic gap marker instead of silently missing events.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

struct TaskHandle {
    task: Mutex<Task>,
    events: broadcast::Sender<TaskEvent>,
    seq: AtomicU64,
    children: Mutex<Vec<TaskId>>,
}

pub struct AgentDaemon {
    tasks: DashMap<TaskId, Arc<TaskHandle>>,
    last_output: DashMap<TaskId, String>,
}

impl Default for AgentDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentDaemon {
    pub fn new() -> Self {
        Self { tasks: DashMap::new(), last_output: DashMap::new() }
    }

    /// Register a new top-level task.
    pub fn create_task(&self, workspace_id: WorkspaceId, prompt: impl Into<String>, model: impl Into<String>) -> Task {
        self.create_child_task(workspace_id, prompt, model, None)
    }

    /// Register a task, optionally as a child of `parent_task_id`.
    pub fn create_child_task(
        &self,
        workspace_id: WorkspaceId,
        prompt: impl Into<String>,
        model: impl Into<String>,
        parent_task_id: Option<TaskId>,
    ) -> Task {
        let depth = match &parent_task_id {
            Some(parent) => self.depth_of(parent) + 1,
            None => 0,
        };
        let now = chrono::Utc::now();
        let task = Task {
            id: TaskId::generate(),
            workspace_id,
            parent_task_id: parent_task_id.clone(),
            depth,
            status: TaskStatus::Idle,
            prompt: prompt.into(),
            model: model.into(),
            fail_reason: None,
            created_at: now,
            updated_at: now,
        };

        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        self.tasks.insert(
            task.id.clone(),
            Arc::new(TaskHandle { task: Mutex::new(task.clone()), events: tx, seq: AtomicU64::new(0), children: Mutex::new(Vec::new()) }),
        );

        if let Some(parent) = &parent_task_id {
            if let Some(handle) = self.tasks.get(parent) {
                handle.children.lock().unwrap().push(task.id.clone());
            }
        }

        info!(task_id = %task.id, depth, parent = ?parent_task_id, "task created");
        task
    }

    fn depth_of(&self, task_id: &TaskId) -> u32 {
        self.tasks.get(task_id).map(|h| h.task.lock().unwrap().depth).unwrap_or(0)
    }

    /// `true` when spawning one more level under `task_id` would exceed
    /// [`MAX_TASK_DEPTH`].
    pub fn at_max_depth(&self, task_id: &TaskId) -> bool {
        self.depth_of(task_id) + 1 > MAX_TASK_DEPTH
    }

    pub fn get(&self, task_id: &TaskId) -> Option<Task> {
        Some(self.tasks.get(task_id)?.task.lock().unwrap().clone())
    }

    pub fn set_status(&self, task_id: &TaskId, status: TaskStatus, fail_reason: Option<String>) {
        if let Some(handle) = self.tasks.get(task_id) {
            let mut task = handle.task.lock().unwrap();
            task.status = status;
            task.updated_at = chrono::Utc::now();
            if fail_reason.is_some() {
                task.fail_reason = fail_reason;
            }
        }
    }

    pub fn set_last_output(&self, task_id: &TaskId, output: impl Into<String>) {
        self.last_output.insert(task_id.clone(), output.into());
    }

    /// Publish an event on the task's channel, stamping it with the next
    /// sequence number. Returns the stamped event for the caller to persist.
    pub fn publish(&self, task_id: &TaskId, kind: impl Into<String>, payload: serde_json::Value) -> Option<TaskEvent> {
        let handle = self.tasks.get(task_id)?.clone();
        let seq = handle.seq.fetch_add(1, Ordering::SeqCst);
        let event = TaskEvent { task_id: task_id.clone(), seq, ts: chrono::Utc::now(), kind: kind.into(), payload };
        let _ = handle.events.send(event.clone());
        Some(event)
    }

    pub fn subscribe(&self, task_id: &TaskId) -> Option<broadcast::Receiver<TaskEvent>> {
        Some(self.tasks.get(task_id)?.events.subscribe())
    }

    /// `true` if `task_id` is a transitive descendant of `ancestor`.
    pub fn is_descendant(&self, ancestor: &TaskId, task_id: &TaskId) -> bool {
        let mut current = self.tasks.get(task_id).and_then(|h| h.task.lock().unwrap().parent_task_id.clone());
        while let Some(id) = current {
            if &id == ancestor {
                return true;
            }
            current = self.tasks.get(&id).and_then(|h| h.task.lock().unwrap().parent_task_id.clone());
        }
        false
    }

    pub fn children_of(&self, task_id: &TaskId) -> Vec<Task> {
        let Some(handle) = self.tasks.get(task_id) else { return Vec::new() };
        let children = handle.children.lock().unwrap().clone();
        children.into_iter().filter_map(|child| self.get(&child)).collect()
    }

    /// Publish a `wake` event on every task currently `Idle` (the state a
    /// task parks in after sleeping for context-budget reasons), returning
    /// how many tasks were woken. Backs the Webhook server's `/wake`
    /// endpoint, which has no single task in mind.
    pub fn wake_idle_tasks(&self, payload: serde_json::Value) -> usize {
        let idle: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|e| matches!(e.value().task.lock().unwrap().status, TaskStatus::Idle))
            .map(|e| e.key().clone())
            .collect();
        for task_id in &idle {
            self.publish(task_id, "wake", payload.clone());
        }
        idle.len()
    }

    pub fn cancel(&self, task_id: &TaskId) -> Option<()> {
        let handle = self.tasks.get(task_id)?;
        let mut task = handle.task.lock().unwrap();
        if !matches!(task.status, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled) {
            task.status = TaskStatus::Cancelled;
            task.updated_at = chrono::Utc::now();
        }
        Some(())
    }
}

fn snapshot_to_task_snapshot(task: &Task, last_output: &str) -> cowork_tools::TaskSnapshot {
    cowork_tools::TaskSnapshot {
        task_id: task.id.as_str().to_string(),
        status: format!("{:?}", task.status),
        prompt: task.prompt.clone(),
        last_output: last_output.to_string(),
    }
}

#[async_trait::async_trait]
impl cowork_tools::TaskControl for AgentDaemon {
    fn is_descendant(&self, ancestor: &str, task_id: &str) -> bool {
        AgentDaemon::is_descendant(self, &TaskId::new(ancestor), &TaskId::new(task_id))
    }

    fn list_descendants(&self, of: &str) -> Vec<cowork_tools::TaskSnapshot> {
        let of = TaskId::new(of);
        self.tasks
            .iter()
            .filter(|e| AgentDaemon::is_descendant(self, &of, e.key()))
            .map(|e| {
                let task = e.value().task.lock().unwrap();
                let last_output = self.last_output.get(e.key()).map(|s| s.clone()).unwrap_or_default();
                snapshot_to_task_snapshot(&task, &last_output)
            })
            .collect()
    }

    fn query(&self, task_id: &str) -> Result<cowork_tools::TaskSnapshot, String> {
        let id = TaskId::new(task_id);
        let handle = self.tasks.get(&id).ok_or_else(|| format!("task '{task_id}' not found"))?;
        let task = handle.task.lock().unwrap();
        let last_output = self.last_output.get(&id).map(|s| s.clone()).unwrap_or_default();
        Ok(snapshot_to_task_snapshot(&task, &last_output))
    }

    async fn send_message(&self, task_id: &str, message: &str) -> Result<(), String> {
        let id = TaskId::new(task_id);
        self.publish(&id, "user_message", serde_json::json!({ "message": message }))
            .ok_or_else(|| format!("task '{task_id}' not found"))?;
        Ok(())
    }

    async fn wait_for_completion(&self, task_id: &str, timeout_secs: u64) -> Result<cowork_tools::TaskSnapshot, String> {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(timeout_secs);
        loop {
            let snapshot = self.query(task_id)?;
            if matches!(snapshot.status.as_str(), "Completed" | "Failed" | "Cancelled") {
                return Ok(snapshot);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(format!("timed out waiting for '{task_id}'"));
            }
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
    }

    fn cancel(&self, task_id: &str) -> Result<(), String> {
        AgentDaemon::cancel(self, &TaskId::new(task_id)).ok_or_else(|| format!("task '{task_id}' not found"))
    }
}

/// Converts a `broadcast::Receiver<TaskEvent>`'s `Lagged` error into the
/// synthetic gap marker defined on `TaskEvent`, instead of dropping it on the
/// floor the way the teacher's gateway loop does today.
pub async fn recv_or_gap(task_id: &TaskId, rx: &mut broadcast::Receiver<TaskEvent>) -> Option<TaskEvent> {
    match rx.recv().await {
        Ok(event) => Some(event),
        Err(broadcast::error::RecvError::Lagged(n)) => {
            warn!(task_id = %task_id, dropped = n, "subscriber lagged, emitting gap marker");
            Some(TaskEvent::gap(task_id.clone(), 0, n))
        }
        Err(broadcast::error::RecvError::Closed) => None,
    }
}
