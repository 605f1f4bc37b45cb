//! Append-only, per-task NDJSON event log: one `TaskEvent` per line.

use cowork_core::{TaskEvent, TaskId};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::settings::StoreError;

pub struct EventLog {
    root: PathBuf,
}

impl EventLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, task_id: &TaskId) -> PathBuf {
        self.root.join(format!("{}.ndjson", task_id.as_str()))
    }

    /// Append one event. The file is opened in append mode and each write is
    /// a single `write_all` of a line, so concurrent single-line appends from
    /// different tasks never interleave mid-line.
    pub fn append(&self, event: &TaskEvent) -> Result<(), StoreError> {
        let path = self.path_for(&event.task_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Replay every event recorded for a task, in append order.
    pub fn replay(&self, task_id: &TaskId) -> Result<Vec<TaskEvent>, StoreError> {
        let path = self.path_for(task_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(path)?);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }

    pub fn log_dir(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cowork_core::TaskId;

    fn sample_event(task_id: &TaskId, seq: u64) -> TaskEvent {
        TaskEvent {
            task_id: task_id.clone(),
            seq,
            ts: chrono::Utc::now(),
            kind: "message".to_string(),
            payload: serde_json::json!({ "text": format!("event {seq}") }),
        }
    }

    #[test]
    fn appends_and_replays_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path());
        let task_id = TaskId::generate();

        for seq in 0..5 {
            log.append(&sample_event(&task_id, seq)).unwrap();
        }

        let replayed = log.replay(&task_id).unwrap();
        assert_eq!(replayed.len(), 5);
        assert_eq!(replayed[0].seq, 0);
        assert_eq!(replayed[4].seq, 4);
    }

    #[test]
    fn replay_of_unknown_task_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path());
        let replayed = log.replay(&TaskId::generate()).unwrap();
        assert!(replayed.is_empty());
    }

    #[test]
    fn separate_tasks_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path());
        let a = TaskId::generate();
        let b = TaskId::generate();
        log.append(&sample_event(&a, 0)).unwrap();
        log.append(&sample_event(&b, 0)).unwrap();
        assert_eq!(log.replay(&a).unwrap().len(), 1);
        assert_eq!(log.replay(&b).unwrap().len(), 1);
    }
}
