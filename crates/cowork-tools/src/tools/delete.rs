//! Delete tool — remove a file or directory. Destructive; the Policy
//! Manager routes every call through the Approval Gate before it reaches here.

use crate::registry::{Tool, ToolResult};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

pub struct DeleteTool {
    workspace_root: PathBuf,
}

impl DeleteTool {
    pub fn new(workspace_root: impl AsRef<Path>) -> Self {
        Self { workspace_root: workspace_root.as_ref().to_path_buf() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.workspace_root.join(path)
        }
    }
}

#[async_trait::async_trait]
impl Tool for DeleteTool {
    fn name(&self) -> &str {
        "delete"
    }

    fn description(&self) -> &str {
        "Delete a file or directory (recursively). Requires human approval."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": { "type": "string", "description": "Path to delete" },
                "recursive": { "type": "boolean", "description": "Delete a non-empty directory (default false)" }
            },
            "required": ["file_path"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let path = match args.get("file_path").or(args.get("path")).and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolResult::error("Missing required parameter: file_path"),
        };
        let recursive = args.get("recursive").and_then(|v| v.as_bool()).unwrap_or(false);
        let full_path = self.resolve(path);

        let metadata = match fs::metadata(&full_path).await {
            Ok(m) => m,
            Err(e) => return ToolResult::error(format!("Failed to stat {path}: {e}")),
        };

        let result = if metadata.is_dir() {
            if recursive {
                fs::remove_dir_all(&full_path).await
            } else {
                fs::remove_dir(&full_path).await
            }
        } else {
            fs::remove_file(&full_path).await
        };

        match result {
            Ok(()) => {
                debug!("delete: {}", path);
                ToolResult::text(format!("Deleted {path}"))
            }
            Err(e) => ToolResult::error(format!("Failed to delete {path}: {e}")),
        }
    }
}
