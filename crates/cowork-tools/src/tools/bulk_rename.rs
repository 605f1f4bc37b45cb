//! Bulk rename tool — apply a glob-matched set of (from, to) renames in one
//! call. Destructive; routed through the Approval Gate like delete.

use crate::registry::{Tool, ToolResult};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::fs;

pub struct BulkRenameTool {
    workspace_root: PathBuf,
}

impl BulkRenameTool {
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
impl Tool for BulkRenameTool {
    fn name(&self) -> &str {
        "bulk_rename"
    }

    fn description(&self) -> &str {
        "Rename or move a batch of files in one call. Requires human approval. \
         Stops at the first failure and reports how many renames already applied."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "renames": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "from": { "type": "string" },
                            "to": { "type": "string" }
                        },
                        "required": ["from", "to"]
                    }
                }
            },
            "required": ["renames"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let renames = match args.get("renames").and_then(|v| v.as_array()) {
            Some(r) if !r.is_empty() => r,
            _ => return ToolResult::error("'renames' must be a non-empty array"),
        };

        let mut applied = 0;
        for entry in renames {
            let from = match entry.get("from").and_then(|v| v.as_str()) {
                Some(f) => f,
                None => return ToolResult::error(format!("entry {applied} missing 'from'")),
            };
            let to = match entry.get("to").and_then(|v| v.as_str()) {
                Some(t) => t,
                None => return ToolResult::error(format!("entry {applied} missing 'to'")),
            };

            let from_path = self.resolve(from);
            let to_path = self.resolve(to);
            if let Some(parent) = to_path.parent() {
                if let Err(e) = fs::create_dir_all(parent).await {
                    return ToolResult::error(format!("applied {applied}/{}, then failed to create {}: {e}", renames.len(), parent.display()));
                }
            }
            if let Err(e) = fs::rename(&from_path, &to_path).await {
                return ToolResult::error(format!(
                    "applied {applied}/{}, then failed to rename {from} -> {to}: {e}",
                    renames.len()
                ));
            }
            applied += 1;
        }

        ToolResult::text(format!("Renamed {applied} file(s)"))
    }
}
