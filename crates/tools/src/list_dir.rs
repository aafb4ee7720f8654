//! `list_directory`: list entries of a workspace directory.

use async_trait::async_trait;
use cronbot_core::error::ToolError;
use cronbot_core::tool::{Tool, ToolResult};
use std::path::PathBuf;

pub struct ListDirectoryTool {
    workspace: PathBuf,
}

impl ListDirectoryTool {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List files and directories. Directories are suffixed with '/'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list, relative to the workspace (default: workspace root)"
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = arguments["path"].as_str().unwrap_or(".");
        let resolved = cronbot_security::resolve_in_workspace(&self.workspace, path).map_err(
            |e| ToolError::PermissionDenied {
                tool_name: self.name().into(),
                reason: e.to_string(),
            },
        )?;

        let mut read_dir = match tokio::fs::read_dir(&resolved).await {
            Ok(rd) => rd,
            Err(e) => return Ok(ToolResult::failed(format!("Failed to list directory: {e}"))),
        };

        let mut names = Vec::new();
        loop {
            match read_dir.next_entry().await {
                Ok(Some(entry)) => {
                    let mut name = entry.file_name().to_string_lossy().into_owned();
                    if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                        name.push('/');
                    }
                    names.push(name);
                }
                Ok(None) => break,
                Err(e) => {
                    return Ok(ToolResult::failed(format!("Failed to list directory: {e}")));
                }
            }
        }
        names.sort();

        Ok(ToolResult::ok(names.join("\n")).with_data(serde_json::json!({ "entries": names })))
    }
}
