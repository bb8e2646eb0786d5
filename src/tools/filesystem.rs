//! Filesystem tool: scoped read/write/list under a configured root,
//! grounded on `tools/builtin/shell.rs`'s posture of wrapping OS
//! operations directly rather than through a sandboxed abstraction (the
//! tool-registry path is trusted-intranet, unlike the WASM host ABI's
//! `create_git_worktree`, which runs fully sandboxed guest code).

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::model::Tool as ToolConfig;

use super::{Tool, ToolError};

pub struct FilesystemTool {
    config: ToolConfig,
    root: PathBuf,
}

impl FilesystemTool {
    pub fn new(config: ToolConfig) -> Self {
        let root = config
            .config
            .get("root")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self { config, root }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, ToolError> {
        let candidate = Path::new(relative);
        if candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
        {
            return Err(ToolError::InvalidParameters(format!(
                "path '{relative}' escapes the tool's scoped root"
            )));
        }
        Ok(self.root.join(candidate))
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum FilesystemArgs {
    Read { path: String },
    Write { path: String, content: String },
    List { path: String },
}

#[async_trait]
impl Tool for FilesystemTool {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: FilesystemArgs = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidParameters(e.to_string()))?;

        match args {
            FilesystemArgs::Read { path } => {
                let full = self.resolve(&path)?;
                let content = tokio::fs::read_to_string(&full)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                Ok(json!({ "content": content }))
            }
            FilesystemArgs::Write { path, content } => {
                let full = self.resolve(&path)?;
                if let Some(parent) = full.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                }
                tokio::fs::write(&full, content)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                Ok(json!({ "ok": true }))
            }
            FilesystemArgs::List { path } => {
                let full = self.resolve(&path)?;
                let mut entries = tokio::fs::read_dir(&full)
                    .await
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                let mut names = Vec::new();
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?
                {
                    names.push(entry.file_name().to_string_lossy().into_owned());
                }
                Ok(json!({ "entries": names }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn config(root: &Path) -> ToolConfig {
        ToolConfig {
            id: Uuid::new_v4(),
            name: "workspace_fs".to_string(),
            tool_type: crate::model::ToolType::Filesystem,
            config: json!({ "root": root.to_string_lossy() }),
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FilesystemTool::new(config(dir.path()));

        tool.execute(json!({ "op": "write", "path": "notes.txt", "content": "hi" }))
            .await
            .unwrap();
        let out = tool.execute(json!({ "op": "read", "path": "notes.txt" })).await.unwrap();
        assert_eq!(out["content"], json!("hi"));
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let tool = FilesystemTool::new(config(dir.path()));
        let err = tool
            .execute(json!({ "op": "read", "path": "../../etc/passwd" }))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }
}
