//! File access tools, rooted in a workspace directory.
//!
//! Paths are confined to the workspace root; traversal outside it is a
//! handler error, not a panic.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::json;
use swarm_core::{CancelToken, SwarmError};
use swarm_gateway::ToolDefinition;

use crate::tool::{Tool, handler_error, require_str};

/// Resolve `relative` inside `root`, rejecting escapes.
fn resolve_within(root: &Path, relative: &str, tool: &str) -> Result<PathBuf, SwarmError> {
    let mut normalized = PathBuf::from(root);
    for component in Path::new(relative).components() {
        use std::path::Component;
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() || !normalized.starts_with(root) {
                    return Err(handler_error(tool, format!("path escapes workspace: {relative}")));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(handler_error(tool, format!("absolute paths not allowed: {relative}")));
            }
        }
    }
    if !normalized.starts_with(root) {
        return Err(handler_error(tool, format!("path escapes workspace: {relative}")));
    }
    Ok(normalized)
}

/// Read a file from the workspace.
pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "read_file",
            "Read a text file from the task workspace.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Workspace-relative path"}
                },
                "required": ["path"]
            }),
        )
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        cancel: &CancelToken,
    ) -> Result<serde_json::Value, SwarmError> {
        if cancel.is_cancelled() {
            return Err(SwarmError::Cancelled);
        }
        let relative = require_str("read_file", &args, "path")?;
        let path = resolve_within(&self.root, relative, "read_file")?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| handler_error("read_file", format!("cannot read {relative}: {e}")))?;
        Ok(serde_json::Value::String(content))
    }
}

/// Write an artifact file into the workspace.
pub struct WriteFileTool {
    root: PathBuf,
}

impl WriteFileTool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            "write_file",
            "Write a text file into the task workspace, creating parent directories.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Workspace-relative path"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
        )
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        cancel: &CancelToken,
    ) -> Result<serde_json::Value, SwarmError> {
        if cancel.is_cancelled() {
            return Err(SwarmError::Cancelled);
        }
        let relative = require_str("write_file", &args, "path")?;
        let content = require_str("write_file", &args, "content")?;
        let path = resolve_within(&self.root, relative, "write_file")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| handler_error("write_file", format!("cannot create dirs: {e}")))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| handler_error("write_file", format!("cannot write {relative}: {e}")))?;

        Ok(json!({"written": relative, "bytes": content.len()}))
    }
}
