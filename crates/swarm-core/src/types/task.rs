//! Task-level types: the user request and its final result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::types::artifact::Artifact;

/// A file the user attached to the request. Content is fetched lazily by
/// tools through the storage URL; the engine only carries metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachedFile {
    pub id: String,
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub url: String,
}

/// Desired deliverable type for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Report,
    Code,
    Website,
    Image,
    Video,
    Dataset,
    Document,
    Composite,
    /// Let the aggregator infer from the terminal steps' role mix.
    #[default]
    Auto,
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Created,
    Planning,
    Executing,
    Aggregating,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// The user request as accepted by intake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub files: Vec<AttachedFile>,
    #[serde(default)]
    pub output_type: OutputType,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
}

impl Task {
    /// Create a new task with a fresh id.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            files: Vec::new(),
            output_type: OutputType::Auto,
            created_at: Utc::now(),
            status: TaskStatus::Created,
        }
    }

    pub fn with_output_type(mut self, output_type: OutputType) -> Self {
        self.output_type = output_type;
        self
    }

    pub fn with_files(mut self, files: Vec<AttachedFile>) -> Self {
        self.files = files;
        self
    }
}

/// Final outcome of a task, returned by the library API.
///
/// `artifact` is always present on a best-effort basis: when any step
/// completed before a failure or cancellation, the partial aggregation
/// lands here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    pub artifact: Option<Artifact>,
    pub error_kind: Option<ErrorKind>,
    pub error_detail: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub fn success(task_id: impl Into<String>, artifact: Artifact) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            artifact: Some(artifact),
            error_kind: None,
            error_detail: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failure(
        task_id: impl Into<String>,
        kind: ErrorKind,
        detail: impl Into<String>,
        partial: Option<Artifact>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            artifact: partial,
            error_kind: Some(kind),
            error_detail: Some(detail.into()),
            completed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_defaults() {
        let task = Task::new("compare frameworks");
        assert_eq!(task.status, TaskStatus::Created);
        assert_eq!(task.output_type, OutputType::Auto);
        assert!(task.files.is_empty());
        assert!(!task.id.is_empty());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Executing.is_terminal());
    }

    #[test]
    fn test_output_type_wire_format() {
        let json = serde_json::to_string(&OutputType::Composite).unwrap();
        assert_eq!(json, "\"composite\"");
        let back: OutputType = serde_json::from_str("\"report\"").unwrap();
        assert_eq!(back, OutputType::Report);
    }

    #[test]
    fn test_failure_result_keeps_partial_artifact() {
        let partial = Artifact::report("partial text");
        let result = TaskResult::failure("t1", ErrorKind::Cancelled, "cancelled", Some(partial));
        assert!(!result.success);
        assert!(result.artifact.is_some());
        assert_eq!(result.error_kind, Some(ErrorKind::Cancelled));
    }
}
