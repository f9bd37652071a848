//! DAG step: the unit of work a sub-agent executes.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::types::role::Role;

/// Step lifecycle status.
///
/// Transitions: `Pending -> Waiting -> Running -> (Completed | Failed)`;
/// `Waiting -> Blocked` when a dependency fails; any non-terminal status
/// may move to `Skipped` by reviewer decision; a reviewer retry resets
/// `Completed`/`Failed` back to `Waiting` with the retry counter bumped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Waiting,
    Blocked,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }

    /// Whether the lifecycle diagram permits `self -> next`.
    ///
    /// The retry edge (`Completed|Failed -> Waiting`) is included here;
    /// callers that must forbid it (everything except the reviewer path)
    /// go through `ExecutionFlow` which gates it separately.
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        use StepStatus::*;
        match (self, next) {
            (Pending, Waiting) => true,
            (Waiting, Running) => true,
            (Waiting, Blocked) => true,
            (Blocked, Waiting) => true,
            (Running, Completed) => true,
            (Running, Failed) => true,
            // Reviewer-initiated retry.
            (Completed, Waiting) | (Failed, Waiting) => true,
            // Reviewer-initiated skip of any non-terminal step.
            (from, Skipped) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// One log line recorded during a step's execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLog {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl StepLog {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// A DAG vertex.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Stable within one task.
    pub id: String,
    /// Ordinal position in the plan; breaks topological ties.
    pub number: u32,
    pub name: String,
    pub description: String,
    pub role: Role,
    pub expected_output: String,
    /// Ids of steps in the same plan this step depends on. BTreeSet keeps
    /// snapshots deterministic.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    pub status: StepStatus,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_kind: Option<ErrorKind>,
    /// Agent instance currently (or last) assigned to this step.
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub logs: Vec<StepLog>,
}

impl Step {
    pub fn new(
        id: impl Into<String>,
        number: u32,
        name: impl Into<String>,
        description: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            id: id.into(),
            number,
            name: name.into(),
            description: description.into(),
            role,
            expected_output: String::new(),
            dependencies: BTreeSet::new(),
            status: StepStatus::Pending,
            input: None,
            output: None,
            error: None,
            error_kind: None,
            agent_id: None,
            retries: 0,
            started_at: None,
            completed_at: None,
            logs: Vec::new(),
        }
    }

    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = expected.into();
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Output rendered as plain text for downstream prompt injection.
    pub fn output_text(&self) -> Option<String> {
        match &self.output {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        }
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.logs.push(StepLog::new(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        use StepStatus::*;
        assert!(Pending.can_transition_to(Waiting));
        assert!(Waiting.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Waiting.can_transition_to(Blocked));

        // Forbidden edges.
        assert!(!Pending.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_retry_edge() {
        assert!(StepStatus::Failed.can_transition_to(StepStatus::Waiting));
        assert!(StepStatus::Completed.can_transition_to(StepStatus::Waiting));
    }

    #[test]
    fn test_skip_only_from_non_terminal() {
        assert!(StepStatus::Waiting.can_transition_to(StepStatus::Skipped));
        assert!(StepStatus::Blocked.can_transition_to(StepStatus::Skipped));
        assert!(StepStatus::Running.can_transition_to(StepStatus::Skipped));
        assert!(!StepStatus::Completed.can_transition_to(StepStatus::Skipped));
        assert!(!StepStatus::Skipped.can_transition_to(StepStatus::Skipped));
    }

    #[test]
    fn test_output_text_rendering() {
        let mut step = Step::new("s1", 1, "search", "find sources", Role::Searcher);
        assert!(step.output_text().is_none());

        step.output = Some(serde_json::Value::String("plain".into()));
        assert_eq!(step.output_text().as_deref(), Some("plain"));

        step.output = Some(serde_json::json!({"files": ["a.rs"]}));
        assert!(step.output_text().unwrap().contains("a.rs"));
    }
}
