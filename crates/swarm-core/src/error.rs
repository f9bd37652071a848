//! Error taxonomy for the orchestration engine.
//!
//! Every failure the engine can observe is captured here; errors never
//! cross a task boundary. Step-level failures are folded into `Step`
//! state, task-level failures into `TaskResult`.

use thiserror::Error;

use crate::types::step::StepStatus;

/// Errors raised by the engine.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// Transport-level failure talking to the model provider.
    #[error("model transport error{backend}: {message}", backend = Self::backend_suffix(.backend))]
    ModelTransport {
        message: String,
        /// Optional backend identifier.
        backend: Option<String>,
    },

    /// Provider signalled rate limiting.
    #[error("rate limited by model provider: {message}")]
    RateLimit { message: String },

    /// A step exceeded its execution deadline.
    #[error("step {step_id} timed out after {seconds}s")]
    Timeout { step_id: String, seconds: u64 },

    /// The task context was cancelled.
    #[error("execution cancelled")]
    Cancelled,

    /// The per-task tool-call budget is exhausted.
    #[error("tool-call budget of {budget} exhausted")]
    ToolBudgetExhausted { budget: u64 },

    /// A tool handler failed. Surfaced to the model as tool-result
    /// content, never raised through the step.
    #[error("tool '{tool}' failed: {message}")]
    ToolHandler { tool: String, message: String },

    /// The model completed but its output could not be parsed into the
    /// step's declared shape.
    #[error("unparseable step output: {message}")]
    InvalidOutput { message: String },

    /// The supervisor failed to produce a parsable plan.
    #[error("planner produced no parsable plan after {iterations} iterations")]
    PlanUnparseable { iterations: u32 },

    /// A step was dispatched while a dependency was not completed.
    /// This is an internal invariant violation, not a user error.
    #[error("step {step_id} dispatched with unsatisfied dependency {dependency}")]
    DependencyUnsatisfied { step_id: String, dependency: String },

    /// A flow mutation would introduce a dependency cycle.
    #[error("mutation rejected: cycle through step {step_id}")]
    CycleDetected { step_id: String },

    /// A status transition outside the step lifecycle diagram.
    #[error("invalid transition for step {step_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        step_id: String,
        from: StepStatus,
        to: StepStatus,
    },

    /// Step or task id not known to the flow/engine.
    #[error("unknown {entity} id: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Serialisation failure at a wire boundary.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SwarmError {
    fn backend_suffix(backend: &Option<String>) -> String {
        match backend {
            Some(b) => format!(" (backend: {b})"),
            None => String::new(),
        }
    }

    /// The wire-level kind tag for this error, stable across releases.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SwarmError::ModelTransport { .. } => ErrorKind::ModelTransport,
            SwarmError::RateLimit { .. } => ErrorKind::RateLimit,
            SwarmError::Timeout { .. } => ErrorKind::Timeout,
            SwarmError::Cancelled => ErrorKind::Cancelled,
            SwarmError::ToolBudgetExhausted { .. } => ErrorKind::ToolBudgetExhausted,
            SwarmError::ToolHandler { .. } => ErrorKind::ToolHandlerError,
            SwarmError::InvalidOutput { .. } => ErrorKind::InvalidOutput,
            SwarmError::PlanUnparseable { .. } => ErrorKind::PlanUnparseable,
            SwarmError::DependencyUnsatisfied { .. } => ErrorKind::DependencyUnsatisfied,
            SwarmError::CycleDetected { .. } => ErrorKind::CycleDetected,
            SwarmError::InvalidTransition { .. }
            | SwarmError::NotFound { .. }
            | SwarmError::Config(_)
            | SwarmError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Whether a sub-agent should retry the model call that produced this.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SwarmError::ModelTransport { .. } | SwarmError::RateLimit { .. }
        )
    }
}

/// Stable error-kind tags reported through `TaskResult` and step state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ModelTransport,
    RateLimit,
    Timeout,
    Cancelled,
    ToolBudgetExhausted,
    ToolHandlerError,
    InvalidOutput,
    PlanUnparseable,
    DependencyUnsatisfied,
    CycleDetected,
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = SwarmError::RateLimit {
            message: "429".into(),
        };
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert!(err.is_transient());

        let err = SwarmError::Cancelled;
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_display_includes_backend() {
        let err = SwarmError::ModelTransport {
            message: "connection reset".into(),
            backend: Some("openai_compat".into()),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("connection reset"));
        assert!(rendered.contains("openai_compat"));
    }

    #[test]
    fn test_kind_serialises_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ToolBudgetExhausted).unwrap();
        assert_eq!(json, "\"tool_budget_exhausted\"");
    }
}
