//! Progress events published on the in-process bus.
//!
//! The wire shape is `{type, data, timestamp}`; `type` is one of the 14
//! kinds below. Events from a single publisher reach each subscriber in
//! publication order; nothing is guaranteed across publishers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskCreated,
    TaskUpdated,
    TaskCompleted,
    TaskLog,
    AgentCreated,
    AgentUpdated,
    AgentRemoved,
    AgentLog,
    AgentStream,
    AgentStreamClear,
    StepStatusChanged,
    ExecutionFlowUpdated,
    TaskProgress,
    OutputProgress,
}

/// A tagged progress record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Incremental model output for one agent: the delta plus the full
    /// accumulated buffer, so late subscribers can resynchronise.
    pub fn agent_stream(task_id: &str, agent_id: &str, delta: &str, buffer: &str) -> Self {
        Self::new(
            EventKind::AgentStream,
            serde_json::json!({
                "task_id": task_id,
                "agent_id": agent_id,
                "delta": delta,
                "buffer": buffer,
            }),
        )
    }

    /// Signal that an agent's stream buffer may be discarded.
    pub fn agent_stream_clear(task_id: &str, agent_id: &str) -> Self {
        Self::new(
            EventKind::AgentStreamClear,
            serde_json::json!({ "task_id": task_id, "agent_id": agent_id }),
        )
    }

    pub fn step_status_changed(task_id: &str, step_id: &str, status: &str) -> Self {
        Self::new(
            EventKind::StepStatusChanged,
            serde_json::json!({
                "task_id": task_id,
                "step_id": step_id,
                "status": status,
            }),
        )
    }

    pub fn task_log(task_id: &str, message: &str) -> Self {
        Self::new(
            EventKind::TaskLog,
            serde_json::json!({ "task_id": task_id, "message": message }),
        )
    }

    pub fn agent_log(task_id: &str, agent_id: &str, message: &str) -> Self {
        Self::new(
            EventKind::AgentLog,
            serde_json::json!({
                "task_id": task_id,
                "agent_id": agent_id,
                "message": message,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = Event::step_status_changed("t1", "s1", "running");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step_status_changed");
        assert_eq!(json["data"]["step_id"], "s1");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_all_fourteen_kinds_serialise() {
        use EventKind::*;
        let kinds = [
            TaskCreated,
            TaskUpdated,
            TaskCompleted,
            TaskLog,
            AgentCreated,
            AgentUpdated,
            AgentRemoved,
            AgentLog,
            AgentStream,
            AgentStreamClear,
            StepStatusChanged,
            ExecutionFlowUpdated,
            TaskProgress,
            OutputProgress,
        ];
        assert_eq!(kinds.len(), 14);
        for kind in kinds {
            let tag = serde_json::to_string(&kind).unwrap();
            let back: EventKind = serde_json::from_str(&tag).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn test_stream_event_carries_delta_and_buffer() {
        let event = Event::agent_stream("t1", "a1", "wor", "hello wor");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["delta"], "wor");
        assert_eq!(json["data"]["buffer"], "hello wor");
    }
}
