//! Runtime agent instances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::role::Role;

/// Agent instance lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

/// A role template materialised for one step execution.
///
/// Instances are created by the scheduler at dispatch and released on the
/// step's terminal status; the registry they live in has a single writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    pub id: String,
    pub role: Role,
    pub display_name: String,
    pub avatar: String,
    pub status: AgentStatus,
    pub current_step: Option<String>,
    pub steps_completed: u32,
    pub steps_failed: u32,
    pub created_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
}

impl AgentInstance {
    pub fn new(role: Role, display_name: impl Into<String>, avatar: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            display_name: display_name.into(),
            avatar: avatar.into(),
            status: AgentStatus::Idle,
            current_step: None,
            steps_completed: 0,
            steps_failed: 0,
            created_at: Utc::now(),
            released_at: None,
        }
    }

    pub fn start(&mut self, step_id: impl Into<String>) {
        self.status = AgentStatus::Running;
        self.current_step = Some(step_id.into());
    }

    pub fn finish(&mut self, success: bool) {
        self.status = if success {
            self.steps_completed += 1;
            AgentStatus::Completed
        } else {
            self.steps_failed += 1;
            AgentStatus::Failed
        };
        self.current_step = None;
        self.released_at = Some(Utc::now());
    }

    /// Fraction of finished steps that completed successfully.
    pub fn success_rate(&self) -> f64 {
        let total = self.steps_completed + self.steps_failed;
        if total == 0 {
            return 1.0;
        }
        f64::from(self.steps_completed) / f64::from(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_lifecycle() {
        let mut agent = AgentInstance::new(Role::Writer, "Writer", "pen");
        assert_eq!(agent.status, AgentStatus::Idle);

        agent.start("step_3");
        assert_eq!(agent.status, AgentStatus::Running);
        assert_eq!(agent.current_step.as_deref(), Some("step_3"));

        agent.finish(true);
        assert_eq!(agent.status, AgentStatus::Completed);
        assert!(agent.current_step.is_none());
        assert!(agent.released_at.is_some());
        assert_eq!(agent.steps_completed, 1);
    }

    #[test]
    fn test_success_rate() {
        let mut agent = AgentInstance::new(Role::Coder, "Coder", "laptop");
        assert_eq!(agent.success_rate(), 1.0);
        agent.start("a");
        agent.finish(true);
        agent.start("b");
        agent.finish(false);
        assert_eq!(agent.success_rate(), 0.5);
    }
}
