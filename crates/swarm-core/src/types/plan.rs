//! Supervisor planning output.

use serde::{Deserialize, Serialize};

use crate::types::role::Role;
use crate::types::step::Step;

/// One planned step as emitted by the supervisor. Dependencies reference
/// step ids defined earlier in the list, which keeps the resulting DAG
/// acyclic by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedStep {
    pub step_id: String,
    pub step_number: u32,
    pub name: String,
    pub description: String,
    pub role: Role,
    #[serde(default)]
    pub expected_output: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl PlannedStep {
    pub fn into_step(self) -> Step {
        Step::new(
            self.step_id,
            self.step_number,
            self.name,
            self.description,
            self.role,
        )
        .with_expected_output(self.expected_output)
        .with_dependencies(self.dependencies)
    }
}

/// The supervisor's answer for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    /// Task text after the rewrite phase.
    pub refined_task: String,
    #[serde(default)]
    pub key_objectives: Vec<String>,
    /// True when the task is trivial and `direct_answer` replaces the DAG.
    #[serde(default)]
    pub simple_direct: bool,
    #[serde(default)]
    pub direct_answer: Option<String>,
    #[serde(default)]
    pub steps: Vec<PlannedStep>,
    #[serde(default)]
    pub suggested_roles: Vec<Role>,
    /// Planner's 1-10 complexity estimate from the quick-understanding phase.
    #[serde(default = "default_complexity")]
    pub estimated_complexity: f64,
    #[serde(default)]
    pub background_research: Option<String>,
}

fn default_complexity() -> f64 {
    5.0
}

impl TaskPlan {
    /// A trivial answer that bypasses the DAG entirely.
    pub fn direct(refined_task: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            refined_task: refined_task.into(),
            key_objectives: Vec::new(),
            simple_direct: true,
            direct_answer: Some(answer.into()),
            steps: Vec::new(),
            suggested_roles: Vec::new(),
            estimated_complexity: 1.0,
            background_research: None,
        }
    }

    /// Single-step fallback used when the planner output stays unparseable.
    pub fn fallback(task_content: &str) -> Self {
        Self {
            refined_task: task_content.to_string(),
            key_objectives: vec!["complete the task as stated".to_string()],
            simple_direct: false,
            direct_answer: None,
            steps: vec![PlannedStep {
                step_id: "step_1".to_string(),
                step_number: 1,
                name: "Research and answer".to_string(),
                description: task_content.to_string(),
                role: Role::Researcher,
                expected_output: "a complete answer to the task".to_string(),
                dependencies: Vec::new(),
            }],
            suggested_roles: vec![Role::Researcher],
            estimated_complexity: 5.0,
            background_research: None,
        }
    }

    /// Validate the earlier-steps-only dependency discipline.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if step.role == Role::Supervisor {
                return Err(format!("step {} assigns the supervisor role", step.step_id));
            }
            for dep in &step.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(format!(
                        "step {} depends on {dep}, which is not an earlier step",
                        step.step_id
                    ));
                }
            }
            if !seen.insert(step.step_id.as_str()) {
                return Err(format!("duplicate step id {}", step.step_id));
            }
        }
        Ok(())
    }
}
