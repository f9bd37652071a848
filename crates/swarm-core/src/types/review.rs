//! Quality-gate reviewer output.

use serde::{Deserialize, Serialize};

use crate::types::plan::PlannedStep;

/// Reviewer verdict for one completed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    #[default]
    Continue,
    Retry,
    AddStep,
    SkipNext,
}

/// Scored review of a step's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    /// Quality score in [0, 1]. Judges that answer on a 1-10 scale are
    /// normalised before this struct is built.
    pub score: f64,
    pub decision: ReviewDecision,
    #[serde(default)]
    pub rationale: String,
    /// Compensating steps, honored only for `AddStep` after validation.
    #[serde(default)]
    pub new_steps: Vec<PlannedStep>,
    /// Step whose descendants `SkipNext` targets; defaults to the
    /// reviewed step itself.
    #[serde(default)]
    pub target_step_id: Option<String>,
}

impl QualityReport {
    pub fn passing(score: f64) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            decision: ReviewDecision::Continue,
            rationale: String::new(),
            new_steps: Vec::new(),
            target_step_id: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_is_clamped() {
        assert_eq!(QualityReport::passing(1.4).score, 1.0);
        assert_eq!(QualityReport::passing(-0.1).score, 0.0);
    }

    #[test]
    fn test_decision_wire_names() {
        let json = serde_json::to_string(&ReviewDecision::SkipNext).unwrap();
        assert_eq!(json, "\"skip_next\"");
        let back: ReviewDecision = serde_json::from_str("\"add_step\"").unwrap();
        assert_eq!(back, ReviewDecision::AddStep);
    }

    #[test]
    fn test_report_deserialises_with_defaults() {
        let report: QualityReport =
            serde_json::from_str(r#"{"score": 0.8, "decision": "continue"}"#).unwrap();
        assert!(report.new_steps.is_empty());
        assert!(report.target_step_id.is_none());
        assert!(report.rationale.is_empty());
    }
}
