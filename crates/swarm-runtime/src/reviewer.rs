//! Quality-gate reviewer.
//!
//! After a step terminates, a judge call scores its output and proposes a
//! decision. The decision policy itself is applied by the scheduler; this
//! module produces the `QualityReport` and owns the judge prompt, the
//! response schema, and the review deadline.

use std::time::Duration;

use serde::Deserialize;
use swarm_core::swarm_review;
use swarm_core::types::{FlowSnapshot, PlannedStep, QualityReport, ReviewDecision, Role, Step};
use swarm_gateway::{ChatMessage, CompletionRequest, strip_thinking};

use crate::agent::extract_json_block;
use crate::context::TaskContext;

/// Character cap on the output excerpt shown to the judge.
const JUDGE_OUTPUT_BUDGET: usize = 4_000;

/// Wire schema the judge is constrained to.
#[derive(Debug, Deserialize)]
struct JudgeVerdict {
    score: f64,
    #[serde(default)]
    decision: Option<ReviewDecision>,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    new_steps: Vec<JudgeStep>,
    #[serde(default)]
    target_step_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JudgeStep {
    #[serde(default)]
    step_id: Option<String>,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    expected_output: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

pub struct QualityGate;

impl QualityGate {
    /// Review a terminated step against its declared expectations.
    ///
    /// Never fails: judge errors, unparseable verdicts, and deadline
    /// expiry all degrade to `continue` so one flaky review cannot stall
    /// the task.
    pub async fn review(
        ctx: &TaskContext,
        step: &Step,
        snapshot: &FlowSnapshot,
    ) -> QualityReport {
        if !ctx.config.supervisor.enable_quality_gates {
            return QualityReport::passing(1.0).with_rationale("quality gates disabled");
        }

        let deadline = Duration::from_secs(ctx.config.supervisor.review_timeout);
        let request = Self::build_request(step, snapshot);

        let outcome = tokio::time::timeout(
            deadline,
            ctx.gateway.complete(request, None, &ctx.cancel),
        )
        .await;

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                swarm_review!(warn, step = %step.id, error = %error, "judge call failed");
                return QualityReport::passing(ctx.config.supervisor.quality_threshold)
                    .with_rationale("review unavailable, accepting by default");
            }
            Err(_) => {
                swarm_review!(warn, step = %step.id, "review timed out");
                return QualityReport::passing(ctx.config.supervisor.quality_threshold)
                    .with_rationale("review timed out, accepting by default");
            }
        };

        match Self::parse_verdict(&response.content) {
            Some(report) => {
                swarm_review!(
                    debug,
                    step = %step.id,
                    score = report.score,
                    decision = ?report.decision,
                    "step reviewed"
                );
                report
            }
            None => {
                swarm_review!(warn, step = %step.id, "unparseable judge verdict");
                QualityReport::passing(ctx.config.supervisor.quality_threshold)
                    .with_rationale("unparseable verdict, accepting by default")
            }
        }
    }

    fn build_request(step: &Step, snapshot: &FlowSnapshot) -> CompletionRequest {
        let output = step.output_text().unwrap_or_default();
        let excerpt = truncate_chars(&output, JUDGE_OUTPUT_BUDGET);

        let remaining: Vec<&str> = snapshot
            .steps
            .values()
            .filter(|s| !s.status.is_terminal())
            .map(|s| s.name.as_str())
            .collect();

        let outcome = match &step.error {
            Some(error) => format!("The step FAILED with error: {error}"),
            None => format!("## Actual output\n{excerpt}"),
        };

        let prompt = format!(
            "You are the quality gate of an AI team. Evaluate the completed step below.\n\n\
             ## Step\n{name}: {description}\n\n\
             ## Expected output\n{expected}\n\n\
             {outcome}\n\n\
             ## Remaining steps in the plan\n{remaining:?}\n\n\
             Respond with JSON only:\n\
             {{\"score\": 0.0-1.0, \"decision\": \"continue|retry|add_step|skip_next\", \
             \"rationale\": \"...\", \
             \"new_steps\": [{{\"name\": \"...\", \"description\": \"...\", \"role\": \"...\", \
             \"expected_output\": \"...\", \"dependencies\": []}}], \
             \"target_step_id\": null}}\n\
             Use add_step only when a concrete compensating step would fix a gap; use skip_next \
             only when downstream work has become pointless.",
            name = step.name,
            description = step.description,
            expected = step.expected_output,
        );

        CompletionRequest::new(vec![ChatMessage::user(prompt)]).with_temperature(0.2)
    }

    fn parse_verdict(content: &str) -> Option<QualityReport> {
        let cleaned = strip_thinking(content);
        let body = extract_json_block(&cleaned);
        let verdict: JudgeVerdict = serde_json::from_str(body).ok()?;

        // Judges occasionally answer on a 1-10 scale despite instructions.
        let score = if verdict.score > 1.0 {
            verdict.score / 10.0
        } else {
            verdict.score
        }
        .clamp(0.0, 1.0);

        let new_steps = verdict
            .new_steps
            .into_iter()
            .enumerate()
            .map(|(index, js)| PlannedStep {
                step_id: js
                    .step_id
                    .unwrap_or_else(|| format!("review_step_{index}")),
                step_number: 0,
                name: js.name,
                description: js.description,
                role: js
                    .role
                    .as_deref()
                    .and_then(Role::parse)
                    .unwrap_or(Role::Researcher),
                expected_output: js.expected_output,
                dependencies: js.dependencies,
            })
            .collect();

        Some(QualityReport {
            score,
            decision: verdict.decision.unwrap_or_default(),
            rationale: verdict.rationale,
            new_steps,
            target_step_id: verdict.target_step_id,
        })
    }
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    if text.len() <= limit {
        return text;
    }
    let mut end = limit;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use swarm_core::SwarmConfig;
    use swarm_core::types::ExecutionFlow;
    use swarm_gateway::{MockBackend, ModelGateway, ModelResponse};
    use swarm_tools::ToolRegistry;

    use crate::bus::EventBus;
    use crate::context::TaskContext;

    fn context(backend: MockBackend, mut config: SwarmConfig) -> TaskContext {
        config.supervisor.review_timeout = 2;
        TaskContext::new(
            "task-1",
            Arc::new(config),
            Arc::new(ModelGateway::new(Arc::new(backend))),
            Arc::new(ToolRegistry::new()),
            EventBus::new(64),
        )
    }

    fn reviewed_step() -> (Step, FlowSnapshot) {
        let mut flow = ExecutionFlow::new("task-1");
        let step = Step::new("s1", 1, "research", "find facts", Role::Researcher)
            .with_expected_output("facts with sources");
        flow.add_step(step).unwrap();
        flow.mark_running("s1", "agent-1").unwrap();
        flow.mark_completed("s1", serde_json::json!("the facts")).unwrap();
        let snapshot = flow.snapshot();
        (snapshot.steps["s1"].clone(), snapshot)
    }

    #[tokio::test]
    async fn test_verdict_parsed() {
        let backend = MockBackend::with_script(vec![Ok(ModelResponse::new(
            r#"{"score": 0.9, "decision": "continue", "rationale": "solid"}"#,
            "mock",
        ))]);
        let ctx = context(backend, SwarmConfig::default());
        let (step, snapshot) = reviewed_step();

        let report = QualityGate::review(&ctx, &step, &snapshot).await;
        assert_eq!(report.score, 0.9);
        assert_eq!(report.decision, ReviewDecision::Continue);
        assert_eq!(report.rationale, "solid");
    }

    #[tokio::test]
    async fn test_ten_point_scale_normalised() {
        let backend = MockBackend::with_script(vec![Ok(ModelResponse::new(
            r#"{"score": 8, "decision": "continue"}"#,
            "mock",
        ))]);
        let ctx = context(backend, SwarmConfig::default());
        let (step, snapshot) = reviewed_step();

        let report = QualityGate::review(&ctx, &step, &snapshot).await;
        assert!((report.score - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_fenced_verdict_with_thinking() {
        let backend = MockBackend::with_script(vec![Ok(ModelResponse::new(
            "[THINKING]weighing it[/THINKING]```json\n{\"score\": 0.4, \"decision\": \"retry\"}\n```",
            "mock",
        ))]);
        let ctx = context(backend, SwarmConfig::default());
        let (step, snapshot) = reviewed_step();

        let report = QualityGate::review(&ctx, &step, &snapshot).await;
        assert_eq!(report.decision, ReviewDecision::Retry);
        assert!((report.score - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_judge_failure_degrades_to_continue() {
        let backend = MockBackend::with_responder(|_| Err(anyhow::anyhow!("500 server error")));
        let ctx = context(backend, SwarmConfig::default());
        let (step, snapshot) = reviewed_step();

        let report = QualityGate::review(&ctx, &step, &snapshot).await;
        assert_eq!(report.decision, ReviewDecision::Continue);
        assert!(report.score >= ctx.config.supervisor.quality_threshold);
    }

    #[tokio::test]
    async fn test_unparseable_verdict_degrades_to_continue() {
        let backend = MockBackend::with_script(vec![Ok(ModelResponse::new(
            "I think it looks fine overall!",
            "mock",
        ))]);
        let ctx = context(backend, SwarmConfig::default());
        let (step, snapshot) = reviewed_step();

        let report = QualityGate::review(&ctx, &step, &snapshot).await;
        assert_eq!(report.decision, ReviewDecision::Continue);
    }

    #[tokio::test]
    async fn test_disabled_gates_short_circuit() {
        let mut config = SwarmConfig::default();
        config.supervisor.enable_quality_gates = false;
        // A backend that would fail if called at all.
        let backend = MockBackend::with_responder(|_| panic!("judge must not be called"));
        let ctx = context(backend, config);
        let (step, snapshot) = reviewed_step();

        let report = QualityGate::review(&ctx, &step, &snapshot).await;
        assert_eq!(report.score, 1.0);
    }

    #[tokio::test]
    async fn test_new_steps_parsed_with_role_fallback() {
        let backend = MockBackend::with_script(vec![Ok(ModelResponse::new(
            r#"{"score": 0.5, "decision": "add_step", "new_steps": [
                {"name": "verify", "description": "check claims", "role": "fact-checker"},
                {"name": "extra", "description": "more digging", "role": "made_up_role"}
            ]}"#,
            "mock",
        ))]);
        let ctx = context(backend, SwarmConfig::default());
        let (step, snapshot) = reviewed_step();

        let report = QualityGate::review(&ctx, &step, &snapshot).await;
        assert_eq!(report.decision, ReviewDecision::AddStep);
        assert_eq!(report.new_steps.len(), 2);
        assert_eq!(report.new_steps[0].role, Role::FactChecker);
        assert_eq!(report.new_steps[1].role, Role::Researcher);
    }
}
