//! Wave scheduler: the canonical "team mode" engine.
//!
//! Loop: pick the ready set, truncate to the parallelism cap, dispatch
//! the wave, wait for the barrier, run the quality gate over each
//! terminated step, apply its decision atomically, record wave stats,
//! repeat until the DAG settles or the task is cancelled.

use std::time::Instant;

use swarm_core::swarm_sched;
use swarm_core::types::{
    ReviewDecision, Step, StepStatus, WaveExecutionResult, WaveStats,
};
use swarm_core::{Event, SwarmError, SwarmResult};
use tokio::task::JoinSet;

use crate::context::TaskContext;
use crate::reviewer::QualityGate;
use crate::scheduler::{
    SharedFlow, StepOutcome, cancel_pass, publish_flow_updated, publish_step_status, run_step,
    spawn_deadline_watchdog,
};

pub struct WaveScheduler;

impl WaveScheduler {
    /// Run the flow to completion. Returns wave statistics; step-level
    /// outcomes live on the flow itself.
    pub async fn run(ctx: &TaskContext, flow: &SharedFlow) -> SwarmResult<WaveExecutionResult> {
        let started = Instant::now();
        let watchdog = spawn_deadline_watchdog(ctx);
        let mut wave_number: u32 = 0;

        loop {
            if ctx.cancel.is_cancelled() {
                cancel_pass(ctx, flow);
                break;
            }

            let ready = flow.lock().ready_steps();
            if ready.is_empty() {
                // Nothing runs between waves, so an empty ready set means
                // the DAG has settled as far as it ever will.
                break;
            }

            let wave: Vec<String> = ready
                .into_iter()
                .take(ctx.config.wave_parallelism_cap)
                .collect();
            let mut stats = WaveStats::begin(wave_number, wave.len());
            stats.parallelism = wave.len().min(ctx.config.max_concurrent_agents);

            swarm_sched!(
                info,
                task = %ctx.task_id,
                wave = wave_number,
                width = wave.len(),
                "dispatching wave"
            );

            let mut join_set = JoinSet::new();
            for step_id in wave {
                join_set.spawn(run_step(ctx.clone(), flow.clone(), step_id));
            }

            // Barrier: every step of the wave reaches a terminal status
            // before review begins. Cancellation propagates through the
            // workers' own suspension points.
            let mut outcomes: Vec<StepOutcome> = Vec::new();
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(join_error) => {
                        swarm_sched!(error, error = %join_error, "step worker panicked");
                    }
                }
            }

            let completed = outcomes.iter().filter(|o| o.result.is_ok()).count();
            let failed = outcomes.len() - completed;

            for outcome in &outcomes {
                if let Err(SwarmError::DependencyUnsatisfied { .. }) = &outcome.result {
                    // Invariant breach: abort the task with the internal
                    // error rather than limping on.
                    watchdog.abort();
                    let StepOutcome { step_id, .. } = outcome;
                    return Err(SwarmError::DependencyUnsatisfied {
                        step_id: step_id.clone(),
                        dependency: "unknown".to_string(),
                    });
                }
                Self::review_and_apply(ctx, flow, outcome).await;
            }

            stats.finish(completed, failed);
            flow.lock().record_wave(stats);
            publish_flow_updated(ctx, flow);
            wave_number += 1;
        }

        watchdog.abort();

        let progress = flow.lock().progress();
        Ok(WaveExecutionResult {
            total_waves: wave_number as usize,
            total_steps: progress.total,
            completed_steps: progress.completed,
            failed_steps: progress.failed,
            skipped_steps: progress.skipped,
            duration_ms: started.elapsed().as_millis(),
        })
    }

    /// Run the quality gate for one terminated step and apply its
    /// decision. All flow mutation happens here, under the scheduler's
    /// exclusive ownership.
    async fn review_and_apply(ctx: &TaskContext, flow: &SharedFlow, outcome: &StepOutcome) {
        let Some(step) = flow.lock().step(&outcome.step_id).cloned() else {
            return;
        };

        match step.status {
            StepStatus::Completed => Self::review_completed(ctx, flow, &step).await,
            StepStatus::Failed => Self::handle_failed(ctx, flow, &step),
            // Retried into Waiting by an earlier decision, or skipped.
            _ => {}
        }
    }

    async fn review_completed(ctx: &TaskContext, flow: &SharedFlow, step: &Step) {
        let snapshot = flow.lock().snapshot();
        let report = QualityGate::review(ctx, step, &snapshot).await;
        let threshold = ctx.config.supervisor.quality_threshold;
        let max_retries = ctx.config.supervisor.max_retry_on_failure;

        let wants_retry =
            report.decision == ReviewDecision::Retry || report.score < threshold;

        if wants_retry {
            if step.retries < max_retries {
                Self::apply_retry(ctx, flow, &step.id, &report.rationale);
            } else if step_is_critical(step) {
                swarm_sched!(
                    warn,
                    step = %step.id,
                    score = report.score,
                    "critical step below threshold with retries exhausted, skipping downstream"
                );
                Self::apply_skip(ctx, flow, &step.id);
            } else {
                // Best effort: let downstream consume what exists.
                ctx.bus.publish(Event::task_log(
                    &ctx.task_id,
                    &format!(
                        "accepting below-threshold output of step '{}' (score {:.2}, retries exhausted)",
                        step.name, report.score
                    ),
                ));
            }
            return;
        }

        match report.decision {
            ReviewDecision::AddStep => Self::apply_add_steps(ctx, flow, step, &report.new_steps),
            ReviewDecision::SkipNext => {
                let target = report.target_step_id.as_deref().unwrap_or(&step.id);
                Self::apply_skip(ctx, flow, target);
            }
            _ => {}
        }
    }

    /// Failure policy when there is no meaningful output to judge.
    fn handle_failed(ctx: &TaskContext, flow: &SharedFlow, step: &Step) {
        use swarm_core::ErrorKind;

        let max_retries = ctx.config.supervisor.max_retry_on_failure;
        let no_retry = matches!(
            step.error_kind,
            Some(ErrorKind::Cancelled) | Some(ErrorKind::ToolBudgetExhausted)
        );

        if !no_retry && step.retries < max_retries {
            Self::apply_retry(ctx, flow, &step.id, step.error.as_deref().unwrap_or("failed"));
            return;
        }

        // Terminal failure: downstream cannot run without this output.
        if step_is_critical(step) || matches!(step.error_kind, Some(ErrorKind::ToolBudgetExhausted))
        {
            Self::apply_skip(ctx, flow, &step.id);
        } else {
            let blocked = flow.lock().block_descendants(&step.id).unwrap_or_default();
            for id in &blocked {
                publish_step_status(ctx, flow, id, "blocked");
            }
            ctx.bus.publish(Event::task_log(
                &ctx.task_id,
                &format!(
                    "step '{}' failed permanently, {} downstream step(s) blocked",
                    step.name,
                    blocked.len()
                ),
            ));
        }
    }

    fn apply_retry(ctx: &TaskContext, flow: &SharedFlow, step_id: &str, reason: &str) {
        match flow.lock().mark_retry(step_id) {
            Ok(retries) => {
                swarm_sched!(info, step = %step_id, retries, reason, "retrying step");
                publish_step_status(ctx, flow, step_id, "waiting");
            }
            Err(error) => {
                swarm_sched!(warn, step = %step_id, error = %error, "retry rejected");
            }
        }
    }

    fn apply_skip(ctx: &TaskContext, flow: &SharedFlow, target: &str) {
        let skipped = flow.lock().skip_descendants(target).unwrap_or_default();
        for id in &skipped {
            publish_step_status(ctx, flow, id, "skipped");
        }
        if !skipped.is_empty() {
            ctx.bus.publish(Event::task_log(
                &ctx.task_id,
                &format!("skipped {} step(s) downstream of '{target}'", skipped.len()),
            ));
        }
    }

    /// Insert reviewer-proposed compensating steps. Each proposal must
    /// depend only on completed steps; the reviewed step itself is always
    /// added as a dependency so the new step sees its output.
    fn apply_add_steps(
        ctx: &TaskContext,
        flow: &SharedFlow,
        reviewed: &Step,
        proposals: &[swarm_core::types::PlannedStep],
    ) {
        let mut guard = flow.lock();
        for proposal in proposals {
            let valid_deps = proposal.dependencies.iter().all(|dep| {
                guard
                    .step(dep)
                    .map(|d| d.status == StepStatus::Completed)
                    .unwrap_or(false)
            });
            if !valid_deps {
                swarm_sched!(
                    warn,
                    step = %proposal.step_id,
                    "add_step rejected: dependency not an existing completed step"
                );
                continue;
            }

            let number = guard.steps().map(|s| s.number).max().unwrap_or(0) + 1;
            let mut planned = proposal.clone();
            planned.step_number = number;
            if !planned.dependencies.contains(&reviewed.id) {
                planned.dependencies.push(reviewed.id.clone());
            }
            // Reviewer proposals may collide with existing ids; namespace them.
            if guard.step(&planned.step_id).is_some() {
                planned.step_id = format!("{}_r{}", planned.step_id, number);
            }

            let step_id = planned.step_id.clone();
            let name = planned.name.clone();
            match guard.insert_step(planned.into_step()) {
                Ok(()) => {
                    swarm_sched!(info, step = %step_id, name = %name, "compensating step inserted");
                    ctx.bus.publish(Event::task_log(
                        &ctx.task_id,
                        &format!("reviewer added compensating step '{name}'"),
                    ));
                }
                Err(error) => {
                    swarm_sched!(warn, step = %step_id, error = %error, "add_step rejected");
                }
            }
        }
        drop(guard);
        publish_flow_updated(ctx, flow);
    }
}

fn step_is_critical(step: &Step) -> bool {
    swarm_core::types::RoleTemplate::for_role(step.role).critical
}
