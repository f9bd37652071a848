//! Fixed-level scheduler: the legacy "scheduler mode".
//!
//! Waves are the topological levels computed once from the initial DAG.
//! There is no quality gate and no mid-flow mutation; a failed step
//! blocks its descendants and the remaining levels run around the hole.

use std::time::Instant;

use swarm_core::swarm_sched;
use swarm_core::types::{StepStatus, WaveExecutionResult, WaveStats};
use swarm_core::SwarmResult;
use tokio::task::JoinSet;

use crate::context::TaskContext;
use crate::scheduler::{
    SharedFlow, cancel_pass, publish_flow_updated, publish_step_status, run_step,
    spawn_deadline_watchdog,
};

pub struct LevelScheduler;

impl LevelScheduler {
    pub async fn run(ctx: &TaskContext, flow: &SharedFlow) -> SwarmResult<WaveExecutionResult> {
        let started = Instant::now();
        let levels = flow.lock().topological_levels()?;
        let watchdog = spawn_deadline_watchdog(ctx);
        let mut waves_run = 0usize;

        for (wave_number, level) in levels.into_iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                cancel_pass(ctx, flow);
                break;
            }

            // Only steps whose dependencies actually completed run; the
            // rest of the level sits behind a failed ancestor.
            let runnable: Vec<String> = {
                let guard = flow.lock();
                let ready = guard.ready_steps();
                level
                    .iter()
                    .filter(|id| ready.contains(id))
                    .take(ctx.config.wave_parallelism_cap)
                    .cloned()
                    .collect()
            };

            if runnable.is_empty() {
                continue;
            }

            let mut stats = WaveStats::begin(wave_number as u32, runnable.len());
            stats.parallelism = runnable.len().min(ctx.config.max_concurrent_agents);

            swarm_sched!(
                info,
                task = %ctx.task_id,
                wave = wave_number,
                width = runnable.len(),
                "dispatching fixed level"
            );

            let mut join_set = JoinSet::new();
            for step_id in runnable {
                join_set.spawn(run_step(ctx.clone(), flow.clone(), step_id));
            }

            let mut completed = 0usize;
            let mut failed = 0usize;
            while let Some(joined) = join_set.join_next().await {
                let Ok(outcome) = joined else { continue };
                match outcome.result {
                    Ok(()) => completed += 1,
                    Err(error) => {
                        failed += 1;
                        let blocked = flow
                            .lock()
                            .block_descendants(&outcome.step_id)
                            .unwrap_or_default();
                        for id in &blocked {
                            publish_step_status(ctx, flow, id, "blocked");
                        }
                        swarm_sched!(
                            warn,
                            step = %outcome.step_id,
                            error = %error,
                            blocked = blocked.len(),
                            "level step failed"
                        );
                    }
                }
            }

            stats.finish(completed, failed);
            flow.lock().record_wave(stats);
            publish_flow_updated(ctx, flow);
            waves_run += 1;
        }

        watchdog.abort();

        // Anything still waiting sits behind a failure; settle it.
        {
            let mut guard = flow.lock();
            let leftover: Vec<String> = guard
                .steps()
                .filter(|s| !s.status.is_terminal() && s.status != StepStatus::Running)
                .map(|s| s.id.clone())
                .collect();
            for id in leftover {
                guard.mark_skipped(&id).ok();
            }
        }

        let progress = flow.lock().progress();
        Ok(WaveExecutionResult {
            total_waves: waves_run,
            total_steps: progress.total,
            completed_steps: progress.completed,
            failed_steps: progress.failed,
            skipped_steps: progress.skipped,
            duration_ms: started.elapsed().as_millis(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use parking_lot::Mutex;
    use swarm_core::SwarmConfig;
    use swarm_core::types::{ExecutionFlow, Role, Step};
    use swarm_gateway::{MockBackend, ModelGateway, ModelResponse};
    use swarm_tools::ToolRegistry;

    use crate::bus::EventBus;

    fn context(backend: MockBackend) -> TaskContext {
        TaskContext::new(
            "task-1",
            Arc::new(SwarmConfig::default()),
            Arc::new(ModelGateway::new(Arc::new(backend))),
            Arc::new(ToolRegistry::new()),
            EventBus::new(256),
        )
    }

    fn chain_flow() -> SharedFlow {
        let mut flow = ExecutionFlow::new("task-1");
        flow.add_step(Step::new("a", 1, "a", "first", Role::Writer)).unwrap();
        flow.add_step(Step::new("b", 2, "b", "second", Role::Writer).with_dependencies(["a"]))
            .unwrap();
        flow.add_step(Step::new("c", 3, "c", "third", Role::Writer).with_dependencies(["b"]))
            .unwrap();
        Arc::new(Mutex::new(flow))
    }

    #[tokio::test]
    async fn test_levels_run_in_sequence() {
        let ctx = context(MockBackend::with_responder(|_| {
            Ok(ModelResponse::new("level output", "mock"))
        }));
        let flow = chain_flow();

        let result = LevelScheduler::run(&ctx, &flow).await.unwrap();
        assert_eq!(result.total_waves, 3);
        assert_eq!(result.completed_steps, 3);
        assert_eq!(result.failed_steps, 0);
    }

    #[tokio::test]
    async fn test_failure_blocks_rest_of_chain_without_retry() {
        let ctx = context(MockBackend::with_responder(|request| {
            let text = &request.messages.last().unwrap().content;
            if text.contains("first") {
                // Empty output -> invalid_output.
                Ok(ModelResponse::new("", "mock"))
            } else {
                Ok(ModelResponse::new("ok", "mock"))
            }
        }));
        let flow = chain_flow();

        let result = LevelScheduler::run(&ctx, &flow).await.unwrap();
        assert_eq!(result.failed_steps, 1);
        assert_eq!(result.completed_steps, 0);

        let guard = flow.lock();
        assert_eq!(guard.step("a").unwrap().status, StepStatus::Failed);
        // Descendants were blocked mid-run, then settled as skipped.
        for id in ["b", "c"] {
            assert_eq!(guard.step(id).unwrap().status, StepStatus::Skipped);
        }
        // No retry in legacy mode.
        assert_eq!(guard.step("a").unwrap().retries, 0);
    }
}
