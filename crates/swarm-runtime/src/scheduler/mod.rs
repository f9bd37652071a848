//! Step dispatch shared by both scheduler modes.
//!
//! The wave scheduler (`wave`) is the canonical engine: dynamic waves,
//! quality gates, mid-flow mutation. The level scheduler (`levels`) is
//! the legacy mode: waves fixed by the initial topological levels, no
//! mutation. Both dispatch steps through `run_step` below.

pub mod levels;
pub mod wave;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use swarm_core::swarm_sched;
use swarm_core::types::{ExecutionFlow, RoleTemplate, StepStatus};
use swarm_core::{ErrorKind, Event, EventKind, SwarmError, SwarmResult};

use crate::agent::SubAgent;
use crate::context::TaskContext;

/// The scheduler-owned DAG. Workers are part of the scheduler; nothing
/// else mutates through this handle. The lock is never held across an
/// await point.
pub type SharedFlow = Arc<Mutex<ExecutionFlow>>;

/// Result of one dispatched step.
pub struct StepOutcome {
    pub step_id: String,
    pub agent_id: String,
    pub result: SwarmResult<()>,
}

/// Execute one ready step end to end: acquire a concurrency ticket, mark
/// running, drive the sub-agent under the per-step timeout, and record
/// the terminal status.
pub(crate) async fn run_step(ctx: TaskContext, flow: SharedFlow, step_id: String) -> StepOutcome {
    let agent_slot = match ctx.acquire_agent_slot().await {
        Ok(permit) => permit,
        Err(_) => {
            return StepOutcome {
                step_id,
                agent_id: String::new(),
                result: Err(SwarmError::Cancelled),
            };
        }
    };

    // Snapshot what the worker needs, then release the lock before any
    // suspension point.
    let (step, dependency_context) = {
        let guard = flow.lock();
        let Some(step) = guard.step(&step_id).cloned() else {
            let id = step_id.clone();
            return StepOutcome {
                step_id,
                agent_id: String::new(),
                result: Err(SwarmError::NotFound { entity: "step", id }),
            };
        };
        let context: Vec<(String, String)> = step
            .dependencies
            .iter()
            .filter_map(|dep| {
                guard
                    .step(dep)
                    .and_then(|d| d.output_text().map(|o| (d.name.clone(), o)))
            })
            .collect();
        (step, context)
    };

    let agent_instance = ctx.create_agent(step.role);
    let agent_id = agent_instance.id.clone();
    ctx.bus.publish(Event::new(
        EventKind::AgentCreated,
        json!({
            "task_id": ctx.task_id,
            "agent": agent_instance,
            "step_id": step_id,
        }),
    ));

    if let Err(error) = flow.lock().mark_running(&step_id, &agent_id) {
        // Dependency regressed between readiness check and dispatch; an
        // engine invariant violation, surfaced to abort the task.
        ctx.remove_agent(&agent_id);
        return StepOutcome {
            step_id,
            agent_id,
            result: Err(error),
        };
    }
    publish_step_status(&ctx, &flow, &step_id, "running");

    let mut instance = agent_instance;
    instance.start(&step_id);
    ctx.update_agent(instance.clone());
    ctx.bus.publish(Event::new(
        EventKind::AgentUpdated,
        json!({ "task_id": ctx.task_id, "agent": instance }),
    ));

    let template = RoleTemplate::for_role(step.role);
    let sub_agent = SubAgent::new(&agent_id, template);
    let step_timeout = Duration::from_secs(ctx.config.agent_timeout);

    let execution = tokio::time::timeout(
        step_timeout,
        sub_agent.execute(&ctx, &step, &dependency_context),
    )
    .await;

    let result = match execution {
        Ok(Ok(output)) => {
            let mut guard = flow.lock();
            guard.mark_completed(&step_id, output).ok();
            guard
                .append_log(&step_id, format!("completed by agent {agent_id}"))
                .ok();
            Ok(())
        }
        Ok(Err(error)) => {
            let kind = error.kind();
            flow.lock().mark_failed(&step_id, kind, &error.to_string()).ok();
            Err(error)
        }
        Err(_) => {
            let error = SwarmError::Timeout {
                step_id: step_id.clone(),
                seconds: ctx.config.agent_timeout,
            };
            flow.lock()
                .mark_failed(&step_id, ErrorKind::Timeout, &error.to_string())
                .ok();
            Err(error)
        }
    };

    let success = result.is_ok();
    if !success {
        // Tell observers the partial stream buffer is dead; successful
        // completions emit this from the sub-agent itself.
        ctx.bus
            .publish(Event::agent_stream_clear(&ctx.task_id, &agent_id));
    }
    publish_step_status(
        &ctx,
        &flow,
        &step_id,
        if success { "completed" } else { "failed" },
    );

    instance.finish(success);
    ctx.update_agent(instance.clone());
    ctx.bus.publish(Event::new(
        EventKind::AgentUpdated,
        json!({ "task_id": ctx.task_id, "agent": instance }),
    ));
    ctx.remove_agent(&agent_id);
    ctx.bus.publish(Event::new(
        EventKind::AgentRemoved,
        json!({ "task_id": ctx.task_id, "agent_id": agent_id }),
    ));

    drop(agent_slot);

    StepOutcome {
        step_id,
        agent_id,
        result,
    }
}

/// Mark everything still live as cancelled/skipped after the task
/// context is cancelled: running steps fail, unstarted steps are skipped.
pub(crate) fn cancel_pass(ctx: &TaskContext, flow: &SharedFlow) {
    let mut guard = flow.lock();
    let step_ids: Vec<String> = guard.steps().map(|s| s.id.clone()).collect();
    for id in step_ids {
        let Some(status) = guard.step(&id).map(|s| s.status) else {
            continue;
        };
        match status {
            StepStatus::Running => {
                guard
                    .mark_failed(&id, ErrorKind::Cancelled, "execution cancelled")
                    .ok();
            }
            StepStatus::Pending | StepStatus::Waiting | StepStatus::Blocked => {
                guard.mark_skipped(&id).ok();
            }
            _ => {}
        }
    }
    drop(guard);
    swarm_sched!(info, task = %ctx.task_id, "cancel pass applied");
    publish_flow_updated(ctx, flow);
}

/// Arm the overall task deadline: when it expires, the shared cancel
/// token fires and every in-flight worker unwinds cooperatively.
pub(crate) fn spawn_deadline_watchdog(ctx: &TaskContext) -> tokio::task::JoinHandle<()> {
    let cancel = ctx.cancel.clone();
    let bus = ctx.bus.clone();
    let task_id = ctx.task_id.clone();
    let remaining = ctx.remaining_deadline();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(remaining) => {
                swarm_sched!(warn, task = %task_id, "execution timeout, cancelling task");
                bus.publish(Event::task_log(&task_id, "execution timeout reached"));
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    })
}

pub(crate) fn publish_step_status(ctx: &TaskContext, flow: &SharedFlow, step_id: &str, status: &str) {
    ctx.bus
        .publish(Event::step_status_changed(&ctx.task_id, step_id, status));
    let progress = flow.lock().progress();
    ctx.bus.publish(Event::new(
        EventKind::TaskProgress,
        json!({ "task_id": ctx.task_id, "progress": progress }),
    ));
}

pub(crate) fn publish_flow_updated(ctx: &TaskContext, flow: &SharedFlow) {
    let snapshot = flow.lock().snapshot();
    ctx.bus.publish(Event::new(
        EventKind::ExecutionFlowUpdated,
        json!({ "task_id": ctx.task_id, "flow": snapshot }),
    ));
}
