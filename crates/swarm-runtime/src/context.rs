//! Per-task execution context.
//!
//! Everything a task's workers share: configuration, the cancellation
//! token, the agent-slot semaphore, the tool-call budget, the gateway,
//! the tool registry, the event bus, and the agent-instance registry.
//! The context is cheap to clone; all interior state is shared.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use swarm_core::types::{AgentInstance, Role, RoleTemplate};
use swarm_core::{CancelToken, SwarmConfig, SwarmError, SwarmResult};
use swarm_gateway::ModelGateway;
use swarm_tools::ToolRegistry;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::bus::EventBus;

#[derive(Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub config: Arc<SwarmConfig>,
    pub cancel: CancelToken,
    pub gateway: Arc<ModelGateway>,
    pub tools: Arc<ToolRegistry>,
    pub bus: EventBus,
    /// Single writer: the scheduler. Observers read snapshots.
    agents: Arc<DashMap<String, AgentInstance>>,
    agent_slots: Arc<Semaphore>,
    tool_calls_used: Arc<AtomicU64>,
    started: Instant,
}

impl TaskContext {
    pub fn new(
        task_id: impl Into<String>,
        config: Arc<SwarmConfig>,
        gateway: Arc<ModelGateway>,
        tools: Arc<ToolRegistry>,
        bus: EventBus,
    ) -> Self {
        let agent_slots = Arc::new(Semaphore::new(config.max_concurrent_agents));
        Self {
            task_id: task_id.into(),
            config,
            cancel: CancelToken::new(),
            gateway,
            tools,
            bus,
            agents: Arc::new(DashMap::new()),
            agent_slots,
            tool_calls_used: Arc::new(AtomicU64::new(0)),
            started: Instant::now(),
        }
    }

    /// Acquire one of the `max_concurrent_agents` tickets, or bail on
    /// cancellation.
    pub async fn acquire_agent_slot(&self) -> SwarmResult<OwnedSemaphorePermit> {
        tokio::select! {
            permit = self.agent_slots.clone().acquire_owned() => {
                permit.map_err(|_| SwarmError::Cancelled)
            }
            _ = self.cancel.cancelled() => Err(SwarmError::Cancelled),
        }
    }

    /// Consume one tool-call slot from the shared per-task budget.
    ///
    /// Atomic: concurrent sub-agents may race, but at most
    /// `max_tool_calls` consumptions ever succeed.
    pub fn try_consume_tool_call(&self) -> SwarmResult<u64> {
        let budget = self.config.max_tool_calls;
        let mut used = self.tool_calls_used.load(Ordering::SeqCst);
        loop {
            if used >= budget {
                return Err(SwarmError::ToolBudgetExhausted { budget });
            }
            match self.tool_calls_used.compare_exchange(
                used,
                used + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(used + 1),
                Err(actual) => used = actual,
            }
        }
    }

    pub fn tool_calls_used(&self) -> u64 {
        self.tool_calls_used.load(Ordering::SeqCst)
    }

    /// Materialise a role template into a registered agent instance.
    pub fn create_agent(&self, role: Role) -> AgentInstance {
        let template = RoleTemplate::for_role(role);
        let agent = AgentInstance::new(role, template.display_name, template.avatar);
        self.agents.insert(agent.id.clone(), agent.clone());
        agent
    }

    pub fn update_agent(&self, agent: AgentInstance) {
        self.agents.insert(agent.id.clone(), agent);
    }

    pub fn remove_agent(&self, agent_id: &str) -> Option<AgentInstance> {
        self.agents.remove(agent_id).map(|(_, agent)| agent)
    }

    pub fn agent(&self, agent_id: &str) -> Option<AgentInstance> {
        self.agents.get(agent_id).map(|entry| entry.value().clone())
    }

    pub fn agents_snapshot(&self) -> Vec<AgentInstance> {
        let mut agents: Vec<AgentInstance> =
            self.agents.iter().map(|entry| entry.value().clone()).collect();
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        agents
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Remaining wall-clock before the overall task deadline.
    pub fn remaining_deadline(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.execution_timeout)
            .saturating_sub(self.started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use swarm_gateway::MockBackend;

    fn context(max_tool_calls: u64, max_agents: usize) -> TaskContext {
        let config = SwarmConfig::new()
            .with_max_tool_calls(max_tool_calls)
            .with_max_concurrent_agents(max_agents);
        TaskContext::new(
            "task-1",
            Arc::new(config),
            Arc::new(ModelGateway::new(Arc::new(MockBackend::echo()))),
            Arc::new(ToolRegistry::new()),
            EventBus::new(64),
        )
    }

    #[tokio::test]
    async fn test_tool_budget_enforced() {
        let ctx = context(3, 4);
        assert_eq!(ctx.try_consume_tool_call().unwrap(), 1);
        assert_eq!(ctx.try_consume_tool_call().unwrap(), 2);
        assert_eq!(ctx.try_consume_tool_call().unwrap(), 3);
        let err = ctx.try_consume_tool_call().unwrap_err();
        assert!(matches!(err, SwarmError::ToolBudgetExhausted { budget: 3 }));
        assert_eq!(ctx.tool_calls_used(), 3);
    }

    #[tokio::test]
    async fn test_budget_under_contention() {
        let ctx = context(50, 4);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                let mut granted = 0u64;
                for _ in 0..10 {
                    if ctx.try_consume_tool_call().is_ok() {
                        granted += 1;
                    }
                }
                granted
            }));
        }
        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 50);
        assert_eq!(ctx.tool_calls_used(), 50);
    }

    #[tokio::test]
    async fn test_agent_slots_bounded() {
        let ctx = context(10, 2);
        let first = ctx.acquire_agent_slot().await.unwrap();
        let _second = ctx.acquire_agent_slot().await.unwrap();

        // Third acquisition must block until a permit returns.
        let ctx_clone = ctx.clone();
        let waiter = tokio::spawn(async move { ctx_clone.acquire_agent_slot().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let permit = tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(permit.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_slot_observes_cancellation() {
        let ctx = context(10, 1);
        let _held = ctx.acquire_agent_slot().await.unwrap();
        ctx.cancel.cancel();
        let err = ctx.acquire_agent_slot().await.unwrap_err();
        assert!(matches!(err, SwarmError::Cancelled));
    }

    #[test]
    fn test_agent_registry() {
        let ctx = context(10, 2);
        let agent = ctx.create_agent(Role::Writer);
        assert!(ctx.agent(&agent.id).is_some());
        assert_eq!(ctx.agents_snapshot().len(), 1);
        ctx.remove_agent(&agent.id);
        assert!(ctx.agent(&agent.id).is_none());
    }
}
