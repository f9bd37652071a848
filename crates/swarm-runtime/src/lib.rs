//! agent-swarm orchestration engine.
//!
//! Plans a user task into a DAG of role-typed steps, executes it in
//! dependency waves with bounded parallelism, gates each step's output
//! through a quality reviewer, and aggregates the results into one typed
//! artifact. See `Swarm` for the embedding API.

pub mod agent;
pub mod aggregator;
pub mod bus;
pub mod context;
pub mod recovery;
pub mod reviewer;
pub mod scheduler;
pub mod supervisor;

use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use swarm_core::types::{
    Artifact, ExecutionFlow, FlowSnapshot, OutputType, Progress, Task, TaskPlan, TaskResult,
    TaskStatus,
};
use swarm_core::{ErrorKind, Event, EventKind, SwarmConfig, SwarmError, SwarmResult};
use swarm_gateway::{LlmBackend, ModelGateway, StreamSink, ToolDefinition};
use swarm_tools::{SandboxCodeInterpreter, Tool, ToolRegistry};

pub use aggregator::Aggregator;
pub use bus::{EventBus, EventStream};
pub use context::TaskContext;
pub use reviewer::QualityGate;
pub use scheduler::levels::LevelScheduler;
pub use scheduler::wave::WaveScheduler;
pub use supervisor::Supervisor;

/// Which scheduling engine runs the DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Wave scheduler: dynamic waves, quality gates, mid-flow mutation.
    Team,
    /// Fixed topological levels, no mutation.
    Scheduler,
}

impl ExecutionMode {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "team" => Some(ExecutionMode::Team),
            "scheduler" => Some(ExecutionMode::Scheduler),
            _ => None,
        }
    }
}

struct TaskHandle {
    context: TaskContext,
    flow: scheduler::SharedFlow,
    status: Mutex<TaskStatus>,
    join: Mutex<Option<tokio::task::JoinHandle<TaskResult>>>,
}

struct SwarmInner {
    config: Arc<SwarmConfig>,
    gateway: Arc<ModelGateway>,
    tools: Arc<ToolRegistry>,
    interpreter: Arc<SandboxCodeInterpreter>,
    bus: EventBus,
    tasks: DashMap<String, Arc<TaskHandle>>,
    mode: RwLock<ExecutionMode>,
    workspace: PathBuf,
}

/// The embedding surface of the engine.
#[derive(Clone)]
pub struct Swarm {
    inner: Arc<SwarmInner>,
}

pub struct SwarmBuilder {
    config: SwarmConfig,
    backend: Option<Arc<dyn LlmBackend>>,
    workspace: Option<PathBuf>,
}

impl SwarmBuilder {
    pub fn with_config(mut self, config: SwarmConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_backend(mut self, backend: Arc<dyn LlmBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn build(self) -> SwarmResult<Swarm> {
        let backend = self
            .backend
            .ok_or_else(|| SwarmError::Config("an LLM backend is required".to_string()))?;
        Swarm::new(self.config, backend, self.workspace)
    }
}

impl Swarm {
    pub fn builder() -> SwarmBuilder {
        SwarmBuilder {
            config: SwarmConfig::default(),
            backend: None,
            workspace: None,
        }
    }

    pub fn new(
        config: SwarmConfig,
        backend: Arc<dyn LlmBackend>,
        workspace: Option<PathBuf>,
    ) -> SwarmResult<Self> {
        config.validate().map_err(SwarmError::Config)?;
        let workspace =
            workspace.unwrap_or_else(|| std::env::temp_dir().join("agent-swarm"));

        let gateway = Arc::new(
            ModelGateway::new(backend)
                .with_long_text_processing(config.enable_long_text_processing),
        );
        let interpreter = Arc::new(SandboxCodeInterpreter::new());
        let tools = Arc::new(ToolRegistry::new());
        tools.register(Arc::new(swarm_tools::SandboxBrowser::new()));
        tools.register(interpreter.clone() as Arc<dyn Tool>);
        tools.register(Arc::new(swarm_tools::ReadFileTool::new(&workspace)));
        tools.register(Arc::new(swarm_tools::WriteFileTool::new(&workspace)));

        let mode = if config.enable_team_mode {
            ExecutionMode::Team
        } else {
            ExecutionMode::Scheduler
        };

        let bus = EventBus::new(config.event_backlog);
        let inner = Arc::new(SwarmInner {
            config: Arc::new(config),
            gateway,
            tools,
            interpreter: interpreter.clone(),
            bus,
            tasks: DashMap::new(),
            mode: RwLock::new(mode),
            workspace: workspace.clone(),
        });

        // Reclaim sandboxes a previous process left behind, when a
        // runtime is available to do it on.
        let leftovers = recovery::take_recovery(&workspace);
        if !leftovers.is_empty() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                let interpreter = interpreter.clone();
                handle.spawn(async move {
                    for instance in leftovers {
                        interpreter.release_instance(&instance).await;
                    }
                });
            }
        }

        Ok(Self { inner })
    }

    /// Enqueue a task and return immediately with its id.
    pub fn submit(&self, content: impl Into<String>, output_type: OutputType) -> String {
        let task = Task::new(content).with_output_type(output_type);
        let task_id = task.id.clone();
        let handle = self.register(&task);

        let inner = self.inner.clone();
        let join = tokio::spawn(async move { run_task(inner, task, None).await });
        *handle.join.lock() = Some(join);
        task_id
    }

    /// Submit and await: the convenience single-call path.
    pub async fn execute(
        &self,
        content: impl Into<String>,
        output_type: OutputType,
        sink: Option<&dyn StreamSink>,
    ) -> TaskResult {
        let task = Task::new(content).with_output_type(output_type);
        self.execute_task_with_sink(task, sink).await
    }

    /// Run a pre-built task.
    pub async fn execute_task(&self, task: Task) -> TaskResult {
        self.execute_task_with_sink(task, None).await
    }

    async fn execute_task_with_sink(
        &self,
        task: Task,
        sink: Option<&dyn StreamSink>,
    ) -> TaskResult {
        self.register(&task);
        run_task(self.inner.clone(), task, sink).await
    }

    /// Run a task against an already-synthesized plan, skipping the
    /// supervisor entirely.
    pub async fn execute_with_plan(&self, task: Task, plan: TaskPlan) -> TaskResult {
        let handle = self.register(&task);
        run_planned(self.inner.clone(), handle, task, plan).await
    }

    /// Cancel a task's context. Returns false for unknown ids.
    pub fn cancel(&self, task_id: &str) -> bool {
        match self.inner.tasks.get(task_id) {
            Some(handle) => {
                handle.context.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn progress(&self, task_id: &str) -> Option<Progress> {
        self.inner
            .tasks
            .get(task_id)
            .map(|handle| handle.flow.lock().progress())
    }

    pub fn flow(&self, task_id: &str) -> Option<FlowSnapshot> {
        self.inner
            .tasks
            .get(task_id)
            .map(|handle| handle.flow.lock().snapshot())
    }

    pub fn task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.inner
            .tasks
            .get(task_id)
            .map(|handle| *handle.status.lock())
    }

    /// Register an observer on the event bus.
    pub fn subscribe(&self) -> EventStream {
        self.inner.bus.subscribe()
    }

    pub fn register_tool(&self, tool: Arc<dyn Tool>) {
        self.inner.tools.register(tool);
    }

    pub fn unregister_tool(&self, name: &str) -> bool {
        self.inner.tools.unregister(name)
    }

    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.inner.tools.definitions()
    }

    /// Select "team" (wave scheduler) or "scheduler" (fixed levels).
    pub fn set_execution_mode(&self, mode: &str) -> SwarmResult<()> {
        let parsed = ExecutionMode::parse(mode)
            .ok_or_else(|| SwarmError::Config(format!("unknown execution mode '{mode}'")))?;
        *self.inner.mode.write() = parsed;
        Ok(())
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        *self.inner.mode.read()
    }

    /// Cancel everything, wait for tasks to settle, and persist the
    /// sandbox recovery file.
    pub async fn shutdown(&self) {
        for entry in self.inner.tasks.iter() {
            entry.value().context.cancel.cancel();
        }
        let joins: Vec<tokio::task::JoinHandle<TaskResult>> = self
            .inner
            .tasks
            .iter()
            .filter_map(|entry| entry.value().join.lock().take())
            .collect();
        for join in joins {
            let _ = join.await;
        }

        let open = self.inner.interpreter.open_instances();
        if let Err(error) = recovery::write_recovery(&self.inner.workspace, &open) {
            tracing::warn!(
                target: "swarm::recovery",
                error = %error,
                "failed to persist sandbox recovery file"
            );
        }
    }

    fn register(&self, task: &Task) -> Arc<TaskHandle> {
        let context = TaskContext::new(
            task.id.clone(),
            self.inner.config.clone(),
            self.inner.gateway.clone(),
            self.inner.tools.clone(),
            self.inner.bus.clone(),
        );
        let handle = Arc::new(TaskHandle {
            context,
            flow: Arc::new(Mutex::new(ExecutionFlow::new(task.id.clone()))),
            status: Mutex::new(TaskStatus::Created),
            join: Mutex::new(None),
        });
        self.inner.tasks.insert(task.id.clone(), handle.clone());
        self.inner.bus.publish(Event::new(
            EventKind::TaskCreated,
            json!({ "task": task }),
        ));
        handle
    }
}

async fn run_task(
    inner: Arc<SwarmInner>,
    task: Task,
    sink: Option<&dyn StreamSink>,
) -> TaskResult {
    let Some(handle) = inner.tasks.get(&task.id).map(|h| Arc::clone(h.value())) else {
        return TaskResult::failure(&task.id, ErrorKind::Internal, "task not registered", None);
    };

    set_status(&inner, &handle, &task, TaskStatus::Planning);
    let plan = match Supervisor::plan(&handle.context, &task, sink).await {
        Ok(plan) => plan,
        Err(error) => {
            let result = TaskResult::failure(&task.id, error.kind(), error.to_string(), None);
            finish(&inner, &handle, &task, &result);
            return result;
        }
    };

    if plan.simple_direct {
        let answer = plan.direct_answer.unwrap_or_default();
        let result = TaskResult::success(
            &task.id,
            Artifact::Text {
                output_type: OutputType::Report,
                content: answer,
            },
        );
        finish(&inner, &handle, &task, &result);
        return result;
    }

    run_planned(inner, handle, task, plan).await
}

async fn run_planned(
    inner: Arc<SwarmInner>,
    handle: Arc<TaskHandle>,
    task: Task,
    plan: TaskPlan,
) -> TaskResult {
    if let Err(defect) = plan.validate() {
        let result = TaskResult::failure(&task.id, ErrorKind::PlanUnparseable, defect, None);
        finish(&inner, &handle, &task, &result);
        return result;
    }

    {
        let mut flow = handle.flow.lock();
        for planned in plan.steps.iter().cloned() {
            if let Err(error) = flow.add_step(planned.into_step()) {
                drop(flow);
                let result =
                    TaskResult::failure(&task.id, error.kind(), error.to_string(), None);
                finish(&inner, &handle, &task, &result);
                return result;
            }
        }
    }
    scheduler::publish_flow_updated(&handle.context, &handle.flow);

    set_status(&inner, &handle, &task, TaskStatus::Executing);
    let mode = *inner.mode.read();
    let run = match mode {
        ExecutionMode::Team => WaveScheduler::run(&handle.context, &handle.flow).await,
        ExecutionMode::Scheduler => LevelScheduler::run(&handle.context, &handle.flow).await,
    };

    set_status(&inner, &handle, &task, TaskStatus::Aggregating);
    inner.bus.publish(Event::new(
        EventKind::OutputProgress,
        json!({ "task_id": task.id, "stage": "aggregating" }),
    ));

    let (bundle, progress, first_failure) = {
        let flow = handle.flow.lock();
        let bundle = Aggregator::aggregate(&flow, &task);
        let progress = flow.progress();
        let first_failure = flow
            .steps()
            .filter(|s| s.status == swarm_core::types::StepStatus::Failed)
            .min_by_key(|s| s.number)
            .map(|s| {
                (
                    s.error_kind.unwrap_or(ErrorKind::Internal),
                    s.error.clone().unwrap_or_default(),
                )
            });
        (bundle, progress, first_failure)
    };

    for dropped in &bundle.dropped {
        inner.bus.publish(Event::task_log(
            &task.id,
            &format!("dropped overlapping output of step '{dropped}'"),
        ));
    }

    let partial = (!bundle.artifact.is_empty()).then_some(bundle.artifact.clone());

    let result = if handle.context.cancel.is_cancelled() {
        TaskResult::failure(&task.id, ErrorKind::Cancelled, "task cancelled", partial)
    } else {
        match run {
            Err(error) => TaskResult::failure(&task.id, error.kind(), error.to_string(), partial),
            Ok(_) if progress.failed > 0 => {
                let (kind, detail) = first_failure
                    .unwrap_or((ErrorKind::Internal, "step failure".to_string()));
                TaskResult::failure(&task.id, kind, detail, partial)
            }
            Ok(_) => TaskResult::success(&task.id, bundle.artifact.clone()),
        }
    };

    finish(&inner, &handle, &task, &result);
    result
}

fn set_status(inner: &Arc<SwarmInner>, handle: &Arc<TaskHandle>, task: &Task, status: TaskStatus) {
    *handle.status.lock() = status;
    inner.bus.publish(Event::new(
        EventKind::TaskUpdated,
        json!({ "task_id": task.id, "status": status }),
    ));
}

fn finish(inner: &Arc<SwarmInner>, handle: &Arc<TaskHandle>, task: &Task, result: &TaskResult) {
    let status = if result.success {
        TaskStatus::Completed
    } else if matches!(result.error_kind, Some(ErrorKind::Cancelled)) {
        TaskStatus::Cancelled
    } else {
        TaskStatus::Failed
    };
    *handle.status.lock() = status;
    inner.bus.publish(Event::new(
        EventKind::TaskCompleted,
        json!({
            "task_id": task.id,
            "success": result.success,
            "error_kind": result.error_kind,
        }),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarm_gateway::MockBackend;

    #[tokio::test]
    async fn test_builder_requires_backend() {
        assert!(Swarm::builder().build().is_err());
    }

    #[tokio::test]
    async fn test_mode_switching() {
        let swarm = Swarm::builder()
            .with_backend(Arc::new(MockBackend::echo()))
            .build()
            .unwrap();
        assert_eq!(swarm.execution_mode(), ExecutionMode::Team);
        swarm.set_execution_mode("scheduler").unwrap();
        assert_eq!(swarm.execution_mode(), ExecutionMode::Scheduler);
        assert!(swarm.set_execution_mode("turbo").is_err());
    }

    #[tokio::test]
    async fn test_tool_registration_surface() {
        let swarm = Swarm::builder()
            .with_backend(Arc::new(MockBackend::echo()))
            .build()
            .unwrap();
        let names: Vec<String> = swarm.list_tools().into_iter().map(|d| d.name).collect();
        assert!(names.contains(&"sandbox_browser".to_string()));
        assert!(names.contains(&"sandbox_code_interpreter".to_string()));
        assert!(swarm.unregister_tool("read_file"));
        assert!(!swarm.unregister_tool("read_file"));
    }

    #[tokio::test]
    async fn test_cancel_unknown_task() {
        let swarm = Swarm::builder()
            .with_backend(Arc::new(MockBackend::echo()))
            .build()
            .unwrap();
        assert!(!swarm.cancel("no-such-task"));
        assert!(swarm.progress("no-such-task").is_none());
        assert!(swarm.flow("no-such-task").is_none());
    }
}
