//! Supervisor: intent analysis and plan synthesis.
//!
//! A bounded ReAct loop over the gateway. Phase one sizes the task up
//! (complexity, direct-answer potential); trivial tasks short-circuit to
//! a direct answer with no DAG. Complex tasks get optional background
//! research, a task rewrite, and an ordered step plan whose dependencies
//! reference earlier steps only. If the model never produces a parsable
//! plan, a single-researcher fallback plan ships instead.

use serde::Deserialize;
use serde_json::json;
use swarm_core::swarm_plan;
use swarm_core::types::{OutputType, PlannedStep, Role, Task, TaskPlan};
use swarm_core::{Event, SwarmResult};
use swarm_gateway::{ChatMessage, CompletionRequest, StreamSink, ToolChoice, strip_thinking};

use crate::agent::extract_json_block;
use crate::context::TaskContext;

/// Tool rounds allowed during the research phase.
const MAX_RESEARCH_ROUNDS: usize = 3;

#[derive(Debug, Deserialize)]
struct QuickUnderstanding {
    #[serde(default)]
    is_simple: bool,
    #[serde(default = "default_complexity")]
    complexity: f64,
    #[serde(default)]
    can_answer_directly: bool,
    #[serde(default)]
    direct_answer: Option<String>,
    #[serde(default)]
    understanding: String,
    #[serde(default)]
    output_type: Option<String>,
}

fn default_complexity() -> f64 {
    5.0
}

#[derive(Debug, Deserialize)]
struct PlanDocument {
    #[serde(default)]
    refined_task: Option<String>,
    #[serde(default)]
    key_objectives: Vec<String>,
    #[serde(default)]
    steps: Vec<PlanStep>,
}

#[derive(Debug, Deserialize)]
struct PlanStep {
    #[serde(default)]
    step_id: Option<String>,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    agent_type: Option<String>,
    #[serde(default)]
    expected_output: String,
    #[serde(default)]
    dependencies: Vec<String>,
}

pub struct Supervisor;

impl Supervisor {
    /// Analyze `task` and produce its plan.
    pub async fn plan(
        ctx: &TaskContext,
        task: &Task,
        sink: Option<&dyn StreamSink>,
    ) -> SwarmResult<TaskPlan> {
        let quick = Self::quick_understand(ctx, task, sink).await;

        if quick.can_answer_directly
            && quick.is_simple
            && quick.complexity < ctx.config.complexity_threshold
        {
            let answer = match quick.direct_answer {
                Some(answer) if !answer.trim().is_empty() => answer,
                _ => Self::direct_answer(ctx, task, sink).await?,
            };
            swarm_plan!(info, task = %task.id, "trivial task answered directly");
            let mut plan = TaskPlan::direct(task.content.clone(), answer);
            plan.estimated_complexity = quick.complexity;
            return Ok(plan);
        }

        let research = if ctx.config.supervisor.enable_research
            && quick.complexity >= ctx.config.complexity_threshold
        {
            Self::research(ctx, task, &quick.understanding, sink).await
        } else {
            None
        };

        let mut plan = Self::synthesize_plan(ctx, task, &quick, research.as_deref(), sink).await;
        plan.estimated_complexity = quick.complexity;
        plan.background_research = research;
        Ok(plan)
    }

    async fn quick_understand(
        ctx: &TaskContext,
        task: &Task,
        sink: Option<&dyn StreamSink>,
    ) -> QuickUnderstanding {
        let attachments = if task.files.is_empty() {
            String::new()
        } else {
            let listing: Vec<String> = task
                .files
                .iter()
                .map(|f| format!("- {} ({}, {} bytes)", f.name, f.mime, f.size))
                .collect();
            format!("\n## Attached files\n{}\n", listing.join("\n"))
        };

        let prompt = format!(
            "Assess the user task below before any work starts.\n\n\
             ## Task\n{content}\n{attachments}\n\
             Respond with JSON only:\n\
             {{\"is_simple\": bool, \"complexity\": 1-10, \"can_answer_directly\": bool, \
             \"direct_answer\": \"answer text or null\", \"understanding\": \"one-line intent\", \
             \"output_type\": \"report|code|website|image|video|dataset|document|composite\"}}\n\n\
             A greeting, a trivial factual query, or a matter of opinion you are confident about \
             is simple and directly answerable. Anything needing research, multiple work products, \
             or tools is not.",
            content = task.content
        );

        let request = CompletionRequest::new(vec![ChatMessage::user(prompt)]).with_temperature(0.2);
        let response = match ctx.gateway.complete(request, sink, &ctx.cancel).await {
            Ok(response) => response,
            Err(error) => {
                swarm_plan!(warn, error = %error, "quick understanding failed, assuming complex");
                return QuickUnderstanding {
                    is_simple: false,
                    complexity: default_complexity(),
                    can_answer_directly: false,
                    direct_answer: None,
                    understanding: task.content.chars().take(100).collect(),
                    output_type: None,
                };
            }
        };

        let cleaned = strip_thinking(&response.content);
        serde_json::from_str(extract_json_block(&cleaned)).unwrap_or(QuickUnderstanding {
            is_simple: false,
            complexity: default_complexity(),
            can_answer_directly: false,
            direct_answer: None,
            understanding: task.content.chars().take(100).collect(),
            output_type: None,
        })
    }

    async fn direct_answer(
        ctx: &TaskContext,
        task: &Task,
        sink: Option<&dyn StreamSink>,
    ) -> SwarmResult<String> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("Answer the user directly, concisely, and helpfully."),
            ChatMessage::user(task.content.clone()),
        ]);
        let response = ctx.gateway.complete(request, sink, &ctx.cancel).await?;
        Ok(strip_thinking(&response.content).trim().to_string())
    }

    /// Background research: a short tool loop over the browser tool. Any
    /// failure degrades to "no research" rather than failing the plan.
    async fn research(
        ctx: &TaskContext,
        task: &Task,
        understanding: &str,
        sink: Option<&dyn StreamSink>,
    ) -> Option<String> {
        let tools = ctx
            .tools
            .definitions_for(&["sandbox_browser".to_string()]);

        let mut messages = vec![
            ChatMessage::system(
                "You research background for a task before planning. Search where it helps, \
                 then produce a compact brief of the facts a planner needs. Wrap any \
                 reasoning in [THINKING]...[/THINKING] markers.",
            ),
            ChatMessage::user(format!(
                "## Task\n{}\n\n## Current understanding\n{understanding}",
                task.content
            )),
        ];

        for _ in 0..MAX_RESEARCH_ROUNDS {
            let request = CompletionRequest::new(messages.clone())
                .with_temperature(0.3)
                .with_tools(tools.clone())
                .with_tool_choice(ToolChoice::Auto);

            let response = match ctx.gateway.complete(request, sink, &ctx.cancel).await {
                Ok(response) => response,
                Err(error) => {
                    swarm_plan!(warn, error = %error, "research phase failed, continuing without");
                    return None;
                }
            };

            if !response.has_tool_calls() {
                let brief = strip_thinking(&response.content).trim().to_string();
                return (!brief.is_empty()).then_some(brief);
            }

            messages.push(ChatMessage::assistant_with_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));
            for call in &response.tool_calls {
                let content = match ctx.try_consume_tool_call() {
                    Ok(_) => match ctx
                        .tools
                        .dispatch(&call.name, call.arguments.clone(), &ctx.cancel)
                        .await
                    {
                        Ok(value) => value.to_string(),
                        Err(error) => json!({"error": error.to_string()}).to_string(),
                    },
                    Err(error) => json!({"error": error.to_string()}).to_string(),
                };
                messages.push(ChatMessage::tool_result(call.id.clone(), content));
            }
        }
        None
    }

    /// The planning loop proper: ask for a plan document, validate it,
    /// feed defects back, fall back to the single-step plan when the
    /// iteration budget runs dry.
    async fn synthesize_plan(
        ctx: &TaskContext,
        task: &Task,
        quick: &QuickUnderstanding,
        research: Option<&str>,
        sink: Option<&dyn StreamSink>,
    ) -> TaskPlan {
        let roles: Vec<&str> = Role::assignable().iter().map(Role::as_str).collect();
        let output_type = quick
            .output_type
            .as_deref()
            .unwrap_or(match task.output_type {
                OutputType::Auto => "report",
                other => {
                    // Serde tag doubles as the wire name.
                    match other {
                        OutputType::Code => "code",
                        OutputType::Website => "website",
                        OutputType::Image => "image",
                        OutputType::Video => "video",
                        OutputType::Dataset => "dataset",
                        OutputType::Document => "document",
                        OutputType::Composite => "composite",
                        _ => "report",
                    }
                }
            });

        let mut messages = vec![
            ChatMessage::system(format!(
                "You are the supervisor of an AI team. Rewrite the task precisely, then plan \
                 ordered steps for specialist agents. Wrap reasoning in \
                 [THINKING]...[/THINKING] markers and finish with JSON only:\n\
                 {{\"refined_task\": \"...\", \"key_objectives\": [\"...\"], \"steps\": [\
                 {{\"step_id\": \"step_1\", \"name\": \"...\", \"description\": \"...\", \
                 \"role\": \"one of {roles:?}\", \"expected_output\": \"...\", \
                 \"dependencies\": [\"earlier step_id\"]}}]}}\n\
                 Rules: every step has exactly one role; dependencies may reference earlier \
                 steps only; prefer parallel steps when work is independent; the final step \
                 must produce the deliverable ({output_type})."
            )),
            ChatMessage::user(format!(
                "## Task\n{}\n\n## Understanding\n{}\n{}",
                task.content,
                quick.understanding,
                research
                    .map(|r| format!("\n## Background research\n{r}"))
                    .unwrap_or_default()
            )),
        ];

        let iterations = ctx.config.supervisor.max_react_iterations;
        for iteration in 0..iterations {
            let request = CompletionRequest::new(messages.clone()).with_temperature(0.2);
            let response = match ctx.gateway.complete(request, sink, &ctx.cancel).await {
                Ok(response) => response,
                Err(error) => {
                    swarm_plan!(warn, iteration, error = %error, "plan synthesis call failed");
                    continue;
                }
            };

            let cleaned = strip_thinking(&response.content);
            match Self::parse_plan(task, &cleaned) {
                Ok(plan) => {
                    swarm_plan!(
                        info,
                        task = %task.id,
                        steps = plan.steps.len(),
                        iteration,
                        "plan accepted"
                    );
                    return plan;
                }
                Err(defect) => {
                    swarm_plan!(debug, iteration, defect = %defect, "plan rejected");
                    messages.push(ChatMessage::assistant(response.content.clone()));
                    messages.push(ChatMessage::user(format!(
                        "That plan is invalid: {defect}. Emit corrected JSON only."
                    )));
                }
            }
        }

        swarm_plan!(
            warn,
            task = %task.id,
            iterations,
            "no parsable plan, using fallback"
        );
        ctx.bus.publish(Event::task_log(
            &ctx.task_id,
            "planner output unparseable, falling back to a single research step",
        ));
        TaskPlan::fallback(&task.content)
    }

    fn parse_plan(task: &Task, content: &str) -> Result<TaskPlan, String> {
        let document: PlanDocument = serde_json::from_str(extract_json_block(content))
            .map_err(|e| format!("not valid JSON ({e})"))?;

        if document.steps.is_empty() {
            return Err("plan contains no steps".to_string());
        }

        let mut steps = Vec::with_capacity(document.steps.len());
        let mut seen: Vec<String> = Vec::new();
        for (index, raw) in document.steps.into_iter().enumerate() {
            let step_id = raw
                .step_id
                .unwrap_or_else(|| format!("step_{}", index + 1));
            let role_name = raw.role.or(raw.agent_type).unwrap_or_default();
            let role = Role::parse(&role_name).unwrap_or(Role::Researcher);

            // Drop references the model invented; forward-only is enforced
            // by keeping ids of earlier steps only.
            let dependencies: Vec<String> = raw
                .dependencies
                .into_iter()
                .filter(|dep| seen.contains(dep))
                .collect();

            seen.push(step_id.clone());
            steps.push(PlannedStep {
                step_id,
                step_number: (index + 1) as u32,
                name: raw.name,
                description: raw.description,
                role,
                expected_output: raw.expected_output,
                dependencies,
            });
        }

        let suggested_roles: Vec<Role> = {
            let mut roles: Vec<Role> = steps.iter().map(|s| s.role).collect();
            roles.dedup();
            roles
        };

        let plan = TaskPlan {
            refined_task: document
                .refined_task
                .unwrap_or_else(|| task.content.clone()),
            key_objectives: document.key_objectives,
            simple_direct: false,
            direct_answer: None,
            steps,
            suggested_roles,
            estimated_complexity: 5.0,
            background_research: None,
        };
        plan.validate()?;
        Ok(plan)
    }
}
