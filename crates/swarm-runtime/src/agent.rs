//! Sub-agent: executes a single DAG step.
//!
//! The loop is deliberately small: build the role prompt, drive the model
//! with streaming, resolve tool calls through the registry, feed results
//! back, and parse the final message as the step output. Model transport
//! retry lives in the gateway; this layer owns the tool-turn budget and
//! output validation.

use serde_json::json;
use swarm_core::swarm_agent;
use swarm_core::types::{RoleTemplate, Step};
use swarm_core::{Event, SwarmError, SwarmResult};
use swarm_gateway::{
    ChatMessage, CompletionRequest, ModelResponse, StreamSink, ToolChoice, strip_thinking,
};

use crate::context::TaskContext;

/// Cap on model turns that issue tool calls within one step.
const MAX_TOOL_TURNS: usize = 20;

/// Sink that republishes deltas as `agent_stream` events.
struct BusSink {
    bus: crate::bus::EventBus,
    task_id: String,
    agent_id: String,
}

impl StreamSink for BusSink {
    fn on_delta(&self, delta: &str, buffer: &str) {
        self.bus
            .publish(Event::agent_stream(&self.task_id, &self.agent_id, delta, buffer));
    }
}

pub struct SubAgent {
    pub agent_id: String,
    template: RoleTemplate,
}

impl SubAgent {
    pub fn new(agent_id: impl Into<String>, template: RoleTemplate) -> Self {
        Self {
            agent_id: agent_id.into(),
            template,
        }
    }

    /// Execute `step` to produce its output payload.
    ///
    /// `dependency_context` carries `(step name, output text)` pairs of
    /// the step's completed dependencies; oversized context is condensed
    /// by the gateway, not here.
    pub async fn execute(
        &self,
        ctx: &TaskContext,
        step: &Step,
        dependency_context: &[(String, String)],
    ) -> SwarmResult<serde_json::Value> {
        let mut messages = self.build_prompt(step, dependency_context);
        self.log(ctx, &format!("prompt built for step '{}'", step.name));

        let sink = BusSink {
            bus: ctx.bus.clone(),
            task_id: ctx.task_id.clone(),
            agent_id: self.agent_id.clone(),
        };

        let tool_definitions = ctx.tools.definitions_for(&self.template.tools);

        for turn in 0..=MAX_TOOL_TURNS {
            if ctx.cancel.is_cancelled() {
                return Err(SwarmError::Cancelled);
            }

            let request = CompletionRequest::new(messages.clone())
                .with_model(&self.template.model)
                .with_temperature(self.template.temperature)
                .with_tools(tool_definitions.clone())
                .with_tool_choice(ToolChoice::Auto);

            let response = ctx.gateway.complete(request, Some(&sink), &ctx.cancel).await?;

            if !response.has_tool_calls() {
                ctx.bus
                    .publish(Event::agent_stream_clear(&ctx.task_id, &self.agent_id));
                return self.parse_output(&response);
            }

            if turn == MAX_TOOL_TURNS {
                break;
            }

            messages.push(ChatMessage::assistant_with_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                // The shared budget is consumed per invocation; exhaustion
                // fails the step rather than silently degrading it.
                ctx.try_consume_tool_call()?;

                swarm_agent!(
                    debug,
                    agent = %self.agent_id,
                    tool = %call.name,
                    "resolving tool call"
                );
                self.log(ctx, &format!("invoking tool '{}'", call.name));

                let result = ctx
                    .tools
                    .dispatch(&call.name, call.arguments.clone(), &ctx.cancel)
                    .await;

                let content = match result {
                    Ok(value) => value.to_string(),
                    Err(SwarmError::Cancelled) => return Err(SwarmError::Cancelled),
                    // Handler failures go back to the model as content so
                    // it can recover with a different approach.
                    Err(error) => json!({ "error": error.to_string() }).to_string(),
                };
                messages.push(ChatMessage::tool_result(call.id.clone(), content));
            }
        }

        Err(SwarmError::ToolBudgetExhausted {
            budget: MAX_TOOL_TURNS as u64,
        })
    }

    fn build_prompt(
        &self,
        step: &Step,
        dependency_context: &[(String, String)],
    ) -> Vec<ChatMessage> {
        let mut task = format!("## Your step\n{}\n", step.description);
        if !step.expected_output.is_empty() {
            task.push_str(&format!("\n## Expected output\n{}\n", step.expected_output));
        }
        if let Some(input) = &step.input {
            task.push_str(&format!("\n## Input\n{input}\n"));
        }
        if !dependency_context.is_empty() {
            task.push_str("\n## Results from upstream steps\n");
            for (name, output) in dependency_context {
                task.push_str(&format!("\n### {name}\n{output}\n"));
            }
        }
        if self.template.structured_output {
            task.push_str("\nRespond with a single JSON object.\n");
        }

        vec![
            ChatMessage::system(self.template.system_prompt.clone()),
            ChatMessage::user(task),
        ]
    }

    fn parse_output(&self, response: &ModelResponse) -> SwarmResult<serde_json::Value> {
        let text = strip_thinking(&response.content);
        let text = text.trim();
        if text.is_empty() {
            return Err(SwarmError::InvalidOutput {
                message: "model returned an empty final message".to_string(),
            });
        }

        if self.template.structured_output {
            let body = extract_json_block(text);
            return serde_json::from_str::<serde_json::Value>(body).map_err(|e| {
                SwarmError::InvalidOutput {
                    message: format!("expected JSON object: {e}"),
                }
            });
        }
        Ok(serde_json::Value::String(text.to_string()))
    }

    fn log(&self, ctx: &TaskContext, message: &str) {
        ctx.bus
            .publish(Event::agent_log(&ctx.task_id, &self.agent_id, message));
    }
}

/// Pull the JSON body out of an optionally fenced response.
pub fn extract_json_block(text: &str) -> &str {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
        return rest.trim();
    }
    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
    }
    text.trim()
}
