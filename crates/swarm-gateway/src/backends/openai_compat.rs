//! OpenAI-compatible chat-completions backend.
//!
//! Covers any endpoint speaking the `/chat/completions` dialect,
//! including DashScope's compatible mode, which is how the Qwen family
//! and its sibling models are reached.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use swarm_core::CancelToken;

use crate::backends::{LlmBackend, ModelCapabilities};
use crate::request::{CompletionRequest, MessageRole, ToolChoice};
use crate::response::{FinishReason, ModelResponse, TokenUsage, ToolCallData};
use crate::sink::StreamSink;

const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
const DEFAULT_MODEL: &str = "qwen3-max";

pub struct OpenAiCompatBackend {
    api_key: String,
    base_url: String,
    default_model: String,
    served_models: Vec<String>,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    pub fn new(api_key: &str, config: Option<serde_json::Value>) -> anyhow::Result<Self> {
        let base_url = config
            .as_ref()
            .and_then(|c| c.get("base_url"))
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        let default_model = config
            .as_ref()
            .and_then(|c| c.get("model"))
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_MODEL)
            .to_string();

        let served_models = config
            .as_ref()
            .and_then(|c| c.get("models"))
            .and_then(|v| v.as_array())
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_else(|| vec![default_model.clone()]);

        Ok(Self {
            api_key: api_key.to_string(),
            base_url,
            default_model,
            served_models,
            client: reqwest::Client::new(),
        })
    }

    fn build_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|message| {
                let role = match message.role {
                    MessageRole::System => "system",
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                    MessageRole::Tool => "tool",
                };
                let mut value = json!({ "role": role, "content": message.content });
                if !message.tool_calls.is_empty() {
                    value["tool_calls"] = message
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                }
                if let Some(call_id) = &message.tool_call_id {
                    value["tool_call_id"] = json!(call_id);
                }
                value
            })
            .collect();

        let model = if request.model.is_empty() {
            &self.default_model
        } else {
            &request.model
        };

        let mut body = json!({
            "model": model,
            "messages": messages,
            "temperature": request.temperature,
            "stream": stream,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        if request.has_tools() {
            body["tools"] = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": tool.parameters,
                        }
                    })
                })
                .collect();
            body["tool_choice"] = match &request.tool_choice {
                ToolChoice::Auto => json!("auto"),
                ToolChoice::None => json!("none"),
                ToolChoice::Required => json!("required"),
                ToolChoice::Specific(name) => json!({
                    "type": "function",
                    "function": { "name": name }
                }),
            };
        }

        body
    }

    async fn chat_blocking(&self, request: &CompletionRequest) -> anyhow::Result<ModelResponse> {
        let body = self.build_body(request, false);
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("connection failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("chat completion failed (status {status}): {text}");
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("invalid completion payload: {e}"))?;
        self.parse_completion(completion)
    }

    async fn chat_streaming(
        &self,
        request: &CompletionRequest,
        sink: &dyn StreamSink,
        cancel: &CancelToken,
    ) -> anyhow::Result<ModelResponse> {
        let body = self.build_body(request, true);
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("connection failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("chat completion failed (status {status}): {text}");
        }

        let mut stream = response.bytes_stream();
        let mut line_buffer = String::new();
        let mut accumulator = StreamAccumulator::default();

        while let Some(chunk) = tokio::select! {
            chunk = stream.next() => chunk,
            _ = cancel.cancelled() => anyhow::bail!("stream cancelled"),
        } {
            let bytes = chunk.map_err(|e| anyhow::anyhow!("connection interrupted: {e}"))?;
            line_buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = line_buffer.find('\n') {
                let line: String = line_buffer.drain(..=newline).collect();
                let line = line.trim();
                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload == "[DONE]" {
                    continue;
                }
                if let Ok(delta) = serde_json::from_str::<ChatCompletionChunk>(payload) {
                    accumulator.absorb(delta, sink);
                }
            }
        }

        Ok(accumulator.into_response(&self.default_model))
    }

    fn parse_completion(&self, completion: ChatCompletion) -> anyhow::Result<ModelResponse> {
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("completion carried no choices"))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| {
                let arguments = serde_json::from_str(&call.function.arguments)
                    .unwrap_or(serde_json::Value::Null);
                ToolCallData::new(call.id, call.function.name, arguments)
            })
            .collect::<Vec<_>>();

        let usage = completion
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        let finish_reason = if tool_calls.is_empty() {
            FinishReason::from_provider(choice.finish_reason.as_deref().unwrap_or("stop"))
        } else {
            FinishReason::ToolUse
        };

        let mut response =
            ModelResponse::new(choice.message.content.unwrap_or_default(), completion.model)
                .with_usage(usage)
                .with_tool_calls(tool_calls);
        response.finish_reason = finish_reason;
        Ok(response)
    }
}

#[async_trait]
impl LlmBackend for OpenAiCompatBackend {
    async fn chat(
        &self,
        request: &CompletionRequest,
        sink: Option<&dyn StreamSink>,
        cancel: &CancelToken,
    ) -> anyhow::Result<ModelResponse> {
        request.validate()?;
        if cancel.is_cancelled() {
            anyhow::bail!("request cancelled");
        }

        tracing::debug!(
            target: "swarm::gateway",
            backend = self.name(),
            model = %if request.model.is_empty() { &self.default_model } else { &request.model },
            streaming = sink.is_some(),
            "sending chat completion"
        );

        match sink {
            Some(sink) => self.chat_streaming(request, sink, cancel).await,
            None => {
                tokio::select! {
                    result = self.chat_blocking(request) => result,
                    _ = cancel.cancelled() => anyhow::bail!("request cancelled"),
                }
            }
        }
    }

    fn name(&self) -> &str {
        "openai_compat"
    }

    fn models(&self) -> Vec<String> {
        self.served_models.clone()
    }

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities {
            streaming: true,
            tool_calling: true,
            native_web_search: false,
            native_code_interpreter: false,
            vision: false,
        }
    }
}

/// Accumulates streamed chunks into a final response.
#[derive(Default)]
struct StreamAccumulator {
    content: String,
    model: Option<String>,
    finish_reason: Option<String>,
    // Tool calls arrive as indexed fragments; arguments are JSON text
    // spread across chunks.
    tool_calls: Vec<PartialToolCall>,
    usage: Option<TokenUsage>,
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl StreamAccumulator {
    fn absorb(&mut self, chunk: ChatCompletionChunk, sink: &dyn StreamSink) {
        if self.model.is_none() && !chunk.model.is_empty() {
            self.model = Some(chunk.model);
        }
        if let Some(usage) = chunk.usage {
            self.usage = Some(TokenUsage::new(usage.prompt_tokens, usage.completion_tokens));
        }
        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };
        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }
        if let Some(text) = choice.delta.content {
            if !text.is_empty() {
                self.content.push_str(&text);
                sink.on_delta(&text, &self.content);
            }
        }
        for fragment in choice.delta.tool_calls.unwrap_or_default() {
            let index = fragment.index.unwrap_or(0);
            while self.tool_calls.len() <= index {
                self.tool_calls.push(PartialToolCall::default());
            }
            let slot = &mut self.tool_calls[index];
            if let Some(id) = fragment.id {
                slot.id = id;
            }
            if let Some(function) = fragment.function {
                if let Some(name) = function.name {
                    slot.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    slot.arguments.push_str(&arguments);
                }
            }
        }
    }

    fn into_response(self, fallback_model: &str) -> ModelResponse {
        let tool_calls = self
            .tool_calls
            .into_iter()
            .filter(|call| !call.name.is_empty())
            .map(|call| {
                let arguments =
                    serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Null);
                ToolCallData::new(call.id, call.name, arguments)
            })
            .collect::<Vec<_>>();

        let finish_reason = if tool_calls.is_empty() {
            FinishReason::from_provider(self.finish_reason.as_deref().unwrap_or("stop"))
        } else {
            FinishReason::ToolUse
        };

        let mut response = ModelResponse::new(
            self.content,
            self.model.unwrap_or_else(|| fallback_model.to_string()),
        )
        .with_usage(self.usage.unwrap_or_default())
        .with_tool_calls(tool_calls);
        response.finish_reason = finish_reason;
        response
    }
}

// Wire types for the chat-completions dialect.

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    model: String,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ChunkToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ChunkToolCall {
    index: Option<usize>,
    id: Option<String>,
    function: Option<ChunkFunction>,
}

#[derive(Debug, Deserialize)]
struct ChunkFunction {
    name: Option<String>,
    arguments: Option<String>,
}
