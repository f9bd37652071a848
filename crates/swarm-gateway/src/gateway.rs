//! The gateway proper: routing, retry, fallback tools, long-text.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;
use swarm_core::{CancelToken, SwarmError, SwarmResult};

use crate::backends::LlmBackend;
use crate::longtext::{self, LongTextConfig};
use crate::request::{CompletionRequest, MessageRole, ToolDefinition};
use crate::response::ModelResponse;
use crate::retry::{ErrorClass, RetryStrategy, classify};
use crate::sink::StreamSink;

/// Fallback tool name for web search and page fetching.
pub const SANDBOX_BROWSER: &str = "sandbox_browser";
/// Fallback tool name for code execution via the Sandbox Gateway.
pub const SANDBOX_CODE_INTERPRETER: &str = "sandbox_code_interpreter";

/// Uniform completion surface over registered backends.
///
/// Routing is by requested model id; unknown models go to the default
/// backend. The gateway owns transport retry, request cancellation,
/// fallback-tool injection, and transparent long-input condensation.
pub struct ModelGateway {
    by_model: DashMap<String, Arc<dyn LlmBackend>>,
    default_backend: Arc<dyn LlmBackend>,
    retry: RetryStrategy,
    long_text: LongTextConfig,
    long_text_enabled: bool,
    /// Character budget one request may carry before condensation.
    context_window_chars: usize,
}

impl ModelGateway {
    pub fn new(default_backend: Arc<dyn LlmBackend>) -> Self {
        let gateway = Self {
            by_model: DashMap::new(),
            default_backend: default_backend.clone(),
            retry: RetryStrategy::default(),
            long_text: LongTextConfig::default(),
            long_text_enabled: true,
            context_window_chars: 120_000,
        };
        gateway.register_backend(default_backend);
        gateway
    }

    pub fn with_retry(mut self, retry: RetryStrategy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_long_text_processing(mut self, enabled: bool) -> Self {
        self.long_text_enabled = enabled;
        self
    }

    pub fn with_context_window_chars(mut self, chars: usize) -> Self {
        self.context_window_chars = chars;
        self
    }

    /// Register a backend for every model id it serves.
    pub fn register_backend(&self, backend: Arc<dyn LlmBackend>) {
        for model in backend.models() {
            self.by_model.insert(model, backend.clone());
        }
    }

    fn resolve(&self, model: &str) -> Arc<dyn LlmBackend> {
        if model.is_empty() {
            return self.default_backend.clone();
        }
        self.by_model
            .get(model)
            .map(|entry| entry.value().clone())
            .unwrap_or_else(|| self.default_backend.clone())
    }

    /// Complete a request, streaming deltas into `sink` when provided.
    pub async fn complete(
        &self,
        mut request: CompletionRequest,
        sink: Option<&dyn StreamSink>,
        cancel: &CancelToken,
    ) -> SwarmResult<ModelResponse> {
        if cancel.is_cancelled() {
            return Err(SwarmError::Cancelled);
        }

        let backend = self.resolve(&request.model);
        self.inject_fallback_tools(&backend, &mut request);

        if self.long_text_enabled && request.content_chars() > self.context_window_chars {
            self.condense_oversized_messages(&backend, &mut request, cancel)
                .await;
        }

        let attempt_request = request.clone();
        let result = self
            .retry
            .execute(|| {
                let backend = backend.clone();
                let request = attempt_request.clone();
                async move {
                    // Sink is only attached on the first successful pass of
                    // each attempt; duplicated deltas across retries are
                    // avoided by clearing downstream buffers on retry, which
                    // the sub-agent does via agent_stream_clear.
                    backend.chat(&request, sink, cancel).await
                }
            })
            .await;

        match result {
            Ok(response) => Ok(response),
            Err(error) => {
                if cancel.is_cancelled() {
                    return Err(SwarmError::Cancelled);
                }
                Err(match classify(&error) {
                    ErrorClass::RateLimited => SwarmError::RateLimit {
                        message: error.to_string(),
                    },
                    _ => SwarmError::ModelTransport {
                        message: error.to_string(),
                        backend: Some(backend.name().to_string()),
                    },
                })
            }
        }
    }

    /// Register the sandbox fallback tools when the backend lacks native
    /// equivalents and the request wants tools at all.
    fn inject_fallback_tools(&self, backend: &Arc<dyn LlmBackend>, request: &mut CompletionRequest) {
        if !request.has_tools() {
            return;
        }
        let capabilities = backend.capabilities();
        if !capabilities.tool_calling {
            request.tools.clear();
            return;
        }

        fn has(tools: &[ToolDefinition], name: &str) -> bool {
            tools.iter().any(|tool| tool.name == name)
        }
        if !capabilities.native_web_search && !has(&request.tools, SANDBOX_BROWSER) {
            request.tools.push(browser_fallback_definition());
        }
        if !capabilities.native_code_interpreter && !has(&request.tools, SANDBOX_CODE_INTERPRETER) {
            request.tools.push(interpreter_fallback_definition());
        }
    }

    async fn condense_oversized_messages(
        &self,
        backend: &Arc<dyn LlmBackend>,
        request: &mut CompletionRequest,
        cancel: &CancelToken,
    ) {
        // Per-message budget: system prompts stay, the fat user turns
        // (dependency context) are condensed.
        let budget = self.context_window_chars / request.messages.len().max(1);
        for message in &mut request.messages {
            if message.role == MessageRole::User && message.content.len() > budget {
                message.content = longtext::condense(
                    backend.as_ref(),
                    &self.long_text,
                    &message.content,
                    budget,
                    cancel,
                )
                .await;
            }
        }
    }
}

fn browser_fallback_definition() -> ToolDefinition {
    ToolDefinition::new(
        SANDBOX_BROWSER,
        "Search the web or fetch a page. Use action \"search\" with a query, or action \
         \"fetch\" with a url.",
        json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["search", "fetch"]},
                "query": {"type": "string", "description": "Search query"},
                "url": {"type": "string", "description": "Page to fetch"}
            },
            "required": ["action"]
        }),
    )
}

fn interpreter_fallback_definition() -> ToolDefinition {
    ToolDefinition::new(
        SANDBOX_CODE_INTERPRETER,
        "Execute code in an isolated sandbox and return stdout, stderr, and the result value.",
        json!({
            "type": "object",
            "properties": {
                "language": {"type": "string", "enum": ["python", "bash"]},
                "code": {"type": "string"}
            },
            "required": ["code"]
        }),
    )
}
