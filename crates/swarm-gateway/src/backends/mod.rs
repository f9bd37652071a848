//! LLM backend trait and implementations.

pub mod mock;
pub mod openai_compat;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use swarm_core::CancelToken;

use crate::request::CompletionRequest;
use crate::response::ModelResponse;
use crate::sink::StreamSink;

/// What a backend's models can do natively. The gateway injects fallback
/// tools for the gaps instead of branching on model identity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ModelCapabilities {
    pub streaming: bool,
    pub tool_calling: bool,
    /// Provider-side web search; absence triggers `sandbox_browser`
    /// injection.
    pub native_web_search: bool,
    /// Provider-side code execution; absence triggers
    /// `sandbox_code_interpreter` injection.
    pub native_code_interpreter: bool,
    pub vision: bool,
}

/// Unified interface over LLM providers.
///
/// `chat` must call `sink` with successive text deltas before returning
/// the final message when a sink is provided, and must observe `cancel`
/// between suspension points.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn chat(
        &self,
        request: &CompletionRequest,
        sink: Option<&dyn StreamSink>,
        cancel: &CancelToken,
    ) -> anyhow::Result<ModelResponse>;

    fn name(&self) -> &str;

    /// Model ids this backend serves; used for gateway routing.
    fn models(&self) -> Vec<String>;

    fn capabilities(&self) -> ModelCapabilities;
}

/// Factory for building backends from provider configuration.
pub struct BackendFactory;

impl BackendFactory {
    pub fn create(
        provider: &str,
        api_key: &str,
        config: Option<serde_json::Value>,
    ) -> anyhow::Result<Arc<dyn LlmBackend>> {
        match provider.to_lowercase().as_str() {
            "openai" | "openai_compat" | "dashscope" => Ok(Arc::new(
                openai_compat::OpenAiCompatBackend::new(api_key, config)?,
            )),
            "mock" => Ok(Arc::new(mock::MockBackend::echo())),
            _ => Err(anyhow::anyhow!(
                "unknown provider: {provider}. Supported: openai, dashscope, mock"
            )),
        }
    }

    pub fn list_providers() -> Vec<&'static str> {
        vec!["openai", "dashscope", "mock"]
    }
}
