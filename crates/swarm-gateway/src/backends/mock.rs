//! Scriptable in-process backend.
//!
//! Used by the test suite to drive the whole engine without a provider,
//! and by embedders for dry runs. Responses come either from a fixed
//! script consumed in order or from a responder function inspecting the
//! request. Content is streamed to the sink in small chunks so stream
//! consumers see realistic deltas.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use swarm_core::CancelToken;

use crate::backends::{LlmBackend, ModelCapabilities};
use crate::request::CompletionRequest;
use crate::response::{ModelResponse, TokenUsage};
use crate::sink::StreamSink;

type Responder = dyn Fn(&CompletionRequest) -> anyhow::Result<ModelResponse> + Send + Sync;

pub struct MockBackend {
    script: Mutex<VecDeque<anyhow::Result<ModelResponse>>>,
    responder: Option<Arc<Responder>>,
    capabilities: ModelCapabilities,
    calls: AtomicUsize,
    stream_chunk: usize,
}

impl MockBackend {
    /// Backend that echoes the last user message.
    pub fn echo() -> Self {
        Self::with_responder(|request| {
            let last = request
                .messages
                .iter()
                .rev()
                .find(|m| m.role == crate::request::MessageRole::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            Ok(ModelResponse::new(last, "mock").with_usage(TokenUsage::new(1, 1)))
        })
    }

    /// Backend that pops scripted responses in order. Once the script is
    /// drained, further calls fail.
    pub fn with_script(responses: Vec<anyhow::Result<ModelResponse>>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            responder: None,
            capabilities: Self::default_capabilities(),
            calls: AtomicUsize::new(0),
            stream_chunk: 8,
        }
    }

    /// Backend that computes responses from the request.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> anyhow::Result<ModelResponse> + Send + Sync + 'static,
    {
        Self {
            script: Mutex::new(VecDeque::new()),
            responder: Some(Arc::new(responder)),
            capabilities: Self::default_capabilities(),
            calls: AtomicUsize::new(0),
            stream_chunk: 8,
        }
    }

    pub fn with_capabilities(mut self, capabilities: ModelCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Number of chat calls served so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn default_capabilities() -> ModelCapabilities {
        ModelCapabilities {
            streaming: true,
            tool_calling: true,
            native_web_search: false,
            native_code_interpreter: false,
            vision: false,
        }
    }

    fn next_response(&self, request: &CompletionRequest) -> anyhow::Result<ModelResponse> {
        if let Some(scripted) = self.script.lock().pop_front() {
            return scripted;
        }
        match &self.responder {
            Some(responder) => responder(request),
            None => Err(anyhow::anyhow!("mock script exhausted")),
        }
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn chat(
        &self,
        request: &CompletionRequest,
        sink: Option<&dyn StreamSink>,
        cancel: &CancelToken,
    ) -> anyhow::Result<ModelResponse> {
        if cancel.is_cancelled() {
            anyhow::bail!("request cancelled");
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        let response = self.next_response(request)?;

        if let Some(sink) = sink {
            let mut buffer = String::with_capacity(response.content.len());
            let chars: Vec<char> = response.content.chars().collect();
            for chunk in chars.chunks(self.stream_chunk) {
                if cancel.is_cancelled() {
                    anyhow::bail!("stream cancelled");
                }
                let delta: String = chunk.iter().collect();
                buffer.push_str(&delta);
                sink.on_delta(&delta, &buffer);
                // Let other tasks interleave, as a network stream would.
                tokio::task::yield_now().await;
            }
        }

        Ok(response)
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn models(&self) -> Vec<String> {
        vec!["mock".to_string()]
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ChatMessage;
    use parking_lot::Mutex as PlMutex;

    #[tokio::test]
    async fn test_echo_backend() {
        let backend = MockBackend::echo();
        let request = CompletionRequest::new(vec![ChatMessage::user("ping")]);
        let response = backend
            .chat(&request, None, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(response.content, "ping");
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_script_consumed_in_order_then_fails() {
        let backend = MockBackend::with_script(vec![
            Ok(ModelResponse::new("first", "mock")),
            Ok(ModelResponse::new("second", "mock")),
        ]);
        let request = CompletionRequest::new(vec![ChatMessage::user("x")]);
        let cancel = CancelToken::new();

        assert_eq!(
            backend.chat(&request, None, &cancel).await.unwrap().content,
            "first"
        );
        assert_eq!(
            backend.chat(&request, None, &cancel).await.unwrap().content,
            "second"
        );
        assert!(backend.chat(&request, None, &cancel).await.is_err());
    }

    #[tokio::test]
    async fn test_stream_deltas_concatenate_to_content() {
        let backend = MockBackend::with_script(vec![Ok(ModelResponse::new(
            "a somewhat longer streamed answer",
            "mock",
        ))]);
        let request = CompletionRequest::new(vec![ChatMessage::user("x")]);

        let seen = Arc::new(PlMutex::new(String::new()));
        let seen_clone = seen.clone();
        let sink = move |delta: &str, _buffer: &str| {
            seen_clone.lock().push_str(delta);
        };

        let response = backend
            .chat(&request, Some(&sink), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(*seen.lock(), response.content);
    }
}
