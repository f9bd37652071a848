//! Long-input handling.
//!
//! When injected context exceeds a budget, the head and tail are kept
//! verbatim and the middle is chunk-summarised through the backend. The
//! transformation is transparent to callers; sub-agents never know their
//! dependency context was condensed.

use swarm_core::CancelToken;

use crate::backends::LlmBackend;
use crate::request::{ChatMessage, CompletionRequest};

/// Chunking parameters.
#[derive(Debug, Clone)]
pub struct LongTextConfig {
    /// Characters kept verbatim from the start of the text.
    pub head_chars: usize,
    /// Characters kept verbatim from the end of the text.
    pub tail_chars: usize,
    /// Size of middle chunks submitted for summarisation.
    pub chunk_chars: usize,
}

impl Default for LongTextConfig {
    fn default() -> Self {
        Self {
            head_chars: 6_000,
            tail_chars: 6_000,
            chunk_chars: 12_000,
        }
    }
}

/// Condense `text` to roughly `budget` characters.
///
/// Below budget, the text passes through untouched. Above it, middle
/// sections are summarised chunk by chunk; if a summarisation call fails
/// the chunk is replaced with an elision marker rather than failing the
/// caller.
pub async fn condense(
    backend: &dyn LlmBackend,
    config: &LongTextConfig,
    text: &str,
    budget: usize,
    cancel: &CancelToken,
) -> String {
    if text.len() <= budget {
        return text.to_string();
    }

    let head_end = floor_char_boundary(text, config.head_chars.min(text.len()));
    let tail_start = ceil_char_boundary(
        text,
        text.len().saturating_sub(config.tail_chars),
    );
    if head_end >= tail_start {
        return text.to_string();
    }

    let head = &text[..head_end];
    let middle = &text[head_end..tail_start];
    let tail = &text[tail_start..];

    let mut summaries = Vec::new();
    let mut offset = 0;
    while offset < middle.len() {
        if cancel.is_cancelled() {
            break;
        }
        let end = floor_char_boundary(middle, (offset + config.chunk_chars).min(middle.len()));
        let chunk = &middle[offset..end];
        summaries.push(summarise_chunk(backend, chunk, cancel).await);
        offset = end;
    }

    format!(
        "{head}\n\n[condensed middle section]\n{}\n\n{tail}",
        summaries.join("\n")
    )
}

async fn summarise_chunk(backend: &dyn LlmBackend, chunk: &str, cancel: &CancelToken) -> String {
    let request = CompletionRequest::new(vec![
        ChatMessage::system(
            "Summarize the following material faithfully in at most 200 words. Keep every \
             figure, name, and conclusion that later steps might rely on.",
        ),
        ChatMessage::user(chunk.to_string()),
    ])
    .with_temperature(0.2);

    match backend.chat(&request, None, cancel).await {
        Ok(response) => response.content,
        Err(error) => {
            tracing::warn!(
                target: "swarm::gateway",
                error = %error,
                "chunk summarisation failed, eliding section"
            );
            format!("[{} characters elided]", chunk.len())
        }
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockBackend;
    use crate::response::ModelResponse;

    #[tokio::test]
    async fn test_short_text_passes_through() {
        let backend = MockBackend::echo();
        let config = LongTextConfig::default();
        let text = "short enough";
        let result = condense(&backend, &config, text, 1_000, &CancelToken::new()).await;
        assert_eq!(result, text);
    }

    #[tokio::test]
    async fn test_long_text_keeps_head_and_tail() {
        let backend = MockBackend::with_responder(|_| {
            Ok(ModelResponse::new("condensed summary", "mock"))
        });
        let config = LongTextConfig {
            head_chars: 10,
            tail_chars: 10,
            chunk_chars: 50,
        };
        let text = format!("HEAD-MARK {}{}", "x".repeat(200), " TAIL-MARK");
        let result = condense(&backend, &config, &text, 50, &CancelToken::new()).await;

        assert!(result.starts_with("HEAD-MARK"));
        assert!(result.ends_with("TAIL-MARK"));
        assert!(result.contains("condensed summary"));
        assert!(result.len() < text.len());
    }

    #[tokio::test]
    async fn test_failed_summarisation_elides() {
        let backend =
            MockBackend::with_responder(|_| Err(anyhow::anyhow!("invalid request")));
        let config = LongTextConfig {
            head_chars: 5,
            tail_chars: 5,
            chunk_chars: 100,
        };
        let text = "y".repeat(300);
        let result = condense(&backend, &config, &text, 20, &CancelToken::new()).await;
        assert!(result.contains("characters elided"));
    }

    #[tokio::test]
    async fn test_multibyte_boundaries_respected() {
        let backend = MockBackend::with_responder(|_| Ok(ModelResponse::new("s", "mock")));
        let config = LongTextConfig {
            head_chars: 7,
            tail_chars: 7,
            chunk_chars: 40,
        };
        // Characters are 3 bytes each; naive slicing would panic.
        let text = "搜".repeat(100);
        let result = condense(&backend, &config, &text, 30, &CancelToken::new()).await;
        assert!(result.contains("condensed middle section"));
    }
}
