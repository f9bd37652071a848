//! Completion response types.

use serde::{Deserialize, Serialize};

/// A tool invocation the model requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallData {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

impl ToolCallData {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    ContentFilter,
    Error,
}

impl FinishReason {
    pub fn from_provider(value: &str) -> Self {
        match value {
            "stop" | "end_turn" | "stop_sequence" => FinishReason::Stop,
            "length" | "max_tokens" => FinishReason::Length,
            "tool_calls" | "tool_use" | "function_call" => FinishReason::ToolUse,
            "content_filter" => FinishReason::ContentFilter,
            _ => FinishReason::Error,
        }
    }
}

/// Token accounting for a single completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn new(input_tokens: usize, output_tokens: usize) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// Normalised model output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,
    pub model: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallData>,
    #[serde(default)]
    pub usage: TokenUsage,
    pub finish_reason: FinishReason,
}

impl ModelResponse {
    pub fn new(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
            tool_calls: Vec::new(),
            usage: TokenUsage::default(),
            finish_reason: FinishReason::Stop,
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCallData>) -> Self {
        if !calls.is_empty() {
            self.finish_reason = FinishReason::ToolUse;
        }
        self.tool_calls = calls;
        self
    }

    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(FinishReason::from_provider("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider("end_turn"), FinishReason::Stop);
        assert_eq!(
            FinishReason::from_provider("tool_calls"),
            FinishReason::ToolUse
        );
        assert_eq!(FinishReason::from_provider("weird"), FinishReason::Error);
    }

    #[test]
    fn test_tool_calls_set_finish_reason() {
        let response = ModelResponse::new("", "m").with_tool_calls(vec![ToolCallData::new(
            "c1",
            "sandbox_browser",
            serde_json::json!({"query": "rust"}),
        )]);
        assert!(response.has_tool_calls());
        assert_eq!(response.finish_reason, FinishReason::ToolUse);
    }

    #[test]
    fn test_usage_totals() {
        let usage = TokenUsage::new(120, 30);
        assert_eq!(usage.total_tokens, 150);
    }
}
