//! Completion request types and builders.

use serde::{Deserialize, Serialize};

use crate::response::ToolCallData;

/// Definition of a tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Controls how the model should use tools.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub enum ToolChoice {
    #[default]
    Auto,
    None,
    Required,
    Specific(String),
}

/// Message author within a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// One turn of the conversation sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    /// Assistant turns may carry tool calls the model issued.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallData>,
    /// Tool turns reference the call they answer.
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn assistant_with_calls(content: impl Into<String>, calls: Vec<ToolCallData>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    /// A tool result fed back to the model.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// A completion request routed through the gateway.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Model id used for backend routing; empty means the default backend.
    pub model: String,
    pub temperature: f64,
    pub max_tokens: Option<usize>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    /// Marks streamed reasoning with `[THINKING]` delimiters when the
    /// backend supports a separate reasoning channel.
    pub emit_thinking: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: String::new(),
            temperature: 0.7,
            max_tokens: None,
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
            emit_thinking: false,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = choice;
        self
    }

    pub fn with_thinking(mut self) -> Self {
        self.emit_thinking = true;
        self
    }

    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    /// Total character count of all message content, the long-text
    /// processor's budget unit.
    pub fn content_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.messages.is_empty() {
            anyhow::bail!("request must contain at least one message");
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            anyhow::bail!("temperature must be within [0, 2], got {}", self.temperature);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("You are helpful"),
            ChatMessage::user("hi"),
        ])
        .with_model("qwen3-max")
        .with_temperature(0.2)
        .with_max_tokens(512);

        assert_eq!(request.model, "qwen3-max");
        assert_eq!(request.temperature, 0.2);
        assert_eq!(request.max_tokens, Some(512));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(CompletionRequest::new(vec![]).validate().is_err());

        let mut request = CompletionRequest::new(vec![ChatMessage::user("x")]);
        request.temperature = 9.0;
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_temperature_clamped_by_builder() {
        let request = CompletionRequest::new(vec![ChatMessage::user("x")]).with_temperature(5.0);
        assert_eq!(request.temperature, 2.0);
    }

    #[test]
    fn test_tool_result_message() {
        let msg = ChatMessage::tool_result("call_1", "{\"ok\":true}");
        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn test_content_chars() {
        let request = CompletionRequest::new(vec![
            ChatMessage::system("abcd"),
            ChatMessage::user("ef"),
        ]);
        assert_eq!(request.content_chars(), 6);
    }
}
