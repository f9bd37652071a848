//! The tool trait.

use async_trait::async_trait;
use swarm_core::{CancelToken, SwarmError};
use swarm_gateway::ToolDefinition;

/// A callable tool.
///
/// `execute` receives the JSON arguments the model produced and returns a
/// serialisable result. Errors should be `SwarmError::ToolHandler`; the
/// sub-agent folds them into tool-result content so the model can recover.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Definition advertised to the model.
    fn definition(&self) -> ToolDefinition;

    async fn execute(
        &self,
        args: serde_json::Value,
        cancel: &CancelToken,
    ) -> Result<serde_json::Value, SwarmError>;
}

/// Shorthand for building a handler error for tool `name`.
pub fn handler_error(name: &str, message: impl std::fmt::Display) -> SwarmError {
    SwarmError::ToolHandler {
        tool: name.to_string(),
        message: message.to_string(),
    }
}

/// Extract a required string argument.
pub fn require_str<'a>(
    tool: &str,
    args: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, SwarmError> {
    args.get(key)
        .and_then(|value| value.as_str())
        .ok_or_else(|| handler_error(tool, format!("missing required '{key}' argument")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_str() {
        let args = serde_json::json!({"query": "rust"});
        assert_eq!(require_str("t", &args, "query").unwrap(), "rust");
        assert!(require_str("t", &args, "url").is_err());
        assert!(require_str("t", &serde_json::json!({"query": 3}), "query").is_err());
    }
}
