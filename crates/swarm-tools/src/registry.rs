//! Tool catalog and dispatch.

use std::sync::Arc;

use dashmap::DashMap;
use swarm_core::{CancelToken, SwarmError};
use swarm_gateway::ToolDefinition;

use crate::tool::Tool;

/// Catalog of callable tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in tool set, rooted at
    /// `workspace` for file access.
    pub fn with_builtins(workspace: impl Into<std::path::PathBuf>) -> Self {
        let workspace = workspace.into();
        let registry = Self::new();
        registry.register(Arc::new(crate::browser::SandboxBrowser::new()));
        registry.register(Arc::new(crate::interpreter::SandboxCodeInterpreter::new()));
        registry.register(Arc::new(crate::files::ReadFileTool::new(&workspace)));
        registry.register(Arc::new(crate::files::WriteFileTool::new(&workspace)));
        registry
    }

    /// Register a tool, replacing any previous one with the same name.
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        self.tools.insert(name, tool);
    }

    /// Remove a tool. Returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Definitions of all registered tools, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .iter()
            .map(|entry| entry.value().definition())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Definitions filtered to a role's allow-list.
    pub fn definitions_for(&self, allowed: &[String]) -> Vec<ToolDefinition> {
        self.definitions()
            .into_iter()
            .filter(|definition| allowed.iter().any(|name| name == &definition.name))
            .collect()
    }

    /// Dispatch a model-issued tool call to its handler.
    pub async fn dispatch(
        &self,
        name: &str,
        args: serde_json::Value,
        cancel: &CancelToken,
    ) -> Result<serde_json::Value, SwarmError> {
        let tool = self
            .tools
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SwarmError::ToolHandler {
                tool: name.to_string(),
                message: "unknown tool".to_string(),
            })?;

        tracing::debug!(target: "swarm::tools", tool = name, "dispatching tool call");
        tool.execute(args, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("upper", "Uppercase text", serde_json::json!({}))
        }

        async fn execute(
            &self,
            args: serde_json::Value,
            _cancel: &CancelToken,
        ) -> Result<serde_json::Value, SwarmError> {
            let text = crate::tool::require_str("upper", &args, "text")?;
            Ok(serde_json::Value::String(text.to_uppercase()))
        }
    }

    #[tokio::test]
    async fn test_register_dispatch_unregister() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(UpperTool));
        assert!(registry.contains("upper"));

        let result = registry
            .dispatch(
                "upper",
                serde_json::json!({"text": "abc"}),
                &CancelToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!("ABC"));

        assert!(registry.unregister("upper"));
        assert!(!registry.unregister("upper"));
        assert!(!registry.contains("upper"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_handler_error() {
        let registry = ToolRegistry::new();
        let err = registry
            .dispatch("ghost", serde_json::json!({}), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::ToolHandler { .. }));
    }

    #[test]
    fn test_definitions_for_filters_by_allow_list() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(UpperTool));
        let allowed = vec!["upper".to_string(), "ghost".to_string()];
        let definitions = registry.definitions_for(&allowed);
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].name, "upper");
    }

    #[test]
    fn test_builtins_present() {
        let registry = ToolRegistry::with_builtins("/tmp/swarm-test");
        for name in [
            "sandbox_browser",
            "sandbox_code_interpreter",
            "read_file",
            "write_file",
        ] {
            assert!(registry.contains(name), "missing builtin {name}");
        }
    }
}
