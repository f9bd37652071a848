//! Sandbox code interpreter.
//!
//! Executes model-written code through the external Sandbox Gateway.
//! Open sandbox instance ids are tracked so an unclean shutdown can
//! record them for reclamation at next startup.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use swarm_core::{CancelToken, SwarmError};
use swarm_gateway::ToolDefinition;

use crate::tool::{Tool, handler_error, require_str};

const TOOL_NAME: &str = "sandbox_code_interpreter";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Environment variable holding the Sandbox Gateway credential.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Per-execution wall-clock limit passed to the gateway, seconds.
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout: u64,
}

fn default_endpoint() -> String {
    "https://sandbox.internal/v1/execute".to_string()
}

fn default_api_key_env() -> String {
    "SANDBOX_API_KEY".to_string()
}

fn default_exec_timeout() -> u64 {
    60
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            exec_timeout: default_exec_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    instance_id: Option<String>,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

pub struct SandboxCodeInterpreter {
    config: InterpreterConfig,
    client: reqwest::Client,
    open_instances: Mutex<HashSet<String>>,
}

impl SandboxCodeInterpreter {
    pub fn new() -> Self {
        Self::with_config(InterpreterConfig::default())
    }

    pub fn with_config(config: InterpreterConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            open_instances: Mutex::new(HashSet::new()),
        }
    }

    /// Sandbox instances currently believed open, for the recovery file.
    pub fn open_instances(&self) -> Vec<String> {
        self.open_instances.lock().iter().cloned().collect()
    }

    /// Best-effort release of a sandbox instance.
    pub async fn release_instance(&self, instance_id: &str) {
        self.open_instances.lock().remove(instance_id);
        let url = format!(
            "{}/{instance_id}",
            self.config.endpoint.trim_end_matches("/execute")
        );
        if let Err(error) = self.client.delete(&url).send().await {
            tracing::warn!(
                target: "swarm::tools",
                instance = instance_id,
                error = %error,
                "failed to release sandbox instance"
            );
        }
    }
}

impl Default for SandboxCodeInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SandboxCodeInterpreter {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            TOOL_NAME,
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

    async fn execute(
        &self,
        args: serde_json::Value,
        cancel: &CancelToken,
    ) -> Result<serde_json::Value, SwarmError> {
        if cancel.is_cancelled() {
            return Err(SwarmError::Cancelled);
        }
        let code = require_str(TOOL_NAME, &args, "code")?;
        let language = args
            .get("language")
            .and_then(|v| v.as_str())
            .unwrap_or("python");

        let api_key = std::env::var(&self.config.api_key_env).map_err(|_| {
            handler_error(
                TOOL_NAME,
                format!("{} environment variable is not set", self.config.api_key_env),
            )
        })?;

        let body = json!({
            "language": language,
            "code": code,
            "timeout": self.config.exec_timeout,
        });

        let request = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send();

        let response = tokio::select! {
            response = request => response
                .map_err(|e| handler_error(TOOL_NAME, format!("sandbox request failed: {e}")))?,
            _ = cancel.cancelled() => return Err(SwarmError::Cancelled),
        };

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(handler_error(
                TOOL_NAME,
                format!("sandbox responded with status {status}: {text}"),
            ));
        }

        let payload: ExecuteResponse = response
            .json()
            .await
            .map_err(|e| handler_error(TOOL_NAME, format!("unparseable sandbox response: {e}")))?;

        if let Some(instance_id) = &payload.instance_id {
            self.open_instances.lock().insert(instance_id.clone());
        }

        if let Some(error) = payload.error {
            return Err(handler_error(TOOL_NAME, error));
        }

        Ok(json!({
            "stdout": payload.stdout,
            "stderr": payload.stderr,
            "result": payload.result,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_tracking() {
        let interpreter = SandboxCodeInterpreter::new();
        interpreter
            .open_instances
            .lock()
            .insert("sb-1".to_string());
        interpreter
            .open_instances
            .lock()
            .insert("sb-2".to_string());

        let mut open = interpreter.open_instances();
        open.sort();
        assert_eq!(open, vec!["sb-1", "sb-2"]);
    }

    #[tokio::test]
    async fn test_missing_code_rejected() {
        let interpreter = SandboxCodeInterpreter::new();
        let err = interpreter
            .execute(json!({"language": "python"}), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("code"));
    }

    #[tokio::test]
    async fn test_cancelled_before_execution() {
        let interpreter = SandboxCodeInterpreter::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = interpreter
            .execute(json!({"code": "print(1)"}), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::Cancelled));
    }

    #[test]
    fn test_execute_response_parsing() {
        let payload: ExecuteResponse = serde_json::from_value(json!({
            "instance_id": "sb-9",
            "stdout": "42\n",
            "result": 42
        }))
        .unwrap();
        assert_eq!(payload.instance_id.as_deref(), Some("sb-9"));
        assert_eq!(payload.stdout, "42\n");
        assert!(payload.error.is_none());
    }
}
