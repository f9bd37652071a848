//! Engine configuration.
//!
//! All recognised keys, their defaults, and validation. Configuration is a
//! plain value threaded through construction; the engine holds no
//! process-wide mutable settings.

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Semaphore size for in-flight sub-agents of one task.
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,

    /// Global per-task tool-call budget shared across all steps.
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u64,

    /// Per-step execution cap in seconds.
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout: u64,

    /// Overall per-task cap in seconds.
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout: u64,

    /// Complexity score (1-10) above which the supervisor decomposes
    /// instead of answering directly.
    #[serde(default = "default_complexity_threshold")]
    pub complexity_threshold: f64,

    /// Cap on concurrently dispatched steps within one wave.
    #[serde(default = "default_wave_parallelism_cap")]
    pub wave_parallelism_cap: usize,

    /// Enable the gateway's chunk-summarisation of oversized inputs.
    #[serde(default = "default_true")]
    pub enable_long_text_processing: bool,

    /// Select the wave scheduler ("team" mode). When false, the legacy
    /// fixed-level scheduler runs and mid-flow mutation is disallowed.
    #[serde(default = "default_true")]
    pub enable_team_mode: bool,

    /// Event-bus backlog before slow subscribers are dropped.
    #[serde(default = "default_event_backlog")]
    pub event_backlog: usize,

    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// Planner and reviewer knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Turn the quality-gate reviewer on/off.
    #[serde(default = "default_true")]
    pub enable_quality_gates: bool,

    /// Reviewer pass score in [0, 1].
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,

    /// Retry budget per step.
    #[serde(default = "default_max_retry_on_failure")]
    pub max_retry_on_failure: u32,

    /// Planner ReAct loop cap.
    #[serde(default = "default_max_react_iterations")]
    pub max_react_iterations: u32,

    /// Permit web-search tools during planning.
    #[serde(default = "default_true")]
    pub enable_research: bool,

    /// Reviewer call deadline in seconds; expiry is treated as `continue`.
    #[serde(default = "default_review_timeout")]
    pub review_timeout: u64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_concurrent_agents(),
            max_tool_calls: default_max_tool_calls(),
            agent_timeout: default_agent_timeout(),
            execution_timeout: default_execution_timeout(),
            complexity_threshold: default_complexity_threshold(),
            wave_parallelism_cap: default_wave_parallelism_cap(),
            enable_long_text_processing: true,
            enable_team_mode: true,
            event_backlog: default_event_backlog(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enable_quality_gates: true,
            quality_threshold: default_quality_threshold(),
            max_retry_on_failure: default_max_retry_on_failure(),
            max_react_iterations: default_max_react_iterations(),
            enable_research: true,
            review_timeout: default_review_timeout(),
        }
    }
}

impl SwarmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent_agents(mut self, n: usize) -> Self {
        self.max_concurrent_agents = n;
        self
    }

    pub fn with_max_tool_calls(mut self, n: u64) -> Self {
        self.max_tool_calls = n;
        self
    }

    pub fn with_agent_timeout(mut self, seconds: u64) -> Self {
        self.agent_timeout = seconds;
        self
    }

    pub fn with_execution_timeout(mut self, seconds: u64) -> Self {
        self.execution_timeout = seconds;
        self
    }

    pub fn with_team_mode(mut self, enabled: bool) -> Self {
        self.enable_team_mode = enabled;
        self
    }

    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.supervisor.quality_threshold = threshold;
        self
    }

    pub fn with_max_retry_on_failure(mut self, retries: u32) -> Self {
        self.supervisor.max_retry_on_failure = retries;
        self
    }

    /// Validate the configuration. Called once at engine construction.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_agents == 0 {
            return Err("max_concurrent_agents must be > 0".to_string());
        }
        if self.wave_parallelism_cap == 0 {
            return Err("wave_parallelism_cap must be > 0".to_string());
        }
        if self.agent_timeout == 0 {
            return Err("agent_timeout must be > 0".to_string());
        }
        if self.execution_timeout < self.agent_timeout {
            return Err("execution_timeout must be >= agent_timeout".to_string());
        }
        if !(0.0..=1.0).contains(&self.supervisor.quality_threshold) {
            return Err("supervisor.quality_threshold must be within [0, 1]".to_string());
        }
        if !(1.0..=10.0).contains(&self.complexity_threshold) {
            return Err("complexity_threshold must be within [1, 10]".to_string());
        }
        if self.event_backlog == 0 {
            return Err("event_backlog must be > 0".to_string());
        }
        if self.supervisor.max_react_iterations == 0 {
            return Err("supervisor.max_react_iterations must be > 0".to_string());
        }
        Ok(())
    }
}

// Default functions for serde

fn default_max_concurrent_agents() -> usize {
    (num_cpus::get() * 2).max(4)
}

fn default_max_tool_calls() -> u64 {
    100
}

fn default_agent_timeout() -> u64 {
    300
}

fn default_execution_timeout() -> u64 {
    3_600
}

fn default_complexity_threshold() -> f64 {
    5.0
}

fn default_wave_parallelism_cap() -> usize {
    100
}

fn default_event_backlog() -> usize {
    1_000
}

fn default_quality_threshold() -> f64 {
    0.7
}

fn default_max_retry_on_failure() -> u32 {
    2
}

fn default_max_react_iterations() -> u32 {
    5
}

fn default_review_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SwarmConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent_timeout, 300);
        assert_eq!(config.execution_timeout, 3_600);
        assert_eq!(config.wave_parallelism_cap, 100);
        assert_eq!(config.supervisor.quality_threshold, 0.7);
        assert_eq!(config.supervisor.max_react_iterations, 5);
    }

    #[test]
    fn test_builder_chain() {
        let config = SwarmConfig::new()
            .with_max_concurrent_agents(8)
            .with_max_tool_calls(20)
            .with_quality_threshold(0.9)
            .with_max_retry_on_failure(1);

        assert_eq!(config.max_concurrent_agents, 8);
        assert_eq!(config.max_tool_calls, 20);
        assert_eq!(config.supervisor.quality_threshold, 0.9);
        assert_eq!(config.supervisor.max_retry_on_failure, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let config = SwarmConfig {
            max_concurrent_agents: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_timeouts() {
        let config = SwarmConfig {
            agent_timeout: 600,
            execution_timeout: 60,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_out_of_range_threshold() {
        let mut config = SwarmConfig::default();
        config.supervisor.quality_threshold = 7.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: SwarmConfig =
            serde_json::from_str(r#"{"max_tool_calls": 10, "supervisor": {"enable_research": false}}"#)
                .unwrap();
        assert_eq!(config.max_tool_calls, 10);
        assert!(!config.supervisor.enable_research);
        // Untouched keys keep their defaults.
        assert_eq!(config.agent_timeout, 300);
        assert!(config.supervisor.enable_quality_gates);
    }
}
