use convoy_resilience::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Identity and routing of one worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_agent_id")]
    pub agent_id: String,
    /// Durable queue this worker consumes.
    #[serde(default = "default_task_queue")]
    pub task_queue: String,
    /// Task types bound to the queue as `task.<capability>`.
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            agent_id: default_agent_id(),
            task_queue: default_task_queue(),
            capabilities: default_capabilities(),
        }
    }
}

fn default_agent_id() -> String {
    "echo-agent".to_string()
}

fn default_task_queue() -> String {
    "agent.echo.tasks".to_string()
}

fn default_capabilities() -> Vec<String> {
    vec!["echo".to_string()]
}

/// Connection to the tool-manager service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolManagerConfig {
    pub base_url: String,
    /// Per-request timeout of the HTTP client.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry")]
    pub retry: RetryPolicy,
    #[serde(default = "default_breaker_threshold")]
    pub breaker_threshold: u32,
    #[serde(default = "default_breaker_reset_ms")]
    pub breaker_reset_ms: u64,
}

impl ToolManagerConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout_ms: default_timeout_ms(),
            retry: default_retry(),
            breaker_threshold: default_breaker_threshold(),
            breaker_reset_ms: default_breaker_reset_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 1000,
        max_delay_ms: 5000,
        timeout_ms: default_timeout_ms(),
        ..RetryPolicy::default()
    }
}

fn default_breaker_threshold() -> u32 {
    5
}

fn default_breaker_reset_ms() -> u64 {
    30_000
}
