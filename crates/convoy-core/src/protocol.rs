use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Lifecycle status of a single task as reported on the status exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Seeded by the orchestrator at dispatch time.
    Pending,
    /// Accepted by the broker, not yet picked up.
    Queued,
    /// A worker is executing the task.
    InProgress,
    /// The task body returned a result.
    Completed,
    /// The task body returned an error.
    Failed,
    /// The task is being retried.
    Retrying,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::InProgress => write!(f, "in-progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Retrying => write!(f, "retrying"),
        }
    }
}

/// One unit of work routed to a capability queue by `taskType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignment {
    pub job_id: Uuid,
    pub task_id: Uuid,
    pub task_type: String,
    pub description: String,
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<Uuid>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
}

impl TaskAssignment {
    pub fn new(job_id: Uuid, task_type: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            job_id,
            task_id: Uuid::new_v4(),
            task_type: task_type.into(),
            description: description.into(),
            parameters: Map::new(),
            dependencies: None,
            context: None,
        }
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<Uuid>) -> Self {
        self.dependencies = Some(deps);
        self
    }
}

/// Latest known status of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub job_id: Uuid,
    pub task_id: Uuid,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(job_id: Uuid, task_id: Uuid, status: TaskStatus) -> Self {
        Self {
            job_id,
            task_id,
            status,
            message: None,
            result: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// The record the orchestrator seeds for a freshly dispatched task.
    pub fn pending(job_id: Uuid, task_id: Uuid) -> Self {
        Self::new(job_id, task_id, TaskStatus::Pending)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Advisory progress trace ("chain of thought") emitted by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    pub job_id: Uuid,
    pub task_id: Uuid,
    pub agent_id: String,
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Map<String, Value>>,
    pub timestamp: DateTime<Utc>,
}

/// Announcement of the task types a worker consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapability {
    pub agent_id: String,
    pub capabilities: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl AgentCapability {
    pub fn new(agent_id: impl Into<String>, capabilities: Vec<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            capabilities,
            timestamp: Utc::now(),
        }
    }
}
