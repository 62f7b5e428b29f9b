use uuid::Uuid;

/// A convenience `Result` alias using [`ConvoyError`].
pub type ConvoyResult<T> = Result<T, ConvoyError>;

/// Top-level error type for the Convoy workspace.
///
/// Each variant corresponds to one failure kind. Transport and timeout
/// failures are transient and retried by the resilience wrappers; the rest
/// indicate contract violations or terminal conditions.
#[derive(Debug, thiserror::Error)]
pub enum ConvoyError {
    /// A task body returned an error.
    #[error("Task {task_id} of job {job_id} failed: {message}")]
    TaskExecution {
        /// Job the task belongs to.
        job_id: Uuid,
        /// The failing task.
        task_id: Uuid,
        /// Error reported by the task body.
        message: String,
    },

    /// A message did not match its schema.
    #[error("Validation error: {message}")]
    Validation {
        /// Summary of the violation.
        message: String,
        /// Structured per-field details.
        details: serde_json::Value,
    },

    /// A lookup on an unknown identifier.
    #[error("{resource_type} '{resource_id}' not found")]
    NotFound {
        /// Kind of resource (e.g. `job`, `task`).
        resource_type: String,
        /// The identifier that was looked up.
        resource_id: String,
    },

    /// A bus or HTTP transport failure.
    #[error("Communication error with {target}: {message}")]
    Communication {
        /// The peer that could not be reached (broker, service URL).
        target: String,
        /// Transport error description.
        message: String,
    },

    /// An attempt exceeded its deadline.
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// The deadline that elapsed.
        timeout_ms: u64,
    },

    /// No worker can handle the requested task type.
    #[error("No worker provides capability '{required}'")]
    Capability {
        /// The missing capability.
        required: String,
    },

    /// A circuit breaker rejected the call without invoking it.
    #[error("Circuit breaker '{name}' is open")]
    CircuitOpen {
        /// Breaker name.
        name: String,
    },

    /// The message bus has no live connection/channel.
    #[error("Message bus channel is not initialized. Call connect() first.")]
    NotConnected,

    /// A worker reporting call was made outside of task handling.
    #[error("No active task context for {operation}")]
    NoActiveTask {
        /// The reporting operation that was attempted.
        operation: &'static str,
    },

    /// A tool invoked through the tool manager failed.
    #[error("Tool '{tool_name}' failed: {message}")]
    Tool {
        /// Tool name.
        tool_name: String,
        /// Failure description.
        message: String,
    },

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvoyError {
    /// Shorthand for a [`ConvoyError::Communication`].
    pub fn communication(target: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Communication {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a [`ConvoyError::Validation`] without details.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    /// Shorthand for a [`ConvoyError::NotFound`].
    pub fn not_found(resource_type: impl Into<String>, resource_id: impl ToString) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            resource_id: resource_id.to_string(),
        }
    }

    /// Stable machine-readable code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TaskExecution { .. } => "TASK_EXECUTION_ERROR",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND_ERROR",
            Self::Communication { .. } => "COMMUNICATION_ERROR",
            Self::Timeout { .. } => "TIMEOUT_ERROR",
            Self::Capability { .. } => "CAPABILITY_ERROR",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::NotConnected => "NOT_CONNECTED",
            Self::NoActiveTask { .. } => "NO_ACTIVE_TASK",
            Self::Tool { .. } => "TOOL_EXECUTION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Whether a retry may succeed: transport failures and timeouts only.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Communication { .. } | Self::Timeout { .. })
    }
}
