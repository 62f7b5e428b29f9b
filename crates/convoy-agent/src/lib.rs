//! Worker runtime for the Convoy task mesh.
//!
//! An [`AgentRuntime`] consumes task assignments from its capability queue,
//! runs them one at a time through an injected [`TaskExecutor`], and reports
//! progress on the status and logs exchanges.
//!
//! # Main types
//!
//! - [`AgentRuntime`]: Consumption loop, status/trace reporting, ack discipline.
//! - [`TaskExecutor`]: The task body a worker supplies.
//! - [`Tracer`]: Handle given to the executor for trace steps and tool calls.
//! - [`ToolManagerClient`]: HTTP client for the tool manager, with retry and a breaker.
//! - [`EchoExecutor`]: Reference executor for the `echo` capability.

/// Per-task context slot and status/trace publishing.
pub mod context;
/// Worker and tool-manager settings.
pub mod config;
/// The reference `echo` executor.
pub mod echo;
/// The executor contract.
pub mod executor;
/// The consumption loop.
pub mod runtime;
/// Tool-manager HTTP client.
pub mod tool_client;

pub use config::{ToolManagerConfig, WorkerConfig};
pub use context::{StatusReport, TaskContext, Tracer};
pub use echo::EchoExecutor;
pub use executor::TaskExecutor;
pub use runtime::{AgentRuntime, DeliveryOutcome};
pub use tool_client::{ToolHealth, ToolManagerClient};
