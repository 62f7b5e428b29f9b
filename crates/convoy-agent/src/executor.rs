use crate::context::Tracer;
use async_trait::async_trait;
use convoy_core::{ConvoyResult, TaskAssignment};
use serde_json::Value;

/// The task body of a worker.
///
/// The runtime handles everything around it: context, status and trace
/// messages, acknowledgement. An `Err` marks the task failed; it never stops
/// the worker.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute_task(&self, task: &TaskAssignment, tracer: &Tracer) -> ConvoyResult<Value>;
}
