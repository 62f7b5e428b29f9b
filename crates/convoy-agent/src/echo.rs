use crate::context::Tracer;
use crate::executor::TaskExecutor;
use async_trait::async_trait;
use convoy_core::{ConvoyResult, TaskAssignment};
use serde_json::{json, Value};
use tracing::info;

/// Echoes a task's parameters back as its result.
///
/// With `parameters.useTool == true` and a tool manager configured, it also
/// calls the `mock_api` tool and returns both.
pub struct EchoExecutor;

impl EchoExecutor {
    pub const CAPABILITY: &'static str = "echo";
}

#[async_trait]
impl TaskExecutor for EchoExecutor {
    async fn execute_task(&self, task: &TaskAssignment, tracer: &Tracer) -> ConvoyResult<Value> {
        info!(job_id = %task.job_id, task_id = %task.task_id, "Executing echo task");
        let parameters = Value::Object(task.parameters.clone());

        tracer
            .step(
                "echo_started",
                json!({"parameters": parameters, "description": task.description}),
            )
            .await?;

        let wants_tool = task.parameters.get("useTool") == Some(&Value::Bool(true));
        if wants_tool && tracer.has_tools() {
            tracer
                .step("using_tool_manager", json!({"toolName": "mock_api"}))
                .await?;
            let tool_result = tracer
                .execute_tool("mock_api", json!({"endpoint": "/posts/1", "method": "GET"}))
                .await?;
            return Ok(json!({"echoResult": parameters, "toolResult": tool_result}));
        }

        tracer
            .step("echo_completed", json!({"result": parameters}))
            .await?;
        Ok(parameters)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::context::{Reporter, TaskContext};
    use convoy_bus::topology::LOGS_EXCHANGE;
    use convoy_bus::{declare_shared_exchanges, InMemoryBus, MessageBus};
    use convoy_core::TraceEvent;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_echo_returns_parameters() {
        let bus = Arc::new(InMemoryBus::new());
        bus.connect().await.unwrap();
        declare_shared_exchanges(bus.as_ref()).await.unwrap();
        let reporter = Reporter::new(bus.clone(), "echo-agent");
        let task = TaskAssignment::new(Uuid::new_v4(), "echo", "say hi").with_parameters(
            json!({"text": "hi", "useTool": true})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let _guard = reporter.enter(TaskContext {
            job_id: task.job_id,
            task_id: task.task_id,
        });

        // useTool is ignored without a tool manager
        let tracer = Tracer::new(reporter.clone(), None);
        let result = EchoExecutor.execute_task(&task, &tracer).await.unwrap();
        assert_eq!(result, json!({"text": "hi", "useTool": true}));

        let steps: Vec<String> = bus
            .published_to(LOGS_EXCHANGE)
            .iter()
            .map(|m| m.parse::<TraceEvent>().unwrap().step)
            .collect();
        assert_eq!(steps, vec!["echo_started", "echo_completed"]);
    }
}
