use crate::tool_client::ToolManagerClient;
use chrono::Utc;
use convoy_bus::topology::{logs_routing_key, status_routing_key, LOGS_EXCHANGE, STATUS_EXCHANGE};
use convoy_bus::{publish_json, MessageBus};
use convoy_core::{ConvoyError, ConvoyResult, StatusUpdate, TaskStatus, TraceEvent};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Identifies the task a worker is currently handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskContext {
    pub job_id: Uuid,
    pub task_id: Uuid,
}

/// The caller-supplied part of a status update; ids and timestamp are filled in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    pub message: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

/// Publishes status and trace messages for whichever task is active.
#[derive(Clone)]
pub(crate) struct Reporter {
    bus: Arc<dyn MessageBus>,
    agent_id: Arc<str>,
    current: Arc<Mutex<Option<TaskContext>>>,
}

impl Reporter {
    pub(crate) fn new(bus: Arc<dyn MessageBus>, agent_id: &str) -> Self {
        Self {
            bus,
            agent_id: Arc::from(agent_id),
            current: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub(crate) fn current(&self) -> Option<TaskContext> {
        *self.current.lock()
    }

    /// Make `context` active until the returned guard is dropped.
    pub(crate) fn enter(&self, context: TaskContext) -> ContextGuard {
        *self.current.lock() = Some(context);
        ContextGuard {
            slot: self.current.clone(),
        }
    }

    fn active(&self, operation: &'static str) -> ConvoyResult<TaskContext> {
        self.current().ok_or(ConvoyError::NoActiveTask { operation })
    }

    pub(crate) async fn send_status_update(
        &self,
        status: TaskStatus,
        report: StatusReport,
    ) -> ConvoyResult<()> {
        let ctx = self.active("status update")?;
        let update = StatusUpdate {
            message: report.message,
            result: report.result,
            error: report.error,
            ..StatusUpdate::new(ctx.job_id, ctx.task_id, status)
        };
        publish_json(
            self.bus.as_ref(),
            STATUS_EXCHANGE,
            &status_routing_key(&self.agent_id),
            &update,
        )
        .await?;
        info!(
            agent_id = %self.agent_id,
            job_id = %ctx.job_id,
            task_id = %ctx.task_id,
            status = %status,
            "Sent status update"
        );
        Ok(())
    }

    pub(crate) async fn send_trace_event(&self, step: &str, details: Value) -> ConvoyResult<()> {
        let ctx = self.active("trace event")?;
        let event = TraceEvent {
            job_id: ctx.job_id,
            task_id: ctx.task_id,
            agent_id: self.agent_id.to_string(),
            step: step.to_string(),
            details: into_details(details),
            timestamp: Utc::now(),
        };
        publish_json(
            self.bus.as_ref(),
            LOGS_EXCHANGE,
            &logs_routing_key(&self.agent_id),
            &event,
        )
        .await?;
        debug!(agent_id = %self.agent_id, task_id = %ctx.task_id, step, "Sent trace event");
        Ok(())
    }
}

/// Objects become the details map, `null` means no details, anything else is
/// wrapped as `{"value": ...}`.
fn into_details(details: Value) -> Option<Map<String, Value>> {
    match details {
        Value::Null => None,
        Value::Object(map) => Some(map),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            Some(map)
        }
    }
}

/// Clears the task slot when handling ends, on every exit path.
pub(crate) struct ContextGuard {
    slot: Arc<Mutex<Option<TaskContext>>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

/// Handed to a [`TaskExecutor`](crate::TaskExecutor) to report progress on the
/// active task and to call external tools.
pub struct Tracer {
    reporter: Reporter,
    tools: Option<Arc<ToolManagerClient>>,
}

impl Tracer {
    pub(crate) fn new(reporter: Reporter, tools: Option<Arc<ToolManagerClient>>) -> Self {
        Self { reporter, tools }
    }

    pub fn agent_id(&self) -> &str {
        self.reporter.agent_id()
    }

    /// Publish a trace step for the active task.
    pub async fn step(&self, step: &str, details: Value) -> ConvoyResult<()> {
        self.reporter.send_trace_event(step, details).await
    }

    pub fn has_tools(&self) -> bool {
        self.tools.is_some()
    }

    /// Run a tool through the tool manager, tracing the call and its outcome.
    pub async fn execute_tool(&self, tool_name: &str, params: Value) -> ConvoyResult<Value> {
        let Some(tools) = &self.tools else {
            return Err(ConvoyError::Tool {
                tool_name: tool_name.to_string(),
                message: "Tool manager client not configured".to_string(),
            });
        };

        self.step(
            "executing_tool",
            json!({"toolName": tool_name, "params": params}),
        )
        .await?;

        match tools.execute_tool(tool_name, params).await {
            Ok(result) => {
                self.step(
                    "tool_execution_completed",
                    json!({"toolName": tool_name, "result": result}),
                )
                .await?;
                Ok(result)
            }
            Err(e) => {
                self.step(
                    "tool_execution_failed",
                    json!({"toolName": tool_name, "error": e.to_string()}),
                )
                .await?;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use convoy_bus::{declare_shared_exchanges, InMemoryBus};

    async fn reporter() -> (Arc<InMemoryBus>, Reporter) {
        let bus = Arc::new(InMemoryBus::new());
        bus.connect().await.unwrap();
        declare_shared_exchanges(bus.as_ref()).await.unwrap();
        let reporter = Reporter::new(bus.clone(), "echo-agent");
        (bus, reporter)
    }

    fn ctx() -> TaskContext {
        TaskContext {
            job_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_reporting_without_context_fails() {
        let (bus, reporter) = reporter().await;
        let err = reporter
            .send_status_update(TaskStatus::InProgress, StatusReport::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConvoyError::NoActiveTask { .. }));
        assert!(matches!(
            reporter.send_trace_event("x", Value::Null).await,
            Err(ConvoyError::NoActiveTask { .. })
        ));
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_guard_clears_context() {
        let (_bus, reporter) = reporter().await;
        let context = ctx();
        {
            let _guard = reporter.enter(context);
            assert_eq!(reporter.current(), Some(context));
        }
        assert_eq!(reporter.current(), None);
    }

    #[tokio::test]
    async fn test_status_update_fills_ids_and_routing() {
        let (bus, reporter) = reporter().await;
        let context = ctx();
        let _guard = reporter.enter(context);
        reporter
            .send_status_update(
                TaskStatus::Completed,
                StatusReport {
                    result: Some(json!({"ok": true})),
                    ..StatusReport::default()
                },
            )
            .await
            .unwrap();

        let sent = bus.published_to(STATUS_EXCHANGE);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].routing_key, "agent.echo-agent.status");
        let update: StatusUpdate = sent[0].parse().unwrap();
        assert_eq!(update.job_id, context.job_id);
        assert_eq!(update.task_id, context.task_id);
        assert_eq!(update.result, Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn test_trace_details_shapes() {
        let (bus, reporter) = reporter().await;
        let _guard = reporter.enter(ctx());
        reporter.send_trace_event("a", json!({"k": 1})).await.unwrap();
        reporter.send_trace_event("b", Value::Null).await.unwrap();
        reporter.send_trace_event("c", json!("text")).await.unwrap();

        let events: Vec<TraceEvent> = bus
            .published_to(LOGS_EXCHANGE)
            .iter()
            .map(|m| m.parse().unwrap())
            .collect();
        assert_eq!(events[0].details.as_ref().unwrap()["k"], 1);
        assert!(events[1].details.is_none());
        assert_eq!(events[2].details.as_ref().unwrap()["value"], "text");
        assert!(events.iter().all(|e| e.agent_id == "echo-agent"));
    }

    #[tokio::test]
    async fn test_tracer_without_tools() {
        let (_bus, reporter) = reporter().await;
        let tracer = Tracer::new(reporter.clone(), None);
        let _guard = reporter.enter(ctx());
        assert!(!tracer.has_tools());
        let err = tracer.execute_tool("mock_api", json!({})).await.unwrap_err();
        assert!(matches!(err, ConvoyError::Tool { ref tool_name, .. } if tool_name == "mock_api"));
    }
}
