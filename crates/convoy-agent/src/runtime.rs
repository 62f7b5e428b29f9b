use crate::config::WorkerConfig;
use crate::context::{Reporter, StatusReport, TaskContext, Tracer};
use crate::executor::TaskExecutor;
use crate::tool_client::ToolManagerClient;
use convoy_bus::topology::{
    task_routing_key, CAPABILITIES_EXCHANGE, CAPABILITIES_ROUTING_KEY, TASKS_EXCHANGE,
};
use convoy_bus::{
    declare_dead_letter, declare_shared_exchanges, publish_json, Delivery, MessageBus,
    QueueOptions,
};
use convoy_core::{AgentCapability, ConvoyError, ConvoyResult, TaskAssignment, TaskStatus};
use futures_util::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

/// How one delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Executed and acknowledged.
    Completed,
    /// Execution or reporting failed; rejected without requeue.
    Failed,
    /// The body was not a task assignment; rejected without requeue, no status sent.
    Malformed,
}

/// Runs one worker: consumes its capability queue and executes each task
/// through the injected [`TaskExecutor`], one at a time.
pub struct AgentRuntime {
    config: WorkerConfig,
    bus: Arc<dyn MessageBus>,
    executor: Arc<dyn TaskExecutor>,
    tools: Option<Arc<ToolManagerClient>>,
    dead_letter_exchange: Option<String>,
    reporter: Reporter,
}

impl AgentRuntime {
    pub fn new(
        config: WorkerConfig,
        bus: Arc<dyn MessageBus>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Self {
        let reporter = Reporter::new(bus.clone(), &config.agent_id);
        Self {
            config,
            bus,
            executor,
            tools: None,
            dead_letter_exchange: None,
            reporter,
        }
    }

    pub fn with_tool_client(mut self, tools: Arc<ToolManagerClient>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Rejected tasks go to this exchange instead of being dropped.
    pub fn with_dead_letter_exchange(mut self, exchange: Option<String>) -> Self {
        self.dead_letter_exchange = exchange;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    pub fn current_task(&self) -> Option<TaskContext> {
        self.reporter.current()
    }

    /// Connect, declare topology, bind one routing key per capability and
    /// announce the capabilities.
    ///
    /// With a dead-letter exchange configured, the exchange and its holding
    /// queue are declared before the task queue that points at them.
    pub async fn initialize(&self) -> ConvoyResult<()> {
        self.bus.connect().await?;
        declare_shared_exchanges(self.bus.as_ref()).await?;
        if let Some(exchange) = &self.dead_letter_exchange {
            declare_dead_letter(self.bus.as_ref(), exchange).await?;
        }

        let queue = &self.config.task_queue;
        let options = QueueOptions::with_dead_letter(self.dead_letter_exchange.clone());
        self.bus.declare_queue(queue, &options).await?;
        for capability in &self.config.capabilities {
            self.bus
                .bind_queue(queue, TASKS_EXCHANGE, &task_routing_key(capability))
                .await?;
        }

        info!(
            agent_id = %self.config.agent_id,
            queue = %queue,
            capabilities = ?self.config.capabilities,
            "Worker initialized"
        );
        self.register_capabilities().await
    }

    pub async fn register_capabilities(&self) -> ConvoyResult<()> {
        let announcement =
            AgentCapability::new(&self.config.agent_id, self.config.capabilities.clone());
        publish_json(
            self.bus.as_ref(),
            CAPABILITIES_EXCHANGE,
            CAPABILITIES_ROUTING_KEY,
            &announcement,
        )
        .await?;
        info!(agent_id = %self.config.agent_id, "Registered capabilities");
        Ok(())
    }

    /// Consume the task queue until the stream ends.
    ///
    /// Deliveries are handled sequentially. A transport error on the stream or
    /// while settling a delivery ends the loop with that error.
    pub async fn run(&self) -> ConvoyResult<()> {
        let mut deliveries = self
            .bus
            .consume(&self.config.task_queue, &self.config.agent_id)
            .await?;
        info!(agent_id = %self.config.agent_id, queue = %self.config.task_queue, "Listening for tasks");

        while let Some(delivery) = deliveries.next().await {
            self.handle_delivery(delivery?).await?;
        }

        info!(agent_id = %self.config.agent_id, "Task stream ended");
        Ok(())
    }

    /// Process one delivery and settle it.
    ///
    /// Returns `Err` only when the broker rejects the ack/nack itself; task
    /// failures are reported as [`DeliveryOutcome::Failed`].
    pub async fn handle_delivery(&self, delivery: Delivery) -> ConvoyResult<DeliveryOutcome> {
        let task: TaskAssignment = match delivery.parse() {
            Ok(task) => task,
            Err(e) => {
                warn!(
                    agent_id = %self.config.agent_id,
                    routing_key = %delivery.routing_key,
                    error = %e,
                    "Discarding malformed task message"
                );
                delivery.nack(false).await?;
                return Ok(DeliveryOutcome::Malformed);
            }
        };

        info!(
            agent_id = %self.config.agent_id,
            job_id = %task.job_id,
            task_id = %task.task_id,
            task_type = %task.task_type,
            "Received task"
        );

        let _context = self.reporter.enter(TaskContext {
            job_id: task.job_id,
            task_id: task.task_id,
        });

        let completed = match self.execute(&task).await {
            Ok(result) => match self.report_completed(&task, result).await {
                Ok(()) => true,
                Err(e) => {
                    error!(task_id = %task.task_id, error = %e, "Failed to report completion");
                    self.report_failed(&task, &e).await;
                    false
                }
            },
            Err(e) => {
                self.report_failed(&task, &e).await;
                false
            }
        };

        if completed {
            delivery.ack().await?;
            info!(task_id = %task.task_id, "Task completed");
            Ok(DeliveryOutcome::Completed)
        } else {
            delivery.nack(false).await?;
            Ok(DeliveryOutcome::Failed)
        }
    }

    async fn execute(&self, task: &TaskAssignment) -> ConvoyResult<Value> {
        self.reporter
            .send_status_update(TaskStatus::InProgress, StatusReport::default())
            .await?;
        self.reporter
            .send_trace_event(
                "task_started",
                json!({"taskType": task.task_type, "description": task.description}),
            )
            .await?;

        let tracer = Tracer::new(self.reporter.clone(), self.tools.clone());
        self.executor.execute_task(task, &tracer).await
    }

    async fn report_completed(&self, task: &TaskAssignment, result: Value) -> ConvoyResult<()> {
        self.reporter
            .send_trace_event(
                "task_completed",
                json!({"taskType": task.task_type, "result": result}),
            )
            .await?;
        self.reporter
            .send_status_update(
                TaskStatus::Completed,
                StatusReport {
                    result: Some(result),
                    ..StatusReport::default()
                },
            )
            .await
    }

    async fn report_failed(&self, task: &TaskAssignment, cause: &ConvoyError) {
        let wrapped = ConvoyError::TaskExecution {
            job_id: task.job_id,
            task_id: task.task_id,
            message: cause.to_string(),
        };
        error!(agent_id = %self.config.agent_id, error = %wrapped, "Task execution failed");

        let detail = cause.to_string();
        if let Err(e) = self
            .reporter
            .send_trace_event("task_failed", json!({"error": detail, "code": cause.code()}))
            .await
        {
            warn!(task_id = %task.task_id, error = %e, "Failed to send failure trace");
        }
        let report = StatusReport {
            message: Some(format!("Task execution failed: {detail}")),
            error: Some(detail),
            ..StatusReport::default()
        };
        if let Err(e) = self
            .reporter
            .send_status_update(TaskStatus::Failed, report)
            .await
        {
            warn!(task_id = %task.task_id, error = %e, "Failed to send failure status");
        }
    }

    /// Report a status for the active task.
    pub async fn send_status_update(
        &self,
        status: TaskStatus,
        report: StatusReport,
    ) -> ConvoyResult<()> {
        self.reporter.send_status_update(status, report).await
    }

    /// Publish a trace step for the active task.
    pub async fn send_trace_event(&self, step: &str, details: Value) -> ConvoyResult<()> {
        self.reporter.send_trace_event(step, details).await
    }

    pub async fn shutdown(&self) -> ConvoyResult<()> {
        self.bus.close().await?;
        info!(agent_id = %self.config.agent_id, "Worker shut down");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use convoy_bus::topology::{LOGS_EXCHANGE, STATUS_EXCHANGE};
    use convoy_bus::{DeliveryStream, InMemoryBus};
    use convoy_core::{StatusUpdate, TraceEvent};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    struct Scripted {
        fail: bool,
    }

    #[async_trait]
    impl TaskExecutor for Scripted {
        async fn execute_task(&self, task: &TaskAssignment, tracer: &Tracer) -> ConvoyResult<Value> {
            tracer.step("working", Value::Null).await?;
            if self.fail {
                Err(ConvoyError::validation("bad input"))
            } else {
                Ok(json!({"echo": task.description}))
            }
        }
    }

    async fn setup(fail: bool) -> (Arc<InMemoryBus>, AgentRuntime, DeliveryStream) {
        let bus = Arc::new(InMemoryBus::new());
        let runtime = AgentRuntime::new(
            WorkerConfig::default(),
            bus.clone(),
            Arc::new(Scripted { fail }),
        );
        runtime.initialize().await.unwrap();
        let stream = bus.consume("agent.echo.tasks", "test").await.unwrap();
        (bus, runtime, stream)
    }

    /// Delegates to an in-memory bus but refuses the `fail_at`-th trace event.
    struct FlakyLogs {
        inner: Arc<InMemoryBus>,
        logs_published: AtomicU32,
        fail_at: u32,
    }

    #[async_trait]
    impl MessageBus for FlakyLogs {
        async fn connect(&self) -> ConvoyResult<()> {
            self.inner.connect().await
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }

        async fn declare_exchange(
            &self,
            name: &str,
            kind: convoy_bus::ExchangeKind,
        ) -> ConvoyResult<()> {
            self.inner.declare_exchange(name, kind).await
        }

        async fn declare_queue(&self, name: &str, options: &QueueOptions) -> ConvoyResult<()> {
            self.inner.declare_queue(name, options).await
        }

        async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> ConvoyResult<()> {
            self.inner.bind_queue(queue, exchange, routing_key).await
        }

        async fn publish(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> ConvoyResult<()> {
            if exchange == LOGS_EXCHANGE
                && self.logs_published.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_at
            {
                return Err(ConvoyError::communication("broker", "publish not confirmed"));
            }
            self.inner.publish(exchange, routing_key, payload).await
        }

        async fn consume(&self, queue: &str, consumer_tag: &str) -> ConvoyResult<DeliveryStream> {
            self.inner.consume(queue, consumer_tag).await
        }

        async fn close(&self) -> ConvoyResult<()> {
            self.inner.close().await
        }
    }

    async fn next(stream: &mut DeliveryStream) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    fn statuses(bus: &InMemoryBus) -> Vec<StatusUpdate> {
        bus.published_to(STATUS_EXCHANGE)
            .iter()
            .map(|m| m.parse().unwrap())
            .collect()
    }

    fn steps(bus: &InMemoryBus) -> Vec<String> {
        bus.published_to(LOGS_EXCHANGE)
            .iter()
            .map(|m| m.parse::<TraceEvent>().unwrap().step)
            .collect()
    }

    async fn assert_no_active_task(runtime: &AgentRuntime) {
        assert!(runtime.current_task().is_none());
        assert!(matches!(
            runtime
                .send_status_update(TaskStatus::InProgress, StatusReport::default())
                .await,
            Err(ConvoyError::NoActiveTask { .. })
        ));
    }

    #[tokio::test]
    async fn test_initialize_announces_capabilities() {
        let (bus, _runtime, _stream) = setup(false).await;
        let sent = bus.published_to(CAPABILITIES_EXCHANGE);
        assert_eq!(sent.len(), 1);
        let cap: AgentCapability = sent[0].parse().unwrap();
        assert_eq!(cap.agent_id, "echo-agent");
        assert_eq!(cap.capabilities, vec!["echo"]);
    }

    #[tokio::test]
    async fn test_success_path() {
        let (bus, runtime, mut stream) = setup(false).await;
        let task = TaskAssignment::new(Uuid::new_v4(), "echo", "hello");
        publish_json(bus.as_ref(), TASKS_EXCHANGE, "task.echo", &task)
            .await
            .unwrap();

        let outcome = runtime.handle_delivery(next(&mut stream).await).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Completed);
        assert_no_active_task(&runtime).await;

        let sent = statuses(&bus);
        let kinds: Vec<TaskStatus> = sent.iter().map(|s| s.status).collect();
        assert_eq!(kinds, vec![TaskStatus::InProgress, TaskStatus::Completed]);
        assert_eq!(sent[1].result, Some(json!({"echo": "hello"})));
        assert!(sent.iter().all(|s| s.task_id == task.task_id));
        assert_eq!(steps(&bus), vec!["task_started", "working", "task_completed"]);
    }

    #[tokio::test]
    async fn test_failure_path() {
        let (bus, runtime, mut stream) = setup(true).await;
        let task = TaskAssignment::new(Uuid::new_v4(), "echo", "hello");
        publish_json(bus.as_ref(), TASKS_EXCHANGE, "task.echo", &task)
            .await
            .unwrap();

        let outcome = runtime.handle_delivery(next(&mut stream).await).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Failed);
        assert_no_active_task(&runtime).await;

        let sent = statuses(&bus);
        assert_eq!(sent.len(), 2);
        let failed = &sent[1];
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(
            failed.message.as_deref(),
            Some("Task execution failed: Validation error: bad input")
        );
        assert_eq!(failed.error.as_deref(), Some("Validation error: bad input"));
        assert_eq!(steps(&bus).last().map(String::as_str), Some("task_failed"));
        // dropped: no dead-letter exchange, no requeue
        assert_eq!(bus.queue_depth("agent.echo.tasks"), 0);
    }

    #[tokio::test]
    async fn test_malformed_message_is_rejected_silently() {
        let (bus, runtime, mut stream) = setup(false).await;
        bus.publish(TASKS_EXCHANGE, "task.echo", b"not json").await.unwrap();

        let outcome = runtime.handle_delivery(next(&mut stream).await).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Malformed);
        assert_no_active_task(&runtime).await;
        assert!(statuses(&bus).is_empty());
    }

    #[tokio::test]
    async fn test_completion_report_failure_reports_failed() {
        let bus = Arc::new(InMemoryBus::new());
        // task_started, working, then task_completed is refused
        let flaky = Arc::new(FlakyLogs {
            inner: bus.clone(),
            logs_published: AtomicU32::new(0),
            fail_at: 3,
        });
        let runtime = AgentRuntime::new(
            WorkerConfig::default(),
            flaky,
            Arc::new(Scripted { fail: false }),
        );
        runtime.initialize().await.unwrap();
        let mut stream = bus.consume("agent.echo.tasks", "test").await.unwrap();

        let task = TaskAssignment::new(Uuid::new_v4(), "echo", "hello");
        publish_json(bus.as_ref(), TASKS_EXCHANGE, "task.echo", &task)
            .await
            .unwrap();

        let outcome = runtime.handle_delivery(next(&mut stream).await).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Failed);
        assert_no_active_task(&runtime).await;

        let sent = statuses(&bus);
        let kinds: Vec<TaskStatus> = sent.iter().map(|s| s.status).collect();
        assert_eq!(kinds, vec![TaskStatus::InProgress, TaskStatus::Failed]);
        assert!(sent[1].error.as_deref().unwrap().contains("publish not confirmed"));
        assert_eq!(steps(&bus), vec!["task_started", "working", "task_failed"]);
    }

    #[tokio::test]
    async fn test_initialize_declares_dead_letter_holding_queue() {
        let bus = Arc::new(InMemoryBus::new());
        let runtime = AgentRuntime::new(
            WorkerConfig::default(),
            bus.clone(),
            Arc::new(Scripted { fail: true }),
        )
        .with_dead_letter_exchange(Some("dead-tasks".into()));
        runtime.initialize().await.unwrap();
        let mut stream = bus.consume("agent.echo.tasks", "test").await.unwrap();

        let task = TaskAssignment::new(Uuid::new_v4(), "echo", "hello");
        publish_json(bus.as_ref(), TASKS_EXCHANGE, "task.echo", &task)
            .await
            .unwrap();

        let outcome = runtime.handle_delivery(next(&mut stream).await).await.unwrap();
        assert_eq!(outcome, DeliveryOutcome::Failed);
        assert_eq!(bus.queue_depth("agent.echo.tasks"), 0);
        assert_eq!(bus.queue_depth("dead-tasks"), 1);
    }

    #[tokio::test]
    async fn test_reporting_outside_task_fails() {
        let (_bus, runtime, _stream) = setup(false).await;
        let err = runtime
            .send_status_update(TaskStatus::InProgress, StatusReport::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConvoyError::NoActiveTask { .. }));
        assert!(matches!(
            runtime.send_trace_event("x", Value::Null).await,
            Err(ConvoyError::NoActiveTask { .. })
        ));
    }

    #[tokio::test]
    async fn test_shutdown_closes_bus() {
        let (bus, runtime, _stream) = setup(false).await;
        runtime.shutdown().await.unwrap();
        assert!(!bus.is_connected());
    }
}
