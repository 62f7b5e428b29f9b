use crate::planner::Planner;
use crate::store::{ApplyOutcome, JobSnapshot, JobStore};
use convoy_bus::topology::{
    task_routing_key, STATUS_BINDING, STATUS_EXCHANGE, STATUS_QUEUE, TASKS_EXCHANGE,
};
use convoy_bus::{declare_shared_exchanges, publish_json, Delivery, MessageBus, QueueOptions};
use convoy_core::{ConvoyResult, StatusUpdate};
use futures_util::StreamExt;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const CONSUMER_TAG: &str = "orchestrator";

/// Owns job state: decomposes goals, dispatches their tasks and aggregates
/// the status updates workers report.
///
/// The store lock is never held across a planner or bus call.
pub struct Orchestrator {
    bus: Arc<dyn MessageBus>,
    planner: Arc<dyn Planner>,
    store: RwLock<JobStore>,
}

impl Orchestrator {
    pub fn new(bus: Arc<dyn MessageBus>, planner: Arc<dyn Planner>) -> Self {
        Self {
            bus,
            planner,
            store: RwLock::new(JobStore::new()),
        }
    }

    /// Connect and declare the exchanges plus the status-aggregation queue.
    pub async fn connect(&self) -> ConvoyResult<()> {
        self.bus.connect().await?;
        declare_shared_exchanges(self.bus.as_ref()).await?;
        self.bus
            .declare_queue(STATUS_QUEUE, &QueueOptions::default())
            .await?;
        self.bus
            .bind_queue(STATUS_QUEUE, STATUS_EXCHANGE, STATUS_BINDING)
            .await?;
        info!(queue = STATUS_QUEUE, binding = STATUS_BINDING, "Orchestrator connected");
        Ok(())
    }

    /// [`Self::process_goal_with_context`] without planning context.
    pub async fn process_goal(&self, goal: &str) -> ConvoyResult<Uuid> {
        self.process_goal_with_context(goal, None).await
    }

    /// Create a job, decompose `goal` and publish its tasks.
    ///
    /// Returns once every task is published; it does not wait for workers.
    /// Planner or publish failures force the job to `failed` and are returned.
    pub async fn process_goal_with_context(
        &self,
        goal: &str,
        context: Option<Map<String, Value>>,
    ) -> ConvoyResult<Uuid> {
        let job_id = Uuid::new_v4();
        self.store.write().await.create_job(job_id, goal);
        info!(job_id = %job_id, "Processing goal");

        let mut tasks = match self.planner.decompose_goal(goal, context.as_ref()).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Goal decomposition failed");
                self.store.write().await.force_fail(job_id, e.to_string());
                return Err(e);
            }
        };
        for task in &mut tasks {
            task.job_id = job_id;
        }

        // Seed before publishing so an early worker status is not overwritten.
        if let Err(e) = self.store.write().await.seed_tasks(job_id, &tasks) {
            self.fail_dispatch(job_id, &e.to_string()).await;
            return Err(e);
        }

        for task in &tasks {
            let routing_key = task_routing_key(&task.task_type);
            let published =
                publish_json(self.bus.as_ref(), TASKS_EXCHANGE, &routing_key, task).await;
            if let Err(e) = published {
                self.fail_dispatch(
                    job_id,
                    &format!("Failed to dispatch task {}: {e}", task.task_id),
                )
                .await;
                return Err(e);
            }
            debug!(job_id = %job_id, task_id = %task.task_id, routing_key = %routing_key, "Task published");
        }

        self.store.write().await.mark_dispatched(job_id);
        info!(job_id = %job_id, tasks = tasks.len(), "Job dispatched");
        Ok(job_id)
    }

    async fn fail_dispatch(&self, job_id: Uuid, reason: &str) {
        error!(job_id = %job_id, error = reason, "Dispatch failed");
        self.store.write().await.force_fail(job_id, reason);
    }

    /// Fold one worker status update into its job.
    pub async fn handle_status_update(&self, update: StatusUpdate) -> ApplyOutcome {
        let (job_id, task_id, status) = (update.job_id, update.task_id, update.status);
        let outcome = self.store.write().await.apply(update);
        match outcome {
            ApplyOutcome::Applied(job_status) => {
                debug!(job_id = %job_id, task_id = %task_id, task_status = %status, job_status = %job_status, "Status applied");
            }
            ApplyOutcome::Frozen => {
                warn!(job_id = %job_id, task_id = %task_id, task_status = %status, "Status update for a failed job; job status unchanged");
            }
            ApplyOutcome::UnknownJob => {
                warn!(job_id = %job_id, task_id = %task_id, "Status update for unknown job dropped");
            }
            ApplyOutcome::UnknownTask => {
                warn!(job_id = %job_id, task_id = %task_id, "Status update for a task outside the job dropped");
            }
        }
        outcome
    }

    /// Parse, apply and acknowledge one status delivery. Unparseable bodies
    /// are rejected without requeue.
    pub async fn handle_status_delivery(&self, delivery: Delivery) -> ConvoyResult<()> {
        match delivery.parse::<StatusUpdate>() {
            Ok(update) => {
                self.handle_status_update(update).await;
                delivery.ack().await
            }
            Err(e) => {
                warn!(routing_key = %delivery.routing_key, error = %e, "Malformed status update rejected");
                delivery.nack(false).await
            }
        }
    }

    /// Consume `status-updates` until the stream ends.
    pub async fn run_status_consumer(&self) -> ConvoyResult<()> {
        let mut deliveries = self.bus.consume(STATUS_QUEUE, CONSUMER_TAG).await?;
        info!(queue = STATUS_QUEUE, "Consuming status updates");
        while let Some(delivery) = deliveries.next().await {
            self.handle_status_delivery(delivery?).await?;
        }
        info!("Status stream ended");
        Ok(())
    }

    /// Snapshot of one job, `None` when the id is unknown.
    pub async fn get_job_status(&self, job_id: Uuid) -> Option<JobSnapshot> {
        self.store.read().await.snapshot(job_id)
    }

    pub async fn get_task_status(&self, task_id: Uuid) -> Option<StatusUpdate> {
        self.store.read().await.task(task_id).cloned()
    }

    /// Every job, most recently updated first.
    pub async fn list_jobs(&self) -> Vec<JobSnapshot> {
        self.store.read().await.snapshots()
    }

    pub async fn shutdown(&self) -> ConvoyResult<()> {
        self.bus.close().await
    }
}
