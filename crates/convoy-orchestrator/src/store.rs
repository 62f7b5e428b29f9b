use chrono::{DateTime, Utc};
use convoy_core::{ConvoyError, ConvoyResult, StatusUpdate, TaskAssignment, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Job-level status derived from its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Created; planning or dispatch still running.
    Pending,
    /// Tasks are published and at least one is not finished.
    InProgress,
    /// Every task completed.
    Completed,
    /// A task failed, or planning or dispatch failed.
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::InProgress => write!(f, "in-progress"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Fold task statuses into a job status.
///
/// Precedence: any `failed` wins, then all `completed`, then any
/// `in-progress`; otherwise the job keeps `current`.
pub fn aggregate<I>(statuses: I, current: JobStatus) -> JobStatus
where
    I: IntoIterator<Item = TaskStatus>,
{
    let mut all_completed = true;
    let mut any_in_progress = false;
    for status in statuses {
        match status {
            TaskStatus::Failed => return JobStatus::Failed,
            TaskStatus::Completed => {}
            TaskStatus::InProgress => {
                all_completed = false;
                any_in_progress = true;
            }
            _ => all_completed = false,
        }
    }

    if all_completed {
        JobStatus::Completed
    } else if any_in_progress {
        JobStatus::InProgress
    } else {
        current
    }
}

/// One submitted goal and the latest status of each of its tasks.
#[derive(Debug, Clone)]
pub struct Job {
    /// Id returned to the submitter.
    pub job_id: Uuid,
    /// Goal text as submitted.
    pub goal: String,
    /// Aggregated status, see [`aggregate`].
    pub status: JobStatus,
    /// Latest update per task id.
    pub tasks: HashMap<Uuid, StatusUpdate>,
    /// Dispatch order of `tasks`.
    order: Vec<Uuid>,
    /// Last mutation.
    pub timestamp: DateTime<Utc>,
    /// Planner or dispatch failure, if any.
    pub error: Option<String>,
    /// Set by a planner or dispatch failure; freezes `status`.
    forced: bool,
}

impl Job {
    fn new(job_id: Uuid, goal: &str) -> Self {
        Self {
            job_id,
            goal: goal.to_string(),
            status: JobStatus::Pending,
            tasks: HashMap::new(),
            order: Vec::new(),
            timestamp: Utc::now(),
            error: None,
            forced: false,
        }
    }

    /// Whether [`JobStore::force_fail`] froze this job.
    pub fn is_force_failed(&self) -> bool {
        self.forced
    }

    fn recompute(&mut self) {
        self.status = aggregate(self.tasks.values().map(|t| t.status), self.status);
    }

    /// Owned copy for callers outside the store lock.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id,
            goal: self.goal.clone(),
            status: self.status,
            timestamp: self.timestamp,
            error: self.error.clone(),
            tasks: self
                .order
                .iter()
                .filter_map(|id| self.tasks.get(id).cloned())
                .collect(),
        }
    }
}

/// Query projection of a [`Job`], tasks in dispatch order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    /// See [`Job::job_id`].
    pub job_id: Uuid,
    /// See [`Job::goal`].
    pub goal: String,
    /// See [`Job::status`].
    pub status: JobStatus,
    /// Last mutation.
    pub timestamp: DateTime<Utc>,
    /// See [`Job::error`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Latest update per task.
    pub tasks: Vec<StatusUpdate>,
}

/// Result of feeding one status update to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The task entry was replaced and the job status recomputed.
    Applied(JobStatus),
    /// The task entry was replaced; the job was force-failed so its status stays.
    Frozen,
    /// The job id is not in the store.
    UnknownJob,
    /// The task id is not part of the job.
    UnknownTask,
}

/// All jobs known to one orchestrator. Nothing is persisted or evicted.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: HashMap<Uuid, Job>,
    task_index: HashMap<Uuid, Uuid>,
}

impl JobStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a `pending` job with no tasks.
    pub fn create_job(&mut self, job_id: Uuid, goal: &str) {
        self.jobs.insert(job_id, Job::new(job_id, goal));
    }

    /// Record every task as `pending`. Task ids must be new to the store.
    pub fn seed_tasks(&mut self, job_id: Uuid, tasks: &[TaskAssignment]) -> ConvoyResult<()> {
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| ConvoyError::not_found("job", job_id))?;

        let mut seen = HashSet::new();
        for task in tasks {
            if !seen.insert(task.task_id) || self.task_index.contains_key(&task.task_id) {
                return Err(ConvoyError::validation(format!(
                    "duplicate taskId {}",
                    task.task_id
                )));
            }
        }

        for task in tasks {
            job.tasks
                .insert(task.task_id, StatusUpdate::pending(job_id, task.task_id));
            job.order.push(task.task_id);
            self.task_index.insert(task.task_id, job_id);
        }
        job.timestamp = Utc::now();
        Ok(())
    }

    /// All tasks are published: a still-pending job moves to `in-progress`,
    /// or straight to `completed` when it has no tasks.
    pub fn mark_dispatched(&mut self, job_id: Uuid) {
        if let Some(job) = self.jobs.get_mut(&job_id) {
            if job.status == JobStatus::Pending && !job.forced {
                job.status = if job.tasks.is_empty() {
                    JobStatus::Completed
                } else {
                    JobStatus::InProgress
                };
                job.timestamp = Utc::now();
            }
        }
    }

    /// Terminal override: `failed` with `error`, never recomputed afterwards.
    pub fn force_fail(&mut self, job_id: Uuid, error: impl Into<String>) {
        if let Some(job) = self.jobs.get_mut(&job_id) {
            job.status = JobStatus::Failed;
            job.error = Some(error.into());
            job.forced = true;
            job.timestamp = Utc::now();
        }
    }

    /// Replace the task's latest update and recompute the job status.
    pub fn apply(&mut self, update: StatusUpdate) -> ApplyOutcome {
        let Some(job) = self.jobs.get_mut(&update.job_id) else {
            return ApplyOutcome::UnknownJob;
        };
        let Some(entry) = job.tasks.get_mut(&update.task_id) else {
            return ApplyOutcome::UnknownTask;
        };

        *entry = update;
        job.timestamp = Utc::now();
        if job.forced {
            return ApplyOutcome::Frozen;
        }
        job.recompute();
        ApplyOutcome::Applied(job.status)
    }

    /// Borrow a job.
    pub fn job(&self, job_id: Uuid) -> Option<&Job> {
        self.jobs.get(&job_id)
    }

    /// Snapshot of one job.
    pub fn snapshot(&self, job_id: Uuid) -> Option<JobSnapshot> {
        self.jobs.get(&job_id).map(Job::snapshot)
    }

    /// Snapshots of every job, newest mutation first.
    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        let mut all: Vec<JobSnapshot> = self.jobs.values().map(Job::snapshot).collect();
        all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        all
    }

    /// Latest update of a task, looked up across all jobs.
    pub fn task(&self, task_id: Uuid) -> Option<&StatusUpdate> {
        let job_id = self.task_index.get(&task_id)?;
        self.jobs.get(job_id)?.tasks.get(&task_id)
    }

    /// Number of jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no job was ever created.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
