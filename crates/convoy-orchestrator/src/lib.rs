//! Job orchestration for the Convoy task mesh.
//!
//! A goal goes to the [`Planner`], which returns validated task assignments.
//! The [`Orchestrator`] stamps them with a job id, records them in its
//! [`JobStore`], publishes them to the tasks exchange, and folds the status
//! updates workers send back into one job-level status.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Goal submission, dispatch and the status consumer.
//! - [`Planner`] / [`HttpPlanner`]: Goal decomposition via the planning service.
//! - [`JobStore`]: Job and task state with the aggregation rule.
//! - [`JobSnapshot`]: Query projection of one job.

/// The orchestrator engine.
pub mod engine;
/// Goal decomposition.
pub mod planner;
/// Job and task state.
pub mod store;

pub use engine::Orchestrator;
pub use planner::{HttpPlanner, Planner, PlannerConfig, PLANNING_CONSTRAINTS};
pub use store::{aggregate, ApplyOutcome, Job, JobSnapshot, JobStatus, JobStore};
