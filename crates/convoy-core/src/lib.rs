//! Core types and error definitions for the Convoy task mesh.
//!
//! This crate provides the foundational types shared across all Convoy crates:
//! the unified error enum, the JSON wire protocol exchanged over the message
//! bus, and schema validation for task lists returned by the planning service.
//!
//! # Main types
//!
//! - [`ConvoyError`]: Unified error enum for all Convoy subsystems.
//! - [`ConvoyResult`]: Convenience alias for `Result<T, ConvoyError>`.
//! - [`TaskAssignment`]: One unit of work published to a capability queue.
//! - [`StatusUpdate`]: Worker-reported (or orchestrator-seeded) task status.
//! - [`TraceEvent`]: Advisory progress trace emitted by a worker.
//! - [`AgentCapability`]: Capability announcement published at worker startup.

/// Error types shared by every crate.
pub mod error;
/// Wire protocol messages.
pub mod protocol;
/// Schema validation for planner output.
pub mod validation;

pub use error::{ConvoyError, ConvoyResult};
pub use protocol::{AgentCapability, StatusUpdate, TaskAssignment, TaskStatus, TraceEvent};
pub use validation::{validate_task_assignments, ValidationIssue};
