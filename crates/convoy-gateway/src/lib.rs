//! HTTP front end for the Convoy orchestrator.
//!
//! Routes:
//!
//! - `POST /v1/jobs` submits a goal and answers `202 {jobId}`.
//! - `GET /v1/jobs` lists job snapshots, newest first.
//! - `GET /v1/jobs/{jobId}/status` returns one job snapshot.
//! - `GET /health` is a liveness probe.

/// Router construction and handlers.
pub mod server;

pub use server::{AppState, GatewayServer, ServerConfig, MIN_GOAL_LEN};
