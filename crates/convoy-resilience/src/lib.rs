//! Resilience primitives wrapped around every outbound call.
//!
//! Both primitives are plain wrappers over a generic async operation and
//! compose by nesting: `breaker.call(|| with_retry(&policy, op))` retries
//! inside one breaker call, `with_retry(&policy, || breaker.call(op))` lets
//! every attempt count against the breaker.
//!
//! # Main types
//!
//! - [`RetryPolicy`]: Exponential backoff with jitter and a per-attempt timeout.
//! - [`CircuitBreaker`]: closed / open / half-open state machine.

/// Circuit breaker.
pub mod circuit_breaker;
/// Retry with exponential backoff.
pub mod retry;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use retry::{compute_backoff, with_retry, with_retry_if, RetryPolicy};
