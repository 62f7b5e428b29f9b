use convoy_core::{ConvoyError, ConvoyResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Observable state of a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls are rejected until the reset timeout elapses.
    Open,
    /// One probe call is in flight; its outcome decides the next state.
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "closed"),
            BreakerState::Open => write!(f, "open"),
            BreakerState::HalfOpen => write!(f, "half-open"),
        }
    }
}

struct Inner {
    state: BreakerState,
    failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker guarding an unstable downstream call.
///
/// Failures are counted while closed; reaching the threshold opens the
/// breaker. Once `reset_timeout` has passed since the last failure, exactly
/// one call is let through as a half-open probe: success closes the breaker
/// and clears the counter, failure re-opens it with a fresh failure time.
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Closed breaker opening after `threshold` failures (at least one).
    pub fn new(name: impl Into<String>, threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1),
            reset_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Breaker with the default threshold (5) and reset timeout (30s).
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, 5, Duration::from_secs(30))
    }

    /// Name used in logs and in [`ConvoyError::CircuitOpen`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. An open breaker past its reset timeout still reports `Open`
    /// until the next call probes it.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Failures counted since the breaker last closed from half-open.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failures
    }

    /// Run `op` through the breaker.
    ///
    /// Returns [`ConvoyError::CircuitOpen`] without invoking `op` while open.
    pub async fn call<T, F, Fut>(&self, op: F) -> ConvoyResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ConvoyResult<T>>,
    {
        let mut probe = ProbeGuard {
            breaker: self,
            armed: self.admit()?,
        };

        let result = op().await;
        probe.armed = false;
        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        result
    }

    /// Returns whether the admitted call is the half-open probe.
    fn admit(&self) -> ConvoyResult<bool> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(false),
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(self.rejection())
                } else {
                    inner.probe_in_flight = true;
                    Ok(true)
                }
            }
            BreakerState::Open => {
                let cooled = inner
                    .last_failure
                    .map_or(true, |at| at.elapsed() >= self.reset_timeout);
                if !cooled {
                    return Err(self.rejection());
                }
                inner.state = BreakerState::HalfOpen;
                inner.probe_in_flight = true;
                info!(breaker = %self.name, "Circuit half-open, letting one call through");
                Ok(true)
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.failures = 0;
            inner.state = BreakerState::Closed;
            inner.probe_in_flight = false;
            info!(breaker = %self.name, "Circuit closed");
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.probe_in_flight = false;
                warn!(breaker = %self.name, failures = inner.failures, "Probe failed, circuit re-opened");
            }
            BreakerState::Closed if inner.failures >= self.threshold => {
                inner.state = BreakerState::Open;
                warn!(breaker = %self.name, failures = inner.failures, "Circuit opened");
            }
            _ => {}
        }
    }

    fn rejection(&self) -> ConvoyError {
        ConvoyError::CircuitOpen {
            name: self.name.clone(),
        }
    }
}

/// Releases the half-open slot if a probe future is dropped before completing.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.inner.lock().probe_in_flight = false;
        }
    }
}
