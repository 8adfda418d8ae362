//! Circuit breaker for the exchange gateway.
//!
//! Consecutive transport failures open the circuit and fail calls fast
//! instead of hammering a broken endpoint; after a cool-off the breaker
//! admits probe calls and closes again on sustained success.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    /// Normal operation, requests pass through.
    Closed,
    /// Failure threshold breached, requests are rejected.
    Open,
    /// Cool-off elapsed, probing whether the service recovered.
    HalfOpen,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: usize,
    probe_successes: usize,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    failure_threshold: usize,
    success_threshold: usize,
    cool_off: Duration,
    inner: Mutex<BreakerInner>,
}

#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the call was not attempted.
    Open(String),
    /// The call ran and failed.
    Inner(E),
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: usize,
        success_threshold: usize,
        cool_off: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            failure_threshold,
            success_threshold,
            cool_off,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                probe_successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Run `f` under breaker protection.
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == BreakerState::Open {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed > self.cool_off {
                    info!("CircuitBreaker [{}]: Open -> HalfOpen (cool-off elapsed)", self.name);
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_successes = 0;
                } else {
                    return Err(CircuitBreakerError::Open(format!(
                        "circuit breaker [{}] open, retry in {:?}",
                        self.name,
                        self.cool_off.saturating_sub(elapsed)
                    )));
                }
            }
        }

        match f.await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(e) => {
                self.on_failure().await;
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    async fn on_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::HalfOpen => {
                inner.probe_successes += 1;
                if inner.probe_successes >= self.success_threshold {
                    info!(
                        "CircuitBreaker [{}]: HalfOpen -> Closed ({} probe successes)",
                        self.name, inner.probe_successes
                    );
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.probe_successes = 0;
                    inner.opened_at = None;
                }
            }
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::Open => {}
        }
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            BreakerState::HalfOpen => {
                warn!("CircuitBreaker [{}]: probe failed, HalfOpen -> Open", self.name);
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    warn!(
                        "CircuitBreaker [{}]: Closed -> Open after {} consecutive failures",
                        self.name, inner.consecutive_failures
                    );
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }
}
