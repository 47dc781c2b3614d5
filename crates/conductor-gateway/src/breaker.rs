//! Per-backend circuit breaker

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Circuit breaker configuration
#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit trips
    pub failure_threshold: u32,
    /// Base cooldown window after tripping
    pub cooldown: Duration,
    /// Cap for the exponential reopen backoff
    pub max_cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
        }
    }
}

/// Circuit state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls fail fast until the cooldown expires
    Open,
    /// Cooldown expired; a single probe call is in flight
    HalfOpen,
}

/// Outcome of asking the breaker for admission
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permit {
    /// Circuit closed; call normally
    Normal,
    /// This call is the half-open probe. At most one exists at a time,
    /// and it is never retried.
    Probe,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trip_count: u32,
    probe_in_flight: bool,
}

/// Failure-isolation state machine protecting one backend binding.
///
/// All transitions happen under one lock, so two racing requests can
/// never both claim the half-open probe.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// New breaker, closed
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trip_count: 0,
                probe_in_flight: false,
            }),
        }
    }

    /// Ask for admission. `Err` carries the remaining cooldown for the
    /// caller's retry-after hint.
    pub fn try_acquire(&self) -> Result<Permit, Duration> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(Permit::Normal),
            CircuitState::Open => {
                let cooldown = self.current_cooldown(inner.trip_count);
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok(Permit::Probe)
                } else {
                    Err(cooldown - elapsed)
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(self.current_cooldown(inner.trip_count))
                } else {
                    inner.probe_in_flight = true;
                    Ok(Permit::Probe)
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        match inner.state {
            CircuitState::HalfOpen => {
                tracing::info!("circuit closed after successful probe");
                inner.state = CircuitState::Closed;
                inner.trip_count = 0;
                inner.probe_in_flight = false;
                inner.opened_at = None;
            }
            // An in-flight call finishing after the trip does not close
            // the circuit; recovery goes through the half-open probe.
            CircuitState::Open | CircuitState::Closed => {}
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    Self::trip(&mut inner);
                }
            }
            CircuitState::HalfOpen => {
                // Probe failed: reopen with a longer cooldown
                inner.probe_in_flight = false;
                Self::trip(&mut inner);
            }
            CircuitState::Open => {}
        }
    }

    /// Force the circuit open (health loop, repeated probe failures)
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            Self::trip(&mut inner);
        }
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    fn trip(inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.trip_count += 1;
        tracing::warn!(trips = inner.trip_count, "circuit opened");
    }

    fn current_cooldown(&self, trip_count: u32) -> Duration {
        let exponent = trip_count.saturating_sub(1).min(8);
        let cooldown = self.config.cooldown * 2u32.pow(exponent);
        cooldown.min(self.config.max_cooldown)
    }
}
