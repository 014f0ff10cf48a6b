//! Per-dependency circuit breaker.
//!
//! Tracks consecutive failures per named upstream ("search-provider",
//! "term-service", "video-search", ...) and short-circuits calls to a
//! dependency that keeps failing. After a cooldown, a single trial call is
//! let through; its outcome decides whether the circuit closes or re-opens.
//!
//! # State Machine
//!
//! ```text
//! ┌────────┐  N failures   ┌────────┐  cooldown   ┌──────────┐
//! │ Closed ├──────────────►│  Open  ├────────────►│ HalfOpen │
//! └───▲────┘               └────────┘             └────┬─────┘
//!     │                         ▲                      │
//!     │  success                │  failure              │
//!     └─────────────────────────┴──────────────────────┘
//! ```
//!
//! Each dependency owns an independent state machine, created lazily on
//! first use. A short-circuit is logged as its own event so operators can
//! tell "upstream is known down" apart from "upstream failed this call".

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{FetchError, Result};
use crate::sync::lock;

/// Circuit breaker state for a single dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CircuitState {
    /// Dependency is healthy; every request is allowed through.
    Closed,
    /// Dependency has failed too many times; requests are short-circuited until the cooldown expires.
    Open,
    /// Cooldown has elapsed; one trial request tests recovery.
    HalfOpen,
}

/// Health tracking data for a single dependency.
#[derive(Debug, Clone)]
struct CircuitHealth {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    trial_in_flight: bool,
    short_circuits: u64,
}

impl Default for CircuitHealth {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            last_failure_at: None,
            trial_in_flight: false,
            short_circuits: 0,
        }
    }
}

/// Configuration for circuit breaker behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before tripping the circuit to Open.
    pub failure_threshold: u32,
    /// Seconds to wait in Open state before allowing a trial call.
    pub cooldown_secs: u64,
    /// A failure more than this many seconds after the previous one starts a
    /// fresh count instead of extending the streak.
    pub failure_window_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 30,
            failure_window_secs: 60,
        }
    }
}

impl CircuitBreakerConfig {
    /// Validates this configuration.
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(FetchError::Config(
                "failure_threshold must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    fn failure_window(&self) -> Duration {
        Duration::from_secs(self.failure_window_secs)
    }
}

/// Whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit closed; call normally.
    Allowed,
    /// Circuit half-open and this caller holds the single trial slot.
    Trial,
    /// Circuit open (or a trial is already running); do not call.
    Rejected,
}

/// One row of [`CircuitBreaker::health_report`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitReport {
    /// Dependency name.
    pub name: String,
    /// Current circuit state.
    pub state: CircuitState,
    /// Consecutive failures since the last success.
    pub consecutive_failures: u32,
    /// Calls short-circuited over the breaker's lifetime.
    pub short_circuits: u64,
}

/// Registry of per-dependency circuit breakers.
///
/// Cheap to clone; clones share state. Construct once at startup and pass
/// it to every component that calls an upstream.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    circuits: Arc<Mutex<HashMap<String, CircuitHealth>>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker registry with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            circuits: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Decide whether a call to `name` may proceed, performing the
    /// Open → HalfOpen transition once the cooldown has elapsed.
    pub fn try_acquire(&self, name: &str) -> Admission {
        let mut circuits = lock(&self.circuits);
        let health = circuits.entry(name.to_owned()).or_default();

        match health.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::HalfOpen if health.trial_in_flight => Admission::Rejected,
            CircuitState::HalfOpen => {
                health.trial_in_flight = true;
                Admission::Trial
            }
            CircuitState::Open => {
                let cooled = health
                    .opened_at
                    .is_none_or(|t| t.elapsed() >= self.config.cooldown());
                if cooled {
                    health.state = CircuitState::HalfOpen;
                    health.trial_in_flight = true;
                    tracing::info!(dependency = name, "circuit half-open; allowing trial call");
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    /// Record a successful call admitted with `admission`.
    ///
    /// In the Closed state this resets the failure streak. Only the
    /// [`Admission::Trial`] holder can close a half-open circuit; a late
    /// success from a call admitted before the circuit tripped leaves the
    /// state alone.
    pub fn record_success(&self, name: &str, admission: Admission) {
        let mut circuits = lock(&self.circuits);
        let health = circuits.entry(name.to_owned()).or_default();
        match (admission, health.state) {
            (Admission::Trial, CircuitState::HalfOpen) => {
                tracing::info!(dependency = name, "circuit closed after successful trial");
                health.state = CircuitState::Closed;
                health.consecutive_failures = 0;
                health.opened_at = None;
                health.trial_in_flight = false;
            }
            (Admission::Allowed, CircuitState::Closed) => health.consecutive_failures = 0,
            (_, state) => {
                tracing::trace!(dependency = name, ?admission, ?state, "stale success ignored");
            }
        }
    }

    /// Record a failed call admitted with `admission`.
    ///
    /// A failed trial re-opens the circuit and restarts the cooldown. In the
    /// Closed state the failure extends the streak (or starts a new one if
    /// the previous failure is outside the observation window) and trips the
    /// circuit once the threshold is reached. Failures of calls admitted
    /// before the circuit tripped do not affect an open or half-open circuit.
    pub fn record_failure(&self, name: &str, admission: Admission) {
        let now = Instant::now();
        let mut circuits = lock(&self.circuits);
        let health = circuits.entry(name.to_owned()).or_default();

        let trip = match (admission, health.state) {
            (Admission::Trial, CircuitState::HalfOpen) => true,
            (Admission::Allowed, CircuitState::Closed) => {
                let stale = health.last_failure_at.is_some_and(|t| {
                    now.saturating_duration_since(t) > self.config.failure_window()
                });
                if stale {
                    health.consecutive_failures = 0;
                }
                health.consecutive_failures = health.consecutive_failures.saturating_add(1);
                health.last_failure_at = Some(now);
                health.consecutive_failures >= self.config.failure_threshold
            }
            (_, state) => {
                tracing::trace!(dependency = name, ?admission, ?state, "stale failure ignored");
                false
            }
        };
        if trip {
            health.state = CircuitState::Open;
            health.opened_at = Some(now);
            health.last_failure_at = Some(now);
            health.trial_in_flight = false;
            tracing::warn!(
                dependency = name,
                failures = health.consecutive_failures,
                cooldown_secs = self.config.cooldown_secs,
                "circuit opened"
            );
        }
    }

    fn record_short_circuit(&self, name: &str) {
        let mut circuits = lock(&self.circuits);
        let health = circuits.entry(name.to_owned()).or_default();
        health.short_circuits += 1;
        tracing::info!(
            dependency = name,
            short_circuits = health.short_circuits,
            "circuit open; short-circuiting"
        );
    }

    /// Release a trial slot whose call never reported an outcome (the
    /// caller dropped the future). The next caller becomes the trial.
    fn release_trial(&self, name: &str) {
        let mut circuits = lock(&self.circuits);
        if let Some(health) = circuits.get_mut(name) {
            if health.state == CircuitState::HalfOpen {
                health.trial_in_flight = false;
            }
        }
    }

    /// Run `op` through the breaker for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::CircuitOpen`] without calling `op` when the
    /// circuit is open; otherwise returns whatever `op` returns, recording
    /// the outcome.
    pub async fn call<T, F, Fut>(&self, name: &str, op: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let admission = self.try_acquire(name);
        if admission == Admission::Rejected {
            self.record_short_circuit(name);
            return Err(FetchError::CircuitOpen(name.to_owned()));
        }

        let mut trial = TrialSlot {
            breaker: self,
            name,
            armed: admission == Admission::Trial,
        };
        let outcome = op().await;
        trial.armed = false;

        match &outcome {
            Ok(_) => self.record_success(name, admission),
            Err(FetchError::Cancelled(_)) => self.release_trial(name),
            Err(err) => {
                tracing::warn!(dependency = name, error = %err, "upstream call failed");
                self.record_failure(name, admission);
            }
        }
        outcome
    }

    /// Run `op` through the breaker, resolving to `fallback` when the
    /// circuit is open.
    ///
    /// Never fails because of the circuit itself: a short-circuit is logged
    /// and counted, then `fallback` is returned without touching the
    /// network. Failures of `op` are recorded and propagated.
    pub async fn guarded_call<T, F, Fut>(&self, name: &str, op: F, fallback: T) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.call(name, op).await {
            Err(FetchError::CircuitOpen(_)) => Ok(fallback),
            other => other,
        }
    }

    /// Get the current circuit state for a dependency.
    pub fn state(&self, name: &str) -> CircuitState {
        lock(&self.circuits)
            .get(name)
            .map_or(CircuitState::Closed, |h| h.state)
    }

    /// Number of calls short-circuited for a dependency.
    pub fn short_circuits(&self, name: &str) -> u64 {
        lock(&self.circuits)
            .get(name)
            .map_or(0, |h| h.short_circuits)
    }

    /// Get a health report for every dependency seen so far, sorted by name.
    pub fn health_report(&self) -> Vec<CircuitReport> {
        let mut report: Vec<CircuitReport> = lock(&self.circuits)
            .iter()
            .map(|(name, health)| CircuitReport {
                name: name.clone(),
                state: health.state,
                consecutive_failures: health.consecutive_failures,
                short_circuits: health.short_circuits,
            })
            .collect();
        report.sort_by(|a, b| a.name.cmp(&b.name));
        report
    }

    /// Reset all dependencies to healthy (Closed with zero failures).
    pub fn reset(&self) {
        lock(&self.circuits).clear();
    }
}

/// Gives the trial slot back if the trial call is dropped mid-flight.
struct TrialSlot<'a> {
    breaker: &'a CircuitBreaker,
    name: &'a str,
    armed: bool,
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_trial(self.name);
        }
    }
}
