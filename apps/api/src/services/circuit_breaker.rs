//! Per-service circuit breaker.
//!
//! ```text
//! Closed   --[failure_threshold consecutive failures]--> Open
//! Open     --[cooldown elapsed]--------------------------> HalfOpen
//! HalfOpen --[half_open_successes consecutive successes]-> Closed
//! HalfOpen --[any failure]-------------------------------> Open (cooldown restarts)
//! ```
//!
//! Every read and write goes through one mutex owned by the breaker, so each
//! service is serialized independently of every other service. The
//! Open → HalfOpen transition is lazy: it happens on the first state read
//! after the cooldown has elapsed, never before.
//!
//! Admission hands out a `Permit` stamped with the current transition epoch.
//! Outcomes only count toward the epoch that admitted them, so a slow call
//! started while Closed cannot close or reopen a later HalfOpen circuit. A
//! permit dropped without an outcome (its caller was cancelled) gives its
//! trial slot back.

use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::metrics::MetricsCollector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls fail fast until the cooldown elapses.
    Open,
    /// A bounded number of trial calls test recovery.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures in Closed before the circuit opens.
    pub failure_threshold: u32,
    /// Time spent Open before trial calls are allowed.
    pub cooldown: Duration,
    /// Consecutive trial successes needed to close from HalfOpen.
    pub half_open_successes: u32,
    /// Trial calls allowed in flight at once while HalfOpen.
    pub half_open_max_trials: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            half_open_successes: 1,
            half_open_max_trials: 1,
        }
    }
}

/// Returned instead of making a call when the breaker refuses it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("service '{service}' is unavailable (circuit {state:?})")]
pub struct Rejected {
    pub service: String,
    pub state: CircuitState,
    /// Remaining cooldown when the circuit is Open.
    pub retry_after: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error(transparent)]
    Rejected(#[from] Rejected),

    #[error("{0}")]
    Failed(E),
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_transition_at: DateTime<Utc>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Bumped on every transition.
    epoch: u64,
    consecutive_failures: u32,
    trial_successes: u32,
    trials_in_flight: u32,
    opened_at: Option<Instant>,
    last_transition_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    metrics: MetricsCollector,
}

/// Admission for one call. Resolve it with `success` or `failure`; dropping
/// it unresolved releases the slot without counting an outcome.
#[must_use = "an unresolved permit records no outcome"]
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    epoch: u64,
    resolved: bool,
}

impl Permit<'_> {
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.epoch);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.epoch);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.on_abandoned(self.epoch);
        }
    }
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: BreakerConfig, metrics: MetricsCollector) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                epoch: 0,
                consecutive_failures: 0,
                trial_successes: 0,
                trials_in_flight: 0,
                opened_at: None,
                last_transition_at: Utc::now(),
            }),
            metrics,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        inner.state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn status(&self) -> BreakerStatus {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        BreakerStatus {
            state: inner.state,
            failure_count: inner.consecutive_failures,
            last_transition_at: inner.last_transition_at,
        }
    }

    /// Asks permission for one call. In HalfOpen the permit holds one of the
    /// bounded trial slots until it is resolved or dropped.
    pub fn try_acquire(&self) -> Result<Permit<'_>, Rejected> {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        let state = inner.state;
        let admitted = match state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.trials_in_flight < self.config.half_open_max_trials.max(1) {
                    inner.trials_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        };

        if admitted {
            return Ok(Permit {
                breaker: self,
                epoch: inner.epoch,
                resolved: false,
            });
        }

        let retry_after = match state {
            CircuitState::Open => inner
                .opened_at
                .map(|at| self.config.cooldown.saturating_sub(at.elapsed())),
            _ => None,
        };
        drop(inner);
        self.metrics
            .increment(&format!("circuit_breaker.{}.rejected", self.service));
        Err(Rejected {
            service: self.service.clone(),
            state,
            retry_after,
        })
    }

    /// Runs `call` if the breaker allows it and records the outcome and latency.
    /// Dropping the returned future mid-call releases its admission.
    pub async fn call<F, T, E>(&self, call: F) -> Result<T, CallError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire()?;
        let started = Instant::now();
        let result = call.await;
        self.metrics.record(
            &format!("call_latency_ms.{}", self.service),
            started.elapsed().as_secs_f64() * 1000.0,
        );
        match result {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(CallError::Failed(e))
            }
        }
    }

    /// Administrative override back to Closed.
    pub fn reset(&self) {
        let mut inner = self.lock();
        warn!(service = %self.service, from = ?inner.state, "Circuit breaker manually reset");
        inner.consecutive_failures = 0;
        if inner.state != CircuitState::Closed {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    fn on_success(&self, epoch: u64) {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        if !self.is_current(&inner, epoch) {
            return;
        }
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
                inner.trial_successes += 1;
                if inner.trial_successes >= self.config.half_open_successes.max(1) {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, epoch: u64) {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        if !self.is_current(&inner, epoch) {
            return;
        }
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold.max(1) {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn on_abandoned(&self, epoch: u64) {
        let mut inner = self.lock();
        self.refresh(&mut inner);
        if inner.epoch == epoch && inner.state == CircuitState::HalfOpen {
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        }
        drop(inner);
        debug!(service = %self.service, "Call dropped before completing, admission released");
        self.metrics
            .increment(&format!("circuit_breaker.{}.abandoned", self.service));
    }

    fn is_current(&self, inner: &BreakerInner, epoch: u64) -> bool {
        if inner.epoch == epoch {
            return true;
        }
        debug!(
            service = %self.service,
            state = ?inner.state,
            "Ignoring outcome of a call admitted before the last transition"
        );
        self.metrics
            .increment(&format!("circuit_breaker.{}.stale_outcome", self.service));
        false
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // State is only mutated through `transition` and simple counters; a
        // poisoned lock still holds a consistent value.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Open {
            return;
        }
        if let Some(opened_at) = inner.opened_at {
            if opened_at.elapsed() >= self.config.cooldown {
                self.transition(inner, CircuitState::HalfOpen);
            }
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        inner.epoch = inner.epoch.wrapping_add(1);
        inner.last_transition_at = Utc::now();
        inner.trial_successes = 0;
        inner.trials_in_flight = 0;
        match to {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
                warn!(
                    service = %self.service,
                    ?from,
                    failures = inner.consecutive_failures,
                    cooldown_secs = self.config.cooldown.as_secs_f64(),
                    "Circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                info!(service = %self.service, "Circuit half-open, allowing trial calls");
            }
            CircuitState::Closed => {
                inner.opened_at = None;
                inner.consecutive_failures = 0;
                info!(service = %self.service, ?from, "Circuit closed");
            }
        }
        self.metrics.increment(&format!(
            "circuit_breaker.{}.to_{}",
            self.service,
            to.as_str()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "svc",
            BreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_secs(cooldown_secs),
                half_open_successes: 1,
                half_open_max_trials: 1,
            },
            MetricsCollector::new(16),
        )
    }

    fn fail(cb: &CircuitBreaker) {
        cb.try_acquire().unwrap().failure();
    }

    fn succeed(cb: &CircuitBreaker) {
        cb.try_acquire().unwrap().success();
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_exactly_threshold_failures() {
        let cb = breaker(5, 30);
        for _ in 0..4 {
            fail(&cb);
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.failure_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_in_closed_resets_failure_count() {
        let cb = breaker(5, 30);
        fail(&cb);
        fail(&cb);
        assert_eq!(cb.failure_count(), 2);
        succeed(&cb);
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_only_after_cooldown() {
        let cb = breaker(1, 30);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_with_remaining_cooldown() {
        let cb = breaker(1, 30);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(10)).await;
        let err = cb.try_acquire().unwrap_err();
        assert_eq!(err.state, CircuitState::Open);
        assert_eq!(err.retry_after, Some(Duration::from_secs(20)));
        assert_eq!(cb.metrics.counter_value("circuit_breaker.svc.rejected"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let cb = breaker(5, 30);
        for _ in 0..5 {
            fail(&cb);
        }
        tokio::time::advance(Duration::from_secs(30)).await;
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_and_restarts_cooldown() {
        let cb = breaker(1, 30);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cb.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_concurrent_trials() {
        let cb = breaker(1, 1);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(1)).await;
        let _trial = cb.try_acquire().unwrap();
        let err = cb.try_acquire().unwrap_err();
        assert_eq!(err.state, CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiple_trial_successes_required() {
        let cb = CircuitBreaker::new(
            "svc",
            BreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_secs(1),
                half_open_successes: 2,
                half_open_max_trials: 2,
            },
            MetricsCollector::new(16),
        );
        fail(&cb);
        tokio::time::advance(Duration::from_secs(1)).await;
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_trial_call_releases_its_slot() {
        let cb = breaker(1, 1);
        fail(&cb);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        let hung = cb.call(std::future::pending::<Result<(), &str>>());
        let timed_out = tokio::time::timeout(Duration::from_millis(10), hung).await;
        assert!(timed_out.is_err());

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.failure_count(), 1);
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics.counter_value("circuit_breaker.svc.abandoned"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_permit_in_closed_changes_nothing() {
        let cb = breaker(2, 30);
        fail(&cb);
        drop(cb.try_acquire().unwrap());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_from_before_open_are_ignored() {
        let cb = breaker(1, 1);
        let slow_success = cb.try_acquire().unwrap();
        let slow_failure = cb.try_acquire().unwrap();
        fail(&cb);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        slow_success.success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        slow_failure.failure();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.metrics.counter_value("circuit_breaker.svc.stale_outcome"), 2);

        // The trial slot is still free for a real trial.
        succeed(&cb);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_started_closed_cannot_close_half_open() {
        let cb = std::sync::Arc::new(breaker(1, 1));
        let slow = {
            let cb = cb.clone();
            tokio::spawn(async move {
                cb.call(async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, &str>(())
                })
                .await
            })
        };
        tokio::task::yield_now().await;

        fail(&cb);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert!(slow.await.unwrap().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_short_circuits_when_open() {
        let cb = breaker(1, 30);
        fail(&cb);

        let mut invoked = false;
        let result: Result<(), CallError<&str>> = cb
            .call(async {
                invoked = true;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(CallError::Rejected(_))));
        assert!(!invoked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_records_outcome_and_latency() {
        let cb = breaker(2, 30);
        let _ = cb.call(async { Err::<(), _>("boom") }).await;
        assert_eq!(cb.failure_count(), 1);
        let ok = cb.call(async { Ok::<_, &str>(7) }).await.unwrap();
        assert_eq!(ok, 7);
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(
            cb.metrics
                .histogram_summary("call_latency_ms.svc")
                .unwrap()
                .count,
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_forces_closed() {
        let cb = breaker(1, 300);
        fail(&cb);
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        let status = cb.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 0);
    }

    #[test]
    fn test_state_serializes_screaming_case() {
        let json = serde_json::to_string(&CircuitState::HalfOpen).unwrap();
        assert_eq!(json, "\"HALF_OPEN\"");
    }
}
