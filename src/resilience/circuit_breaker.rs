//! Circuit breaker for protected operations.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: operation assumed down, calls fail fast (or hit the fallback)
//! - Half-Open: a trial call decides the next state
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold within monitoring period
//! Open → Half-Open: first call after reset timeout
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails (timeout clock restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per protected resource, one mutex per breaker
//! - Fast-fail calls are counted as rejections, never as failures
//! - With `half_open_gate` set, exactly one trial runs per Half-Open period
//!   and concurrent callers are rejected; without it every caller that
//!   arrives during Half-Open is let through as a trial
//! - Every transition is queued for persistence; the queue never blocks

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::config::BreakerConfig;
use crate::observability::metrics;
use crate::persistence::{breaker_key, PersistQueue, BREAKER_STATE_TTL_SECS};
use crate::unix_millis;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
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

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning for a single breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub monitoring_period: Duration,
    pub call_timeout: Option<Duration>,
    pub half_open_gate: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig::from(&BreakerConfig::default())
    }
}

impl From<&BreakerConfig> for CircuitBreakerConfig {
    fn from(cfg: &BreakerConfig) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold.max(1),
            reset_timeout: cfg.reset_timeout(),
            monitoring_period: cfg.monitoring_period(),
            call_timeout: cfg.call_timeout(),
            half_open_gate: cfg.half_open_gate,
        }
    }
}

/// Errors surfaced by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker refused to invoke the operation.
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },

    /// The operation exceeded the breaker's call timeout.
    #[error("call through '{name}' timed out after {after:?}")]
    Timeout { name: String, after: Duration },

    /// The operation itself failed.
    #[error("{0}")]
    Operation(E),
}

impl<E> BreakerError<E> {
    /// True when the operation was never attempted.
    pub fn is_rejection(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// The operation's own error, if that is what failed.
    pub fn into_operation(self) -> Option<E> {
        match self {
            BreakerError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

/// Counts of each state change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransitionCounts {
    pub closed_to_open: u64,
    pub open_to_half_open: u64,
    pub half_open_to_closed: u64,
    pub half_open_to_open: u64,
    /// Only an operator reset closes an OPEN breaker directly.
    pub open_to_closed: u64,
}

/// Call statistics for a breaker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BreakerMetrics {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub current_failures: u32,
    /// Unix milliseconds.
    pub last_failure_at: Option<u64>,
    /// Unix milliseconds.
    pub last_success_at: Option<u64>,
    pub transitions: TransitionCounts,
}

/// Persisted breaker state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    /// Unix milliseconds of the last transition.
    pub last_state_change: u64,
    pub metrics: BreakerMetrics,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    last_state_change: Instant,
    last_state_change_unix: u64,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
    metrics: BreakerMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Pass,
    Trial,
    Rejected,
}

/// A circuit breaker guarding one resource.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    persist: Option<PersistQueue>,
}

impl CircuitBreaker {
    /// Create a closed breaker.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                last_state_change: Instant::now(),
                last_state_change_unix: unix_millis(),
                last_failure: None,
                trial_in_flight: false,
                metrics: BreakerMetrics::default(),
            }),
            persist: None,
        }
    }

    /// Queue state writes through `queue` after every transition.
    pub fn with_persistence(mut self, queue: PersistQueue) -> Self {
        self.persist = Some(queue);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `operation` under the breaker.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit();
        if admission == Admission::Rejected {
            return Err(BreakerError::Open {
                name: self.name.clone(),
            });
        }

        let mut guard = TrialGuard {
            breaker: self,
            armed: admission == Admission::Trial,
        };

        let outcome = match self.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result.map_err(BreakerError::Operation),
                Err(_) => Err(BreakerError::Timeout {
                    name: self.name.clone(),
                    after: limit,
                }),
            },
            None => operation().await.map_err(BreakerError::Operation),
        };

        guard.armed = false;
        match &outcome {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }
        outcome
    }

    /// Run `operation`, handing any breaker or operation failure to `fallback`.
    ///
    /// The fallback's own result, success or error, is returned as is.
    pub async fn execute_with_fallback<F, Fut, G, GFut, T, E>(
        &self,
        operation: F,
        fallback: G,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        G: FnOnce(BreakerError<E>) -> GFut,
        GFut: Future<Output = Result<T, E>>,
    {
        match self.execute(operation).await {
            Ok(value) => Ok(value),
            Err(reason) => fallback(reason).await,
        }
    }

    fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        let admission = match inner.state {
            CircuitState::Closed => Admission::Pass,
            CircuitState::Open => {
                if inner.last_state_change.elapsed() >= self.config.reset_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if self.config.half_open_gate && inner.trial_in_flight {
                    Admission::Rejected
                } else {
                    inner.trial_in_flight = true;
                    Admission::Trial
                }
            }
        };

        if admission == Admission::Rejected {
            inner.metrics.rejected_calls += 1;
            drop(inner);
            metrics::record_breaker_rejection(&self.name);
            tracing::debug!(breaker = %self.name, "Call rejected: circuit open");
        }
        admission
    }

    fn on_success(&self) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.successful_calls += 1;
        inner.metrics.last_success_at = Some(unix_millis());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.trial_in_flight = false;
                self.transition(&mut inner, CircuitState::Closed);
            }
            CircuitState::Closed => inner.metrics.current_failures = 0,
            // Admitted before a forced open; the override stands.
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.failed_calls += 1;
        inner.metrics.last_failure_at = Some(unix_millis());

        match inner.state {
            CircuitState::Closed => {
                let stale = inner
                    .last_failure
                    .is_some_and(|at| now.duration_since(at) > self.config.monitoring_period);
                if stale {
                    inner.metrics.current_failures = 0;
                }
                inner.metrics.current_failures += 1;
                if inner.metrics.current_failures >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.trial_in_flight = false;
                inner.metrics.current_failures += 1;
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => inner.metrics.current_failures += 1,
        }
        inner.last_failure = Some(now);
    }

    /// Apply a state change. Caller holds the lock.
    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }

        let counts = &mut inner.metrics.transitions;
        match (from, to) {
            (CircuitState::Closed, CircuitState::Open) => counts.closed_to_open += 1,
            (CircuitState::Open, CircuitState::HalfOpen) => counts.open_to_half_open += 1,
            (CircuitState::HalfOpen, CircuitState::Closed) => counts.half_open_to_closed += 1,
            (CircuitState::HalfOpen, CircuitState::Open) => counts.half_open_to_open += 1,
            (CircuitState::Open, CircuitState::Closed) => counts.open_to_closed += 1,
            _ => {}
        }

        inner.state = to;
        inner.last_state_change = Instant::now();
        inner.last_state_change_unix = unix_millis();
        if to == CircuitState::Closed {
            inner.metrics.current_failures = 0;
        }
        if to != CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }

        metrics::record_breaker_transition(&self.name, from.as_str(), to.as_str());
        match to {
            CircuitState::Open => tracing::warn!(
                breaker = %self.name,
                from = %from,
                failures = inner.metrics.current_failures,
                "Circuit opened"
            ),
            _ => tracing::info!(breaker = %self.name, from = %from, to = %to, "Circuit state changed"),
        }

        self.queue_snapshot(inner);
    }

    fn queue_snapshot(&self, inner: &Inner) {
        if let Some(queue) = &self.persist {
            let snapshot = self.snapshot_of(inner);
            queue.enqueue_json(&breaker_key(&self.name), &snapshot, BREAKER_STATE_TTL_SECS);
        }
    }

    fn snapshot_of(&self, inner: &Inner) -> BreakerSnapshot {
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            last_state_change: inner.last_state_change_unix,
            metrics: inner.metrics.clone(),
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Copy of the call statistics.
    pub fn metrics(&self) -> BreakerMetrics {
        self.inner.lock().metrics.clone()
    }

    /// Serializable view of the breaker.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        self.snapshot_of(&inner)
    }

    /// Queue the current state for persistence.
    pub fn persist(&self) {
        let inner = self.inner.lock();
        self.queue_snapshot(&inner);
    }

    /// Load persisted state, rebasing the transition time onto this process.
    pub fn restore(&self, snapshot: BreakerSnapshot) {
        let age = Duration::from_millis(unix_millis().saturating_sub(snapshot.last_state_change));
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.state = snapshot.state;
        inner.last_state_change = now.checked_sub(age).unwrap_or(now);
        inner.last_state_change_unix = snapshot.last_state_change;
        inner.metrics = snapshot.metrics;
        // A trial from the previous process can't still be running.
        inner.trial_in_flight = false;
        tracing::info!(breaker = %self.name, state = %inner.state, "Restored circuit state");
    }

    /// Force Closed and clear the failure count.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        tracing::info!(breaker = %self.name, state = %inner.state, "Circuit reset");
        inner.last_failure = None;
        inner.metrics.current_failures = 0;
        if inner.state == CircuitState::Closed {
            inner.trial_in_flight = false;
            self.queue_snapshot(&inner);
        } else {
            self.transition(&mut inner, CircuitState::Closed);
        }
    }

    /// Operator override: open now, restarting the reset timeout.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        tracing::warn!(breaker = %self.name, state = %inner.state, "Circuit forced open");
        if inner.state == CircuitState::Open {
            inner.last_state_change = Instant::now();
            inner.last_state_change_unix = unix_millis();
            self.queue_snapshot(&inner);
        } else {
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    /// Percentage of successful calls (100 when nothing has run yet).
    pub fn success_rate(&self) -> f64 {
        let inner = self.inner.lock();
        let m = &inner.metrics;
        if m.total_calls == 0 {
            return 100.0;
        }
        m.successful_calls as f64 * 100.0 / m.total_calls as f64
    }

    /// Percentage of failed calls.
    pub fn failure_rate(&self) -> f64 {
        let inner = self.inner.lock();
        let m = &inner.metrics;
        if m.total_calls == 0 {
            return 0.0;
        }
        m.failed_calls as f64 * 100.0 / m.total_calls as f64
    }

    /// Closed with a success rate above 80%.
    pub fn is_healthy(&self) -> bool {
        self.state() == CircuitState::Closed && self.success_rate() > 80.0
    }
}

/// Releases the half-open slot if a trial is cancelled before it settles.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.inner.lock().trial_in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{KvStore, MemoryStore};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::sync::broadcast;

    fn config(threshold: u32, reset_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_millis(reset_ms),
            monitoring_period: Duration::from_secs(60),
            call_timeout: None,
            half_open_gate: true,
        }
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        cb.execute(|| async { Err::<(), _>("boom") }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<u32, BreakerError<&'static str>> {
        cb.execute(|| async { Ok(7) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_exactly_at_threshold() {
        let cb = CircuitBreaker::new("t", config(3, 1000));

        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().transitions.closed_to_open, 0);

        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.metrics().transitions.closed_to_open, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_timing_scenario() {
        let cb = CircuitBreaker::new("scenario", config(3, 1000));
        let calls = Arc::new(AtomicU32::new(0));

        // Failures at t=0, 10, 20.
        for _ in 0..3 {
            let c = calls.clone();
            let _ = cb
                .execute(|| async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("down")
                })
                .await;
            tokio::time::advance(Duration::from_millis(10)).await;
        }
        assert_eq!(cb.state(), CircuitState::Open);

        // t=500: fails fast without invoking.
        tokio::time::advance(Duration::from_millis(470)).await;
        let c = calls.clone();
        let res = cb
            .execute(|| async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;
        assert!(matches!(res, Err(BreakerError::Open { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cb.metrics().failed_calls, 3);
        assert_eq!(cb.metrics().rejected_calls, 1);

        // t=1050: trial runs once and closes the breaker.
        tokio::time::advance(Duration::from_millis(550)).await;
        let c = calls.clone();
        cb.execute(|| async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok::<_, &str>(())
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().current_failures, 0);

        let t = cb.metrics().transitions;
        assert_eq!(t.open_to_half_open, 1);
        assert_eq!(t.half_open_to_closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_trial_reopens_and_restarts_clock() {
        let cb = CircuitBreaker::new("t", config(1, 1000));
        fail(&cb).await.unwrap_err();

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(matches!(fail(&cb).await, Err(BreakerError::Operation("boom"))));
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.metrics().transitions.half_open_to_open, 1);

        // Clock restarted at the failed trial.
        tokio::time::advance(Duration::from_millis(900)).await;
        assert!(succeed(&cb).await.unwrap_err().is_rejection());
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(succeed(&cb).await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_consecutive_count() {
        let cb = CircuitBreaker::new("t", config(3, 1000));
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        succeed(&cb).await.unwrap();
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().current_failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_outside_monitoring_period_restart_count() {
        let mut cfg = config(3, 1000);
        cfg.monitoring_period = Duration::from_secs(5);
        let cb = CircuitBreaker::new("t", cfg);

        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        tokio::time::advance(Duration::from_secs(6)).await;
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().current_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let mut cfg = config(1, 1000);
        cfg.call_timeout = Some(Duration::from_millis(50));
        let cb = CircuitBreaker::new("slow", cfg);

        let res = cb
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, &str>(())
            })
            .await;
        assert!(matches!(res, Err(BreakerError::Timeout { .. })));
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_on_open_and_on_error() {
        let cb = CircuitBreaker::new("fb", config(1, 1000));

        let v = cb
            .execute_with_fallback(
                || async { Err::<u32, &str>("boom") },
                |reason| async move {
                    assert!(matches!(reason, BreakerError::Operation("boom")));
                    Ok(1)
                },
            )
            .await;
        assert_eq!(v, Ok(1));
        assert_eq!(cb.metrics().failed_calls, 1);

        let v = cb
            .execute_with_fallback(
                || async { Ok::<u32, &str>(99) },
                |reason| async move {
                    assert!(reason.is_rejection());
                    Err("fallback failed")
                },
            )
            .await;
        assert_eq!(v, Err("fallback failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_trial_gate() {
        let cb = Arc::new(CircuitBreaker::new("gate", config(1, 100)));
        fail(&cb).await.unwrap_err();
        tokio::time::advance(Duration::from_millis(100)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_cb = cb.clone();
        let trial = tokio::spawn(async move {
            trial_cb
                .execute(|| async move {
                    let _ = release_rx.await;
                    Ok::<_, &str>(())
                })
                .await
        });
        tokio::task::yield_now().await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // A second caller during the trial is turned away.
        assert!(succeed(&cb).await.unwrap_err().is_rejection());

        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ungated_half_open_allows_concurrent_trials() {
        let mut cfg = config(1, 100);
        cfg.half_open_gate = false;
        let cb = Arc::new(CircuitBreaker::new("open-gate", cfg));
        fail(&cb).await.unwrap_err();
        tokio::time::advance(Duration::from_millis(100)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_cb = cb.clone();
        let trial = tokio::spawn(async move {
            trial_cb
                .execute(|| async move {
                    let _ = release_rx.await;
                    Ok::<_, &str>(())
                })
                .await
        });
        tokio::task::yield_now().await;

        assert_eq!(succeed(&cb).await.unwrap(), 7);
        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_trial_releases_gate() {
        let cb = CircuitBreaker::new("cancel", config(1, 100));
        fail(&cb).await.unwrap_err();
        tokio::time::advance(Duration::from_millis(100)).await;

        let pending = cb.execute(|| std::future::pending::<Result<(), &str>>());
        let _ = tokio::time::timeout(Duration::from_millis(10), pending).await;
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        assert_eq!(succeed(&cb).await.unwrap(), 7);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_rates_and_health() {
        let cb = CircuitBreaker::new("rates", config(10, 1000));
        assert!(cb.is_healthy());
        for _ in 0..4 {
            succeed(&cb).await.unwrap();
        }
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.success_rate(), 80.0);
        assert_eq!(cb.failure_rate(), 20.0);
        // Exactly 80% is not healthy.
        assert!(!cb.is_healthy());
        succeed(&cb).await.unwrap();
        assert!(cb.is_healthy());
    }

    #[tokio::test]
    async fn test_force_open_and_reset() {
        let cb = CircuitBreaker::new("ops", config(3, 60_000));
        cb.force_open();
        assert!(succeed(&cb).await.unwrap_err().is_rejection());
        assert_eq!(cb.metrics().transitions.closed_to_open, 1);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().transitions.open_to_closed, 1);
        assert_eq!(succeed(&cb).await.unwrap(), 7);

        // Resetting a closed breaker is not a transition.
        fail(&cb).await.unwrap_err();
        cb.reset();
        assert_eq!(cb.metrics().current_failures, 0);
        assert_eq!(cb.metrics().transitions.open_to_closed, 1);
    }

    #[tokio::test]
    async fn test_reset_from_open_is_persisted_as_transition() {
        let store = MemoryStore::new();
        let (tx, rx) = broadcast::channel(1);
        let (queue, writer) = PersistQueue::spawn(Arc::new(store.clone()), 16, 1, rx);

        let cb = CircuitBreaker::new("ops", config(1, 60_000)).with_persistence(queue);
        fail(&cb).await.unwrap_err();
        cb.reset();

        tx.send(()).unwrap();
        writer.await.unwrap();
        let bytes = store.get(&breaker_key("ops")).await.unwrap().unwrap();
        let snapshot: BreakerSnapshot = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.metrics.transitions.closed_to_open, 1);
        assert_eq!(snapshot.metrics.transitions.open_to_closed, 1);
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let source = CircuitBreaker::new("persisted", config(1, 60_000));
        fail(&source).await.unwrap_err();
        let snapshot = source.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"OPEN\""));

        let restored = CircuitBreaker::new("persisted", config(1, 60_000));
        restored.restore(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.state(), CircuitState::Open);
        assert_eq!(restored.metrics().failed_calls, 1);
        assert!(succeed(&restored).await.unwrap_err().is_rejection());
    }
}
