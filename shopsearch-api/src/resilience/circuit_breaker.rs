//! Circuit breaker for calls into external dependencies.
//!
//! The breaker keeps a rolling history of call outcomes and opens when the
//! error rate over `time_window_seconds` reaches `failure_threshold`, once at
//! least `min_requests_for_threshold` calls have been seen.
//!
//! # States
//!
//! - **Closed**: calls pass through and are recorded in the history
//! - **Open**: calls are short-circuited until `open_duration_seconds` has elapsed
//! - **HalfOpen**: a sampled fraction of calls are admitted as tests; the
//!   verdict over `half_open_min_tests` tests closes or re-opens the circuit
//!
//! Every check-admit-record-transition sequence runs under one lock per
//! breaker, so concurrent callers on the same dependency observe a single
//! consistent state machine.
//!
//! # Example
//!
//! ```no_run
//! use shopsearch_api::resilience::circuit_breaker::CircuitBreaker;
//! use shopsearch_core::CircuitBreakerSettings;
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new("vector_index", CircuitBreakerSettings::default());
//!
//! match breaker.call(|| async { Ok::<_, std::io::Error>(42) }).await {
//!     Ok(result) => println!("Success: {}", result),
//!     Err(e) if e.is_open() => println!("Dependency presumed unhealthy"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! # }
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use shopsearch_core::{CircuitBreakerSettings, Clock, SystemClock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::observability::metrics::ResilienceMetrics;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests pass through
    Closed,
    /// Too many failures, requests are rejected
    Open,
    /// Testing if the dependency has recovered
    HalfOpen,
}

impl CircuitState {
    /// Value published on the `circuit_breaker_state` gauge.
    pub fn gauge_value(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circuit breaker errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// The call was not attempted
    #[error("Circuit breaker {name} is {state}, call not attempted")]
    Open { name: String, state: CircuitState },

    /// The wrapped operation ran and failed with its own error
    #[error("{0}")]
    Operation(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open { .. })
    }

    /// The operation's own error, if the operation ran.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            CircuitBreakerError::Operation(e) => Some(e),
            CircuitBreakerError::Open { .. } => None,
        }
    }
}

/// Lifetime counters
#[derive(Debug, Default)]
struct CircuitBreakerMetrics {
    failures: AtomicU64,
    successes: AtomicU64,
    opened_count: AtomicU64,
    closed_count: AtomicU64,
    rejected_count: AtomicU64,
}

/// Circuit breaker statistics
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerStats {
    pub failures: u64,
    pub successes: u64,
    pub opened_count: u64,
    pub closed_count: u64,
    pub rejected_count: u64,
}

/// Point-in-time view of a breaker for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub recent_requests: usize,
    pub recent_failures: usize,
    pub error_rate: f64,
    pub opened_at: Option<DateTime<Utc>>,
    pub half_open_attempts: u64,
    pub half_open_successes: u32,
    pub half_open_failures: u32,
    pub stats: CircuitBreakerStats,
}

/// Internal state of the circuit breaker
struct CircuitBreakerState {
    state: CircuitState,
    /// `(timestamp, success)` for calls completed while closed.
    history: VecDeque<(DateTime<Utc>, bool)>,
    opened_at: Option<DateTime<Utc>>,
    /// Calls seen since entering half-open, admitted or not.
    half_open_attempts: u64,
    half_open_successes: u32,
    half_open_failures: u32,
    /// Bumped on every transition; outcomes from an older generation are stale.
    generation: u64,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            history: VecDeque::new(),
            opened_at: None,
            half_open_attempts: 0,
            half_open_successes: 0,
            half_open_failures: 0,
            generation: 0,
        }
    }

    fn prune(&mut self, cutoff: DateTime<Utc>) {
        while self
            .history
            .front()
            .map(|(ts, _)| *ts < cutoff)
            .unwrap_or(false)
        {
            self.history.pop_front();
        }
    }

    fn failures(&self) -> usize {
        self.history.iter().filter(|(_, success)| !success).count()
    }

    fn error_rate(&self) -> f64 {
        if self.history.is_empty() {
            0.0
        } else {
            self.failures() as f64 / self.history.len() as f64
        }
    }

    fn reset_half_open(&mut self) {
        self.half_open_attempts = 0;
        self.half_open_successes = 0;
        self.half_open_failures = 0;
    }
}

/// Proof of admission, carried from `admit` to `record`.
#[derive(Debug, Clone, Copy)]
struct Ticket {
    generation: u64,
    half_open_test: bool,
}

/// Circuit breaker implementation
///
/// Generic over the operation's result and error types.
pub struct CircuitBreaker {
    name: String,
    settings: CircuitBreakerSettings,
    clock: Arc<dyn Clock>,
    state: Mutex<CircuitBreakerState>,
    metrics: CircuitBreakerMetrics,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    pub fn new(name: impl Into<String>, settings: CircuitBreakerSettings) -> Self {
        Self::with_clock(name, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        settings: CircuitBreakerSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        info!(circuit_breaker = %name, "Creating circuit breaker");
        ResilienceMetrics::set_circuit_state(&name, CircuitState::Closed);

        Self {
            name,
            settings,
            clock,
            state: Mutex::new(CircuitBreakerState::new()),
            metrics: CircuitBreakerMetrics::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &CircuitBreakerSettings {
        &self.settings
    }

    /// Get the current state of the circuit breaker
    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    /// Get lifetime counters
    pub fn metrics(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            failures: self.metrics.failures.load(Ordering::Relaxed),
            successes: self.metrics.successes.load(Ordering::Relaxed),
            opened_count: self.metrics.opened_count.load(Ordering::Relaxed),
            closed_count: self.metrics.closed_count.load(Ordering::Relaxed),
            rejected_count: self.metrics.rejected_count.load(Ordering::Relaxed),
        }
    }

    pub async fn snapshot(&self) -> CircuitBreakerSnapshot {
        let cutoff = self.clock.now() - self.window();
        let mut state = self.state.lock().await;
        state.prune(cutoff);

        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: state.state,
            recent_requests: state.history.len(),
            recent_failures: state.failures(),
            error_rate: state.error_rate(),
            opened_at: state.opened_at,
            half_open_attempts: state.half_open_attempts,
            half_open_successes: state.half_open_successes,
            half_open_failures: state.half_open_failures,
            stats: self.metrics(),
        }
    }

    /// Call a function with circuit breaker protection
    ///
    /// The operation's own error is returned inside
    /// [`CircuitBreakerError::Operation`] after being recorded as a failure.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let ticket = self.admit().await.map_err(|state| CircuitBreakerError::Open {
            name: self.name.clone(),
            state,
        })?;

        match f().await {
            Ok(result) => {
                self.record(ticket, true).await;
                Ok(result)
            }
            Err(e) => {
                self.record(ticket, false).await;
                Err(CircuitBreakerError::Operation(e))
            }
        }
    }

    /// Reset the circuit breaker to closed state
    pub async fn reset(&self) {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        info!(circuit_breaker = %self.name, "Manually resetting circuit breaker");
        self.transition(&mut state, CircuitState::Closed, now);
    }

    fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.settings.time_window_seconds as i64)
    }

    /// Decide whether a call may run. On rejection returns the state that rejected it.
    async fn admit(&self) -> Result<Ticket, CircuitState> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.prune(now - self.window());

        match state.state {
            CircuitState::Closed => Ok(Ticket {
                generation: state.generation,
                half_open_test: false,
            }),
            CircuitState::Open => {
                let open_for = chrono::Duration::seconds(self.settings.open_duration_seconds as i64);
                let cooled_down = state
                    .opened_at
                    .map(|opened_at| now - opened_at >= open_for)
                    .unwrap_or(true);

                if cooled_down {
                    self.transition(&mut state, CircuitState::HalfOpen, now);
                    state.half_open_attempts = 1;
                    Ok(Ticket {
                        generation: state.generation,
                        half_open_test: true,
                    })
                } else {
                    self.reject(CircuitState::Open)
                }
            }
            CircuitState::HalfOpen => {
                let attempt = state.half_open_attempts;
                state.half_open_attempts += 1;

                if attempt % self.settings.half_open_stride() == 0 {
                    debug!(circuit_breaker = %self.name, attempt, "Admitting half-open test call");
                    Ok(Ticket {
                        generation: state.generation,
                        half_open_test: true,
                    })
                } else {
                    self.reject(CircuitState::HalfOpen)
                }
            }
        }
    }

    fn reject(&self, state: CircuitState) -> Result<Ticket, CircuitState> {
        self.metrics.rejected_count.fetch_add(1, Ordering::Relaxed);
        ResilienceMetrics::record_circuit_rejection(&self.name);
        Err(state)
    }

    /// Record an admitted call's outcome and apply any resulting transition.
    async fn record(&self, ticket: Ticket, success: bool) {
        let counter = if success {
            &self.metrics.successes
        } else {
            &self.metrics.failures
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if ticket.generation != state.generation {
            return;
        }

        match state.state {
            CircuitState::Closed => {
                state.history.push_back((now, success));
                state.prune(now - self.window());

                let total = state.history.len();
                if total >= self.settings.min_requests_for_threshold as usize {
                    let error_rate = state.error_rate();
                    if error_rate >= self.settings.failure_threshold {
                        warn!(
                            circuit_breaker = %self.name,
                            error_rate,
                            failures = state.failures(),
                            total,
                            "circuit_breaker_opened"
                        );
                        self.transition(&mut state, CircuitState::Open, now);
                    }
                }
            }
            CircuitState::HalfOpen if ticket.half_open_test => {
                if success {
                    state.half_open_successes += 1;
                } else {
                    state.half_open_failures += 1;
                }

                let completed = state.half_open_successes + state.half_open_failures;
                if completed >= self.settings.half_open_min_tests {
                    let ratio = state.half_open_successes as f64 / completed as f64;
                    if ratio > self.settings.half_open_success_ratio {
                        info!(
                            circuit_breaker = %self.name,
                            success_count = state.half_open_successes,
                            failure_count = state.half_open_failures,
                            "circuit_breaker_closed"
                        );
                        self.transition(&mut state, CircuitState::Closed, now);
                    } else {
                        warn!(
                            circuit_breaker = %self.name,
                            success_count = state.half_open_successes,
                            failure_count = state.half_open_failures,
                            "circuit_breaker_reopened"
                        );
                        self.transition(&mut state, CircuitState::Open, now);
                    }
                }
            }
            _ => {}
        }
    }

    /// Caller must hold the state lock.
    fn transition(&self, state: &mut CircuitBreakerState, to: CircuitState, now: DateTime<Utc>) {
        let from = state.state;
        state.state = to;
        state.generation += 1;

        match to {
            CircuitState::Open => {
                state.opened_at = Some(now);
                state.reset_half_open();
                self.metrics.opened_count.fetch_add(1, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                state.reset_half_open();
                info!(circuit_breaker = %self.name, "circuit_breaker_half_open");
            }
            CircuitState::Closed => {
                state.opened_at = None;
                state.history.clear();
                state.reset_half_open();
                if from != CircuitState::Closed {
                    self.metrics.closed_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        ResilienceMetrics::set_circuit_state(&self.name, to);
        if from != to {
            ResilienceMetrics::record_circuit_transition(&self.name, from, to);
        }
    }
}

/// Process-wide breakers keyed by dependency name.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRegistry {
    defaults: CircuitBreakerSettings,
    clock: Arc<dyn Clock>,
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(defaults: CircuitBreakerSettings) -> Self {
        Self::with_clock(defaults, Arc::new(SystemClock))
    }

    pub fn with_clock(defaults: CircuitBreakerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            defaults,
            clock,
            breakers: Arc::new(DashMap::new()),
        }
    }

    /// Returns the breaker for `name`, creating it with the default settings.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.get_or_create_with(name, self.defaults)
    }

    pub fn get_or_create_with(&self, name: &str, settings: CircuitBreakerSettings) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_clock(name, settings, self.clock.clone()))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.value().clone())
    }

    pub async fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|entry| entry.value().clone()).collect();

        let mut snapshots = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            snapshots.push(breaker.snapshot().await);
        }
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopsearch_core::ManualClock;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn settings() -> CircuitBreakerSettings {
        CircuitBreakerSettings {
            failure_threshold: 0.5,
            time_window_seconds: 60,
            open_duration_seconds: 30,
            half_open_test_percentage: 1.0,
            min_requests_for_threshold: 10,
            half_open_min_tests: 5,
            half_open_success_ratio: 0.5,
        }
    }

    fn breaker(settings: CircuitBreakerSettings) -> (Arc<ManualClock>, CircuitBreaker) {
        let clock = Arc::new(ManualClock::default());
        let breaker = CircuitBreaker::with_clock("test", settings, clock.clone());
        (clock, breaker)
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker.call(|| async { Err::<(), _>("error") }).await;
    }

    async fn succeed(breaker: &CircuitBreaker) {
        let _ = breaker.call(|| async { Ok::<_, &str>(()) }).await;
    }

    async fn trip(breaker: &CircuitBreaker) {
        for _ in 0..10 {
            fail(breaker).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_circuit_breaker_starts_closed() {
        let (_, breaker) = breaker(settings());
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_opens_after_six_of_ten_failures() {
        let (_, breaker) = breaker(settings());

        for _ in 0..4 {
            succeed(&breaker).await;
        }
        for _ in 0..5 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Closed);

        fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert_eq!(breaker.metrics().opened_count, 1);
    }

    #[tokio::test]
    async fn test_stays_closed_below_minimum_requests() {
        let (_, breaker) = breaker(settings());
        for _ in 0..9 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_circuit_does_not_invoke_operation() {
        let (_, breaker) = breaker(settings());
        trip(&breaker).await;

        let invoked = AtomicBool::new(false);
        let result = breaker
            .call(|| async {
                invoked.store(true, Ordering::SeqCst);
                Ok::<_, ()>(42)
            })
            .await;

        assert!(matches!(
            result,
            Err(CircuitBreakerError::Open {
                state: CircuitState::Open,
                ..
            })
        ));
        assert!(!invoked.load(Ordering::SeqCst));
        assert_eq!(breaker.metrics().rejected_count, 1);
    }

    #[tokio::test]
    async fn test_operation_error_passes_through_unchanged() {
        let (_, breaker) = breaker(settings());
        let result = breaker
            .call(|| async { Err::<(), _>(std::io::Error::other("disk on fire")) })
            .await;

        let err = result.unwrap_err().into_operation_error().unwrap();
        assert_eq!(err.to_string(), "disk on fire");
        assert_eq!(breaker.metrics().failures, 1);
    }

    #[tokio::test]
    async fn test_transitions_to_half_open_after_open_duration() {
        let (clock, breaker) = breaker(settings());
        trip(&breaker).await;

        clock.advance(Duration::from_secs(29));
        assert!(breaker.call(|| async { Ok::<_, ()>(1) }).await.unwrap_err().is_open());

        clock.advance(Duration::from_secs(1));
        let result = breaker.call(|| async { Ok::<_, ()>(1) }).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_samples_a_fraction_of_calls() {
        let (clock, breaker) = breaker(CircuitBreakerSettings {
            half_open_test_percentage: 0.1,
            ..settings()
        });
        trip(&breaker).await;
        clock.advance(Duration::from_secs(30));

        // The call that moves the breaker to half-open is the first test.
        assert!(breaker.call(|| async { Ok::<_, ()>(()) }).await.is_ok());

        for _ in 0..9 {
            let result = breaker.call(|| async { Ok::<_, ()>(()) }).await;
            assert!(matches!(
                result,
                Err(CircuitBreakerError::Open {
                    state: CircuitState::HalfOpen,
                    ..
                })
            ));
        }

        assert!(breaker.call(|| async { Ok::<_, ()>(()) }).await.is_ok());
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_closes_on_majority_success() {
        let (clock, breaker) = breaker(settings());
        trip(&breaker).await;
        clock.advance(Duration::from_secs(30));

        succeed(&breaker).await;
        fail(&breaker).await;
        succeed(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        succeed(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.metrics().closed_count, 1);

        let snapshot = breaker.snapshot().await;
        assert_eq!(snapshot.recent_requests, 0);
        assert!(snapshot.opened_at.is_none());
    }

    #[tokio::test]
    async fn test_half_open_reopens_without_majority() {
        let (clock, breaker) = breaker(settings());
        trip(&breaker).await;
        clock.advance(Duration::from_secs(30));

        succeed(&breaker).await;
        succeed(&breaker).await;
        fail(&breaker).await;
        fail(&breaker).await;
        fail(&breaker).await;

        assert_eq!(breaker.state().await, CircuitState::Open);
        assert_eq!(breaker.metrics().opened_count, 2);

        let snapshot = breaker.snapshot().await;
        assert_eq!(snapshot.opened_at, Some(clock.now()));
        assert!(breaker.call(|| async { Ok::<_, ()>(()) }).await.unwrap_err().is_open());
    }

    #[tokio::test]
    async fn test_old_failures_leave_the_window() {
        let (clock, breaker) = breaker(settings());
        for _ in 0..9 {
            fail(&breaker).await;
        }

        clock.advance(Duration::from_secs(61));
        for _ in 0..10 {
            succeed(&breaker).await;
        }
        fail(&breaker).await;

        assert_eq!(breaker.state().await, CircuitState::Closed);
        let snapshot = breaker.snapshot().await;
        assert_eq!(snapshot.recent_requests, 11);
        assert_eq!(snapshot.recent_failures, 1);
    }

    #[tokio::test]
    async fn test_stale_outcome_is_ignored_after_transition() {
        let (_, breaker) = breaker(settings());
        let ticket = breaker.admit().await.unwrap();

        trip(&breaker).await;
        breaker.reset().await;

        breaker.record(ticket, false).await;
        assert_eq!(breaker.snapshot().await.recent_requests, 0);
    }

    #[tokio::test]
    async fn test_manual_reset() {
        let (_, breaker) = breaker(settings());
        trip(&breaker).await;

        breaker.reset().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.call(|| async { Ok::<_, ()>(42) }).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_failures_open_exactly_once() {
        let clock = Arc::new(ManualClock::default());
        let breaker = Arc::new(CircuitBreaker::with_clock("shared", settings(), clock));

        let mut handles = Vec::new();
        for _ in 0..64 {
            let breaker = breaker.clone();
            handles.push(tokio::spawn(async move {
                breaker.call(|| async { Err::<(), _>("boom") }).await
            }));
        }
        for handle in handles {
            let _ = handle.await.unwrap();
        }

        let stats = breaker.metrics();
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert_eq!(stats.opened_count, 1);
        assert_eq!(stats.failures + stats.rejected_count, 64);
    }

    #[tokio::test]
    async fn test_registry_shares_breakers_by_name() {
        let registry = CircuitBreakerRegistry::new(settings());
        let a = registry.get_or_create("redis_cache");
        let b = registry.get_or_create("redis_cache");
        assert!(Arc::ptr_eq(&a, &b));

        registry.get_or_create("vector_index");
        let names: Vec<String> = registry
            .snapshots()
            .await
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["redis_cache", "vector_index"]);
    }

    #[test]
    fn test_gauge_values() {
        assert_eq!(CircuitState::Closed.gauge_value(), 0.0);
        assert_eq!(CircuitState::Open.gauge_value(), 1.0);
        assert_eq!(CircuitState::HalfOpen.gauge_value(), 2.0);
    }
}
