//! Per-service circuit breaker.
//!
//! A breaker starts `Closed` and counts qualifying failures
//! ([`ApiError::is_circuit_breaker_error`]). Reaching the threshold opens it;
//! while open every call is rejected locally with a `CIRCUIT_BREAKER_OPEN`
//! error until the reset timeout has passed. The first call after that runs as
//! the single half-open trial: success closes the breaker, a qualifying failure
//! opens it again with a fresh timeout.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use weir_core::clock::{Clock, SystemClock};
use weir_core::config::CircuitBreakerConfig;
use weir_core::error::ApiError;
use weir_core::events::{Event, EventBus, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds shared by every breaker a manager creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerOptions {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub monitoring_period: Duration,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self::from(&CircuitBreakerConfig::default())
    }
}

impl From<&CircuitBreakerConfig> for CircuitBreakerOptions {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: config.reset_timeout(),
            monitoring_period: config.monitoring_period(),
        }
    }
}

/// Point-in-time snapshot of a breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    pub service: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u64,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub next_attempt_time: Option<DateTime<Utc>>,
    pub total_requests: u64,
    /// `failure_count / total_requests`, zero before the first request.
    pub failure_rate: f64,
}

#[derive(Debug, Clone)]
pub enum BreakerEvent {
    StateChange {
        service: String,
        from: CircuitState,
        to: CircuitState,
    },
    Success {
        service: String,
    },
    Failure {
        service: String,
        error: ApiError,
        failure_count: u32,
    },
    HealthCheck {
        stats: CircuitBreakerStats,
        /// Whether a stale failure count was cleared by this check.
        decayed: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerEventKind {
    StateChange,
    Success,
    Failure,
    HealthCheck,
}

impl Event for BreakerEvent {
    type Kind = BreakerEventKind;

    fn kind(&self) -> BreakerEventKind {
        match self {
            Self::StateChange { .. } => BreakerEventKind::StateChange,
            Self::Success { .. } => BreakerEventKind::Success,
            Self::Failure { .. } => BreakerEventKind::Failure,
            Self::HealthCheck { .. } => BreakerEventKind::HealthCheck,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    total_requests: u64,
    last_failure_time: Option<DateTime<Utc>>,
    next_attempt_time: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            total_requests: 0,
            last_failure_time: None,
            next_attempt_time: None,
            trial_in_flight: false,
        }
    }
}

enum Admission {
    Normal,
    Trial,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    options: CircuitBreakerOptions,
    clock: Arc<dyn Clock>,
    state: Mutex<BreakerState>,
    events: EventBus<BreakerEvent>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, options: CircuitBreakerOptions) -> Self {
        Self::with_clock(name, options, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        options: CircuitBreakerOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            options,
            clock,
            state: Mutex::new(BreakerState::new()),
            events: EventBus::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Run `operation` under the breaker.
    ///
    /// # Errors
    /// Returns a `CIRCUIT_BREAKER_OPEN` error without calling `operation` when
    /// the breaker is open (or a half-open trial is already running), otherwise
    /// whatever `operation` returns.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let admission = self.admit()?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: matches!(admission, Admission::Trial),
        };

        let result = operation().await;
        guard.armed = false;

        match &result {
            Ok(_) => self.on_success(),
            Err(error) if error.is_circuit_breaker_error() => self.on_failure(error),
            Err(error) => self.on_passthrough_failure(error),
        }
        result
    }

    /// Whether a call made now would be let through. Does not change state.
    pub fn can_execute(&self) -> bool {
        let state = self.state.lock();
        match state.state {
            CircuitState::Closed => true,
            CircuitState::Open => state
                .next_attempt_time
                .map_or(true, |at| self.clock.now() >= at),
            CircuitState::HalfOpen => !state.trial_in_flight,
        }
    }

    /// Open the breaker now, as if the threshold had just been reached.
    pub fn force_open(&self) {
        let now = self.clock.now();
        let from = {
            let mut state = self.state.lock();
            let from = state.state;
            state.state = CircuitState::Open;
            state.next_attempt_time = Some(now + self.reset_timeout());
            state.trial_in_flight = false;
            from
        };
        tracing::warn!("Circuit breaker '{}' forced open", self.name);
        self.emit_transition(from, CircuitState::Open);
    }

    /// Close the breaker and clear the failure count.
    pub fn force_close(&self) {
        let from = {
            let mut state = self.state.lock();
            let from = state.state;
            state.state = CircuitState::Closed;
            state.failure_count = 0;
            state.next_attempt_time = None;
            state.trial_in_flight = false;
            from
        };
        tracing::info!("Circuit breaker '{}' forced closed", self.name);
        self.emit_transition(from, CircuitState::Closed);
    }

    /// Return to the initial state, including all counters.
    pub fn reset(&self) {
        let from = {
            let mut state = self.state.lock();
            let from = state.state;
            *state = BreakerState::new();
            from
        };
        tracing::debug!("Circuit breaker '{}' reset", self.name);
        self.emit_transition(from, CircuitState::Closed);
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.state.lock();
        CircuitBreakerStats {
            service: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            last_failure_time: state.last_failure_time,
            next_attempt_time: state.next_attempt_time,
            total_requests: state.total_requests,
            failure_rate: if state.total_requests == 0 {
                0.0
            } else {
                f64::from(state.failure_count) / state.total_requests as f64
            },
        }
    }

    pub fn subscribe<F>(&self, kind: BreakerEventKind, handler: F) -> Subscription
    where
        F: Fn(&BreakerEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(kind, handler)
    }

    /// Clear a failure count that has not grown for a whole monitoring period.
    ///
    /// Returns whether the count was cleared. Always emits a `HealthCheck` event.
    pub fn run_health_check(&self) -> bool {
        let now = self.clock.now();
        let monitoring_period = chrono::Duration::from_std(self.options.monitoring_period)
            .unwrap_or(chrono::Duration::MAX);

        let decayed = {
            let mut state = self.state.lock();
            let stale = state.state == CircuitState::Closed
                && state.failure_count > 0
                && state
                    .last_failure_time
                    .is_some_and(|at| now - at > monitoring_period);
            if stale {
                state.failure_count = 0;
            }
            stale
        };

        if decayed {
            tracing::debug!("Circuit breaker '{}' cleared stale failures", self.name);
        }
        self.events.emit(&BreakerEvent::HealthCheck {
            stats: self.stats(),
            decayed,
        });
        decayed
    }

    fn reset_timeout(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.options.reset_timeout).unwrap_or(chrono::Duration::MAX)
    }

    fn admit(&self) -> Result<Admission, ApiError> {
        let now = self.clock.now();
        let (admission, half_opened) = {
            let mut state = self.state.lock();
            let current = state.state;
            let (admission, half_opened) = match current {
                CircuitState::Closed => (Admission::Normal, false),
                CircuitState::Open if state.next_attempt_time.map_or(true, |at| now >= at) => {
                    state.state = CircuitState::HalfOpen;
                    state.trial_in_flight = true;
                    (Admission::Trial, true)
                }
                CircuitState::HalfOpen if !state.trial_in_flight => {
                    state.trial_in_flight = true;
                    (Admission::Trial, false)
                }
                CircuitState::Open | CircuitState::HalfOpen => {
                    return Err(ApiError::circuit_open(
                        &self.name,
                        state.next_attempt_time,
                        state.failure_count,
                        self.options.failure_threshold,
                    ));
                }
            };
            state.total_requests += 1;
            (admission, half_opened)
        };

        if half_opened {
            tracing::info!("Circuit breaker '{}' half-open, allowing trial call", self.name);
            self.emit_transition(CircuitState::Open, CircuitState::HalfOpen);
        }
        Ok(admission)
    }

    fn on_success(&self) {
        let from = {
            let mut state = self.state.lock();
            let from = state.state;
            state.success_count += 1;
            state.failure_count = 0;
            if from == CircuitState::HalfOpen {
                state.state = CircuitState::Closed;
                state.next_attempt_time = None;
                state.trial_in_flight = false;
            }
            from
        };

        self.events.emit(&BreakerEvent::Success {
            service: self.name.clone(),
        });
        if from == CircuitState::HalfOpen {
            tracing::info!("Circuit breaker '{}' closed after successful trial", self.name);
            self.emit_transition(from, CircuitState::Closed);
        }
    }

    fn on_failure(&self, error: &ApiError) {
        let now = self.clock.now();
        let (from, to, failure_count) = {
            let mut state = self.state.lock();
            let from = state.state;
            state.failure_count += 1;
            state.last_failure_time = Some(now);

            let reopen = match from {
                CircuitState::HalfOpen => true,
                CircuitState::Closed => state.failure_count >= self.options.failure_threshold,
                CircuitState::Open => false,
            };
            if reopen {
                state.state = CircuitState::Open;
                state.next_attempt_time = Some(now + self.reset_timeout());
                state.trial_in_flight = false;
            }
            (from, state.state, state.failure_count)
        };

        tracing::debug!(
            "Circuit breaker '{}' recorded failure {}/{}: {}",
            self.name,
            failure_count,
            self.options.failure_threshold,
            error
        );
        self.events.emit(&BreakerEvent::Failure {
            service: self.name.clone(),
            error: error.clone(),
            failure_count,
        });
        if from != to {
            tracing::warn!(
                "Circuit breaker '{}' opened after {} failures",
                self.name,
                failure_count
            );
            self.emit_transition(from, to);
        }
    }

    /// A failure that says nothing about the service's health. A half-open
    /// trial slot is handed back so the next call can try again.
    fn on_passthrough_failure(&self, error: &ApiError) {
        let mut state = self.state.lock();
        if state.state == CircuitState::HalfOpen {
            state.trial_in_flight = false;
        }
        tracing::trace!("Circuit breaker '{}' ignoring error: {}", self.name, error);
    }

    fn emit_transition(&self, from: CircuitState, to: CircuitState) {
        if from == to {
            return;
        }
        self.events.emit(&BreakerEvent::StateChange {
            service: self.name.clone(),
            from,
            to,
        });
    }
}

/// Releases the half-open trial slot if the trial future is dropped before it
/// completes.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.state.lock().trial_in_flight = false;
        }
    }
}

/// Owns one breaker per service name, created on first use.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    options: CircuitBreakerOptions,
    clock: Arc<dyn Clock>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    shutdown: CancellationToken,
}

impl CircuitBreakerManager {
    pub fn new(options: CircuitBreakerOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    pub fn with_clock(options: CircuitBreakerOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            options,
            clock,
            breakers: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> CircuitBreakerOptions {
        self.options
    }

    /// The breaker for `service`, creating it on first use.
    pub fn get_breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        if let Some(breaker) = breakers.get(service) {
            return Arc::clone(breaker);
        }
        tracing::debug!("Creating circuit breaker for service '{}'", service);
        let breaker = Arc::new(CircuitBreaker::with_clock(
            service,
            self.options,
            Arc::clone(&self.clock),
        ));
        breakers.insert(service.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Snapshots of every breaker, ordered by service name.
    pub fn all_stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self.snapshot().iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.service.cmp(&b.service));
        stats
    }

    pub fn reset_all(&self) {
        for breaker in self.snapshot() {
            breaker.reset();
        }
    }

    pub fn run_health_checks(&self) {
        for breaker in self.snapshot() {
            breaker.run_health_check();
        }
    }

    /// Run health checks every monitoring period until [`shutdown`](Self::shutdown).
    ///
    /// Returns `None` when the monitoring period is zero.
    pub fn spawn_health_check(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let period = self.options.monitoring_period;
        if period.is_zero() {
            tracing::warn!("Circuit breaker health check disabled: zero monitoring period");
            return None;
        }

        let manager = Arc::clone(self);
        let shutdown = self.shutdown.clone();
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Circuit breaker health check stopped");
                        break;
                    }
                    _ = interval.tick() => manager.run_health_checks(),
                }
            }
        }))
    }

    /// Stop the health check task.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn snapshot(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use weir_core::clock::ManualClock;
    use weir_core::error::CIRCUIT_BREAKER_OPEN;

    fn options(threshold: u32) -> CircuitBreakerOptions {
        CircuitBreakerOptions {
            failure_threshold: threshold,
            reset_timeout: Duration::from_secs(60),
            monitoring_period: Duration::from_secs(120),
        }
    }

    fn breaker(threshold: u32) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::default();
        let breaker = CircuitBreaker::with_clock("calendar", options(threshold), Arc::new(clock.clone()));
        (breaker, clock)
    }

    async fn fail(breaker: &CircuitBreaker, status: u16) -> ApiError {
        breaker
            .execute(|| async { Err::<(), _>(ApiError::http(status, "boom")) })
            .await
            .unwrap_err()
    }

    async fn succeed(breaker: &CircuitBreaker) {
        breaker.execute(|| async { Ok::<_, ApiError>(()) }).await.unwrap();
    }

    #[tokio::test]
    async fn test_opens_at_threshold() {
        let (breaker, _clock) = breaker(3);

        fail(&breaker, 500).await;
        fail(&breaker, 503).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        fail(&breaker, 502).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let calls = AtomicUsize::new(0);
        let err = breaker
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ApiError>(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.code, CIRCUIT_BREAKER_OPEN);
        assert_eq!(err.status_code, Some(503));
        assert!(err.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!breaker.can_execute());
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let (breaker, _clock) = breaker(3);

        fail(&breaker, 500).await;
        fail(&breaker, 500).await;
        succeed(&breaker).await;
        fail(&breaker, 500).await;

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 1);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.total_requests, 4);
    }

    #[tokio::test]
    async fn test_client_errors_do_not_count() {
        let (breaker, _clock) = breaker(1);

        fail(&breaker, 400).await;
        fail(&breaker, 404).await;
        fail(&breaker, 422).await;
        assert_eq!(breaker.state(), CircuitState::Closed);

        // No status code at all counts.
        breaker
            .execute(|| async { Err::<(), _>(ApiError::new("ECONNRESET", "socket hang up")) })
            .await
            .unwrap_err();
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_trial_success_closes() {
        let (breaker, clock) = breaker(1);
        fail(&breaker, 500).await;

        clock.advance(Duration::from_secs(59));
        assert!(!breaker.can_execute());
        clock.advance(Duration::from_secs(1));
        assert!(breaker.can_execute());
        // can_execute does not transition.
        assert_eq!(breaker.state(), CircuitState::Open);

        succeed(&breaker).await;
        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert!(stats.next_attempt_time.is_none());
    }

    #[tokio::test]
    async fn test_half_open_trial_failure_reopens() {
        let (breaker, clock) = breaker(1);
        fail(&breaker, 500).await;
        let first_next_attempt = breaker.stats().next_attempt_time.unwrap();

        clock.advance(Duration::from_secs(61));
        fail(&breaker, 503).await;

        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert!(stats.next_attempt_time.unwrap() > first_next_attempt);
    }

    #[tokio::test]
    async fn test_half_open_allows_single_trial() {
        let (breaker, clock) = breaker(1);
        fail(&breaker, 500).await;
        clock.advance(Duration::from_secs(60));

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial = breaker.execute(|| async move {
            release_rx.await.ok();
            Ok::<_, ApiError>("trial")
        });
        let concurrent = async {
            tokio::task::yield_now().await;
            let err = breaker.execute(|| async { Ok::<_, ApiError>("second") }).await;
            release_tx.send(()).ok();
            err
        };

        let (trial, concurrent) = tokio::join!(trial, concurrent);
        assert_eq!(trial.unwrap(), "trial");
        assert!(concurrent.unwrap_err().is_circuit_open());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_dropped_trial_releases_slot() {
        let (breaker, clock) = breaker(1);
        fail(&breaker, 500).await;
        clock.advance(Duration::from_secs(60));

        {
            let trial = breaker.execute(|| std::future::pending::<Result<(), ApiError>>());
            let _ = tokio::time::timeout(Duration::from_millis(1), trial).await;
        }

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.can_execute());
        succeed(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_force_and_reset() {
        let (breaker, _clock) = breaker(5);

        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());

        breaker.force_close();
        assert_eq!(breaker.state(), CircuitState::Closed);

        fail(&breaker, 500).await;
        breaker.reset();
        let stats = breaker.stats();
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.total_requests, 0);
    }

    #[tokio::test]
    async fn test_health_check_decays_stale_failures() {
        let (breaker, clock) = breaker(5);
        fail(&breaker, 500).await;
        fail(&breaker, 500).await;

        assert!(!breaker.run_health_check());
        assert_eq!(breaker.stats().failure_count, 2);

        clock.advance(Duration::from_secs(121));
        assert!(breaker.run_health_check());
        assert_eq!(breaker.stats().failure_count, 0);
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let (breaker, _clock) = breaker(1);
        let transitions = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&transitions);
        let _sub = breaker.subscribe(BreakerEventKind::StateChange, move |event| {
            if let BreakerEvent::StateChange { from, to, .. } = event {
                sink.lock().push((*from, *to));
            }
        });
        let failures = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&failures);
        let _failure_sub = breaker.subscribe(BreakerEventKind::Failure, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        fail(&breaker, 500).await;
        breaker.force_close();

        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(
            *transitions.lock(),
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::Closed),
            ]
        );
    }

    #[test]
    fn test_manager_memoizes_per_service() {
        let manager = CircuitBreakerManager::new(options(3));
        let a = manager.get_breaker("calendar");
        let b = manager.get_breaker("calendar");
        let c = manager.get_breaker("auth");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        let names: Vec<_> = manager.all_stats().into_iter().map(|s| s.service).collect();
        assert_eq!(names, vec!["auth", "calendar"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_check_task_stops_on_shutdown() {
        let manager = Arc::new(CircuitBreakerManager::new(CircuitBreakerOptions {
            monitoring_period: Duration::from_secs(1),
            ..options(3)
        }));
        let checks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&checks);
        let _sub = manager
            .get_breaker("calendar")
            .subscribe(BreakerEventKind::HealthCheck, move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        let handle = manager.spawn_health_check().unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        manager.shutdown();
        handle.await.unwrap();

        assert_eq!(checks.load(Ordering::SeqCst), 3);
    }
}
