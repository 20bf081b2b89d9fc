//! Retry utilities with exponential backoff.
//!
//! The n-th retry (1-based) waits `base_delay * backoff_multiplier^(n-1)`,
//! capped at `max_delay`. With the defaults that is 1s, 2s, 4s, 8s, 16s, 30s,
//! 30s, ... Jitter is off unless configured.
//!
//! By default an error is retried when its status code is in the retryable
//! set, or when it classifies as network, timeout, service unavailable or
//! rate limit. It does NOT retry validation failures or other 4xx responses.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use weir_core::config::{JitterMode, RetryConfig};
use weir_core::error::ApiError;

/// Custom retry decision: `(error, attempt)` where `attempt` is 1-based.
pub type RetryCondition = Arc<dyn Fn(&ApiError, u32) -> bool + Send + Sync>;

/// Called before each retry sleep with `(attempt, error)`.
pub type RetryCallback = Arc<dyn Fn(u32, &ApiError) + Send + Sync>;

/// Retry configuration for one call
#[derive(Clone)]
pub struct RetryOptions {
    /// Maximum number of retry attempts after the first call
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub retryable_status_codes: Vec<u16>,
    pub jitter: JitterMode,
    pub retry_condition: Option<RetryCondition>,
    pub on_retry: Option<RetryCallback>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryOptions {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            retryable_status_codes: config.retryable_status_codes.clone(),
            jitter: config.jitter,
            retry_condition: None,
            on_retry: None,
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("retryable_status_codes", &self.retryable_status_codes)
            .field("jitter", &self.jitter)
            .field("retry_condition", &self.retry_condition.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryOptions {
    /// Create retry options with custom settings
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            ..Self::default()
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: JitterMode) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the default retry decision.
    pub fn with_retry_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&ApiError, u32) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Some(Arc::new(condition));
        self
    }

    pub fn on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(u32, &ApiError) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    /// Deterministic delay for a given 0-based retry index:
    /// `min(base_delay * backoff_multiplier^attempt, max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.base_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;
        // NaN and infinity both end up at the cap.
        let capped = if delay_ms.is_finite() {
            delay_ms.min(max_ms)
        } else {
            max_ms
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// [`delay_for_attempt`](Self::delay_for_attempt) with jitter applied.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        let millis = delay.as_millis() as u64;
        match self.jitter {
            JitterMode::None => delay,
            JitterMode::Full => Duration::from_millis(fastrand::u64(0..=millis)),
            JitterMode::Equal => Duration::from_millis(fastrand::u64(millis / 2..=millis)),
        }
    }

    /// Whether `error` should be retried. `attempt` is the 1-based retry number.
    pub fn should_retry(&self, error: &ApiError, attempt: u32) -> bool {
        if let Some(condition) = &self.retry_condition {
            return condition(error, attempt);
        }
        let status_retryable = error
            .status_code
            .is_some_and(|status| self.retryable_status_codes.contains(&status));
        status_retryable || error.category().is_transient()
    }
}

/// What happened across all attempts of one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    /// Retries performed after the first attempt.
    pub retries: u32,
    /// Sleep before each retry, in order.
    pub delays: Vec<Duration>,
    /// The call failed because `max_retries` ran out.
    pub exhausted: bool,
}

/// Execute an operation with retry logic.
///
/// # Errors
/// Returns the last error once it is not retryable or retries are exhausted.
pub async fn with_retry<T, F, Fut>(options: &RetryOptions, operation: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    with_retry_report(options, operation).await.0
}

/// [`with_retry`], also returning a [`RetryReport`].
pub async fn with_retry_report<T, F, Fut>(
    options: &RetryOptions,
    mut operation: F,
) -> (Result<T, ApiError>, RetryReport)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut report = RetryReport::default();
    let mut attempt = 0u32;

    loop {
        let error = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("Request succeeded after {} retries", attempt);
                }
                return (Ok(value), report);
            }
            Err(error) => error,
        };

        attempt += 1;
        if attempt > options.max_retries {
            if options.max_retries > 0 {
                tracing::error!(
                    "All {} retry attempts exhausted: {}",
                    options.max_retries,
                    error
                );
            }
            report.exhausted = true;
            return (Err(error), report);
        }

        if !options.should_retry(&error, attempt) {
            tracing::debug!("Non-retryable error: {}", error);
            return (Err(error), report);
        }

        let delay = options.jittered_delay(attempt - 1);
        if let Some(on_retry) = &options.on_retry {
            on_retry(attempt, &error);
        }
        tracing::warn!(
            "Retryable error on attempt {} of {}, waiting {:?}: {}",
            attempt,
            options.max_retries + 1,
            delay,
            error
        );

        report.retries = attempt;
        report.delays.push(delay);
        tokio::time::sleep(delay).await;
    }
}

/// Running retry statistics for one service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryStats {
    /// Every attempt, first tries included.
    pub total_attempts: u64,
    /// Calls that succeeded after at least one retry.
    pub successful_retries: u64,
    /// Calls that ran out of retries.
    pub failed_retries: u64,
    pub average_delay: Duration,
    pub max_delay: Duration,
    total_delay: Duration,
    delay_samples: u32,
}

impl RetryStats {
    pub fn record(&mut self, report: &RetryReport, succeeded: bool) {
        self.total_attempts += u64::from(report.retries) + 1;
        if succeeded && report.retries > 0 {
            self.successful_retries += 1;
        }
        if !succeeded && report.exhausted && report.retries > 0 {
            self.failed_retries += 1;
        }
        for delay in &report.delays {
            self.total_delay += *delay;
            self.delay_samples += 1;
            self.max_delay = self.max_delay.max(*delay);
        }
        if self.delay_samples > 0 {
            self.average_delay = self.total_delay / self.delay_samples;
        }
    }
}
