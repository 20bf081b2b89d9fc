pub mod circuit_breaker;
pub mod client;
pub mod retry;

pub use circuit_breaker::{
    BreakerEvent, BreakerEventKind, CircuitBreaker, CircuitBreakerManager, CircuitBreakerOptions,
    CircuitBreakerStats, CircuitState,
};
pub use client::{service_name, ClientStats, ResilientApiClient};
pub use retry::{with_retry, with_retry_report, RetryOptions, RetryReport, RetryStats};
