pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod strategy;
pub mod transport;

pub use cache::{CacheError, CachePriority, CacheService, CacheStats, MemoryCache, SetOptions};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ApiConfig, AuthConfig, CalendarConfig, CircuitBreakerConfig, JitterMode, RetryConfig,
    ValidationResult, WeirConfig,
};
pub use error::{ApiError, ErrorCategory, ErrorDetail, TransportError, CIRCUIT_BREAKER_OPEN};
pub use events::{Event, EventBus, Subscription};
pub use metrics::{ApiCallRecord, MetricUnit, MetricsSink, RecordingMetrics, TracingMetrics};
pub use strategy::{handle_api_error, ErrorStrategy, RecoveryAction};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

use anyhow::Result;

/// Initialize logging for binaries and integration harnesses
pub fn init() -> Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))?;

    tracing::info!("Weir core initialized");
    Ok(())
}
