use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeirConfig {
    /// Remote API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Default retry policy for outbound requests
    #[serde(default)]
    pub retry: RetryConfig,

    /// Circuit breaker settings, shared by every service breaker
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Credential refresh settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// Calendar cache settings
    #[serde(default)]
    pub calendar: CalendarConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL that relative request paths are resolved against
    pub base_url: String,

    /// Per-request transport timeout
    pub timeout_ms: u64,
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            timeout_ms: 10_000,
        }
    }
}

/// Randomization applied on top of the computed backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JitterMode {
    /// Deterministic delays.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay / 2, delay]`.
    Equal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub retryable_status_codes: Vec<u16>,
    #[serde(default)]
    pub jitter: JitterMode,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            retryable_status_codes: vec![408, 429, 500, 502, 503, 504],
            jitter: JitterMode::None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Qualifying failures before the circuit opens
    pub failure_threshold: u32,

    /// How long an open circuit rejects calls before allowing a trial
    pub reset_timeout_ms: u64,

    /// Failure-free period after which a stale failure count is cleared
    pub monitoring_period_ms: u64,

    /// Run the periodic health check task
    #[serde(default = "default_true")]
    pub health_check_enabled: bool,
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn monitoring_period(&self) -> Duration {
        Duration::from_millis(self.monitoring_period_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            monitoring_period_ms: 120_000,
            health_check_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Token refresh endpoint (absolute, or relative to `api.base_url`)
    pub refresh_token_url: String,

    /// Refresh this long before the token actually expires
    pub refresh_buffer_ms: u64,

    #[serde(default = "default_true")]
    pub enable_auto_refresh: bool,

    /// Queue callers behind an in-flight refresh instead of refreshing per caller
    #[serde(default = "default_true")]
    pub enable_request_queue: bool,

    /// Longest a queued caller waits for an in-flight refresh
    pub queue_timeout_ms: u64,

    /// Attempts made by `retry_with_new_auth`
    pub max_retry_attempts: u32,

    /// Cache key the token is persisted under
    pub storage_key: String,
}

impl AuthConfig {
    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_millis(self.refresh_buffer_ms)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            refresh_token_url: "/auth/refresh".to_string(),
            refresh_buffer_ms: 5 * 60 * 1000,
            enable_auto_refresh: true,
            enable_request_queue: true,
            queue_timeout_ms: 30_000,
            max_retry_attempts: 3,
            storage_key: "auth_token".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Lifetime of a cached range; the stale copy lives three times as long
    pub cache_ttl_ms: u64,

    /// Quiet period before a burst of range requests is loaded
    pub debounce_ms: u64,

    /// Longest range fetched in one request; longer ranges are chunked
    pub max_date_range_days: u32,

    /// Days loaded on each side of a range after a successful load
    pub prefetch_buffer_days: u32,

    #[serde(default = "default_true")]
    pub enable_prefetch: bool,
}

impl CalendarConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn stale_ttl(&self) -> Duration {
        self.cache_ttl() * 3
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 5 * 60 * 1000,
            debounce_ms: 300,
            max_date_range_days: 90,
            prefetch_buffer_days: 7,
            enable_prefetch: true,
        }
    }
}

fn default_true() -> bool {
    true
}

impl WeirConfig {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, creating default if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(path).context("Failed to read config file")?;

        let config: WeirConfig = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    ///
    /// Returns a ValidationResult containing any errors or warnings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.api.base_url, "api.base_url", &mut result);

        if self.api.timeout_ms == 0 {
            result.add_error("api.timeout_ms", "Timeout must be greater than 0");
        }

        // Retry policy
        if self.retry.backoff_multiplier < 1.0 {
            result.add_error(
                "retry.backoff_multiplier",
                "Backoff multiplier must be at least 1.0",
            );
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            result.add_error(
                "retry.base_delay_ms",
                "Base delay must not exceed max delay",
            );
        }
        if self.retry.max_retries > 10 {
            result.add_warning("retry.max_retries", "More than 10 retries per request");
        }
        if self.retry.jitter == JitterMode::None {
            result.add_warning(
                "retry.jitter",
                "Retries are not jittered; many clients may retry in lockstep",
            );
        }

        // Circuit breaker
        if self.circuit_breaker.failure_threshold == 0 {
            result.add_error(
                "circuit_breaker.failure_threshold",
                "Failure threshold must be greater than 0",
            );
        }
        if self.circuit_breaker.reset_timeout_ms == 0 {
            result.add_warning(
                "circuit_breaker.reset_timeout_ms",
                "Open circuits will allow a trial call immediately",
            );
        }

        // Auth
        if self.auth.refresh_token_url.is_empty() {
            result.add_error("auth.refresh_token_url", "Refresh URL must not be empty");
        } else if Url::parse(&self.auth.refresh_token_url).is_ok() {
            self.validate_url(&self.auth.refresh_token_url, "auth.refresh_token_url", &mut result);
        }
        if self.auth.queue_timeout_ms == 0 {
            result.add_error("auth.queue_timeout_ms", "Queue timeout must be greater than 0");
        }
        if self.auth.storage_key.is_empty() {
            result.add_error("auth.storage_key", "Storage key must not be empty");
        }

        // Calendar
        if self.calendar.max_date_range_days == 0 {
            result.add_error(
                "calendar.max_date_range_days",
                "Max date range must be at least 1 day",
            );
        }
        if self.calendar.cache_ttl_ms == 0 {
            result.add_warning("calendar.cache_ttl_ms", "Calendar caching disabled (0 ms TTL)");
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                // Check scheme
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                // Check host
                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure config directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("weir");

        Ok(config_dir.join("config.toml"))
    }
}
