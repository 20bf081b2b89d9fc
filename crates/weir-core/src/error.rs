//! Error taxonomy shared by every Weir component.
//!
//! Transport failures are converted into an [`ApiError`] exactly once, at the
//! transport boundary. Everything downstream (retry, circuit breaking, auth
//! recovery, calendar fallbacks) works on `Result<T, ApiError>` so an error is
//! never wrapped twice.
//!
//! The [`ErrorCategory`] of an error is not stored. It is derived on demand from
//! the status code, the error code and message heuristics.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error code used for rejections synthesized by an open circuit breaker.
pub const CIRCUIT_BREAKER_OPEN: &str = "CIRCUIT_BREAKER_OPEN";

/// Status codes that always count against a circuit breaker.
pub const CIRCUIT_BREAKER_STATUS_CODES: [u16; 4] = [500, 502, 503, 504];

const NETWORK_CODES: [&str; 6] = [
    "NETWORK_ERROR",
    "ECONNREFUSED",
    "ECONNRESET",
    "ENOTFOUND",
    "EAI_AGAIN",
    "EPIPE",
];

const TIMEOUT_CODES: [&str; 3] = ["ECONNABORTED", "ETIMEDOUT", "TIMEOUT"];

/// Coarse classification of a failed API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Authentication,
    ServiceUnavailable,
    RateLimit,
    Timeout,
    Validation,
    Unknown,
}

impl ErrorCategory {
    /// Categories that are worth retrying regardless of the status code.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::ServiceUnavailable | Self::RateLimit
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Authentication => "authentication",
            Self::ServiceUnavailable => "service_unavailable",
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category-specific payload attached to an [`ApiError`].
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorDetail {
    None,
    /// Rejected locally by an open circuit breaker.
    CircuitOpen {
        service: String,
        next_attempt_at: Option<DateTime<Utc>>,
        failure_count: u32,
        threshold: u32,
    },
    RateLimited {
        retry_after: Option<Duration>,
    },
    /// Field-level problems reported by the server for a 400/422.
    Validation {
        details: Option<serde_json::Value>,
    },
    /// Any other HTTP response body worth keeping for diagnostics.
    Response {
        body: serde_json::Value,
    },
}

/// Method and URL of the request that produced a transport failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSummary {
    pub method: String,
    pub url: String,
}

/// Failure reported by an [`HttpTransport`](crate::transport::HttpTransport).
///
/// Mirrors the shape of a typical HTTP client rejection: an optional response
/// status and body, an optional low-level code (`ECONNRESET`, `ETIMEDOUT`, ...)
/// and the originating request.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub status: Option<u16>,
    pub data: Option<serde_json::Value>,
    pub code: Option<String>,
    pub message: String,
    pub retry_after: Option<Duration>,
    pub request: Option<RequestSummary>,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            data: None,
            code: None,
            message: message.into(),
            retry_after: None,
            request: None,
        }
    }

    /// Non-2xx response.
    pub fn status(status: u16, data: Option<serde_json::Value>) -> Self {
        Self {
            status: Some(status),
            data,
            code: None,
            message: format!("Request failed with status code {}", status),
            retry_after: None,
            request: None,
        }
    }

    /// Low-level failure before any response was received.
    pub fn network(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: None,
            data: None,
            code: Some(code.into()),
            message: message.into(),
            retry_after: None,
            request: None,
        }
    }

    pub fn with_request(mut self, method: impl Into<String>, url: impl Into<String>) -> Self {
        self.request = Some(RequestSummary {
            method: method.into(),
            url: url.into(),
        });
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// A failed API operation.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub status_code: Option<u16>,
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
    pub retryable: bool,
    pub detail: ErrorDetail,
    #[source]
    cause: Option<Arc<TransportError>>,
}

impl ApiError {
    /// Create an error with no status code. Its retryable flag follows the
    /// derived category.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        let mut error = Self {
            code: code.into(),
            message: message.into(),
            status_code: None,
            endpoint: String::new(),
            timestamp: Utc::now(),
            retryable: false,
            detail: ErrorDetail::None,
            cause: None,
        };
        error.retryable = error.category().is_transient();
        error
    }

    /// Create an error for an HTTP status.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(format!("HTTP_{}", status), message).with_status(status)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self.retryable = self.category().is_transient();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.detail = detail;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Synthetic rejection for a call short-circuited by an open breaker.
    pub fn circuit_open(
        service: &str,
        next_attempt_at: Option<DateTime<Utc>>,
        failure_count: u32,
        threshold: u32,
    ) -> Self {
        let message = match next_attempt_at {
            Some(at) => format!(
                "Circuit breaker is open for service '{}', next attempt at {}",
                service,
                at.to_rfc3339()
            ),
            None => format!("Circuit breaker is open for service '{}'", service),
        };

        let mut error = Self::new(CIRCUIT_BREAKER_OPEN, message)
            .with_status(503)
            .with_endpoint(service)
            .with_detail(ErrorDetail::CircuitOpen {
                service: service.to_string(),
                next_attempt_at,
                failure_count,
                threshold,
            });
        error.retryable = true;
        error
    }

    /// Wrapped transport error, when this error came from the network.
    pub fn transport(&self) -> Option<&TransportError> {
        self.cause.as_deref()
    }

    pub fn is_circuit_open(&self) -> bool {
        self.code == CIRCUIT_BREAKER_OPEN
    }

    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        if let Some(status) = self.status_code {
            match status {
                401 | 403 => return ErrorCategory::Authentication,
                408 => return ErrorCategory::Timeout,
                429 => return ErrorCategory::RateLimit,
                500 | 502 | 503 | 504 => return ErrorCategory::ServiceUnavailable,
                400 | 422 => return ErrorCategory::Validation,
                _ => {}
            }
        }

        let code = self.code.to_ascii_uppercase();
        let message = self.message.to_ascii_lowercase();

        if TIMEOUT_CODES.contains(&code.as_str())
            || message.contains("timeout")
            || message.contains("timed out")
        {
            return ErrorCategory::Timeout;
        }

        if NETWORK_CODES.contains(&code.as_str())
            || message.contains("network")
            || message.contains("connection")
            || message.contains("dns")
        {
            return ErrorCategory::Network;
        }

        if message.contains("unauthorized")
            || message.contains("unauthenticated")
            || message.contains("authentication")
            || message.contains("token expired")
        {
            return ErrorCategory::Authentication;
        }

        if message.contains("rate limit") || message.contains("too many requests") {
            return ErrorCategory::RateLimit;
        }

        match self.status_code {
            Some(status) if status >= 500 => ErrorCategory::ServiceUnavailable,
            _ if message.contains("validation") || message.contains("invalid") => {
                ErrorCategory::Validation
            }
            _ => ErrorCategory::Unknown,
        }
    }

    /// Whether this failure should count against a circuit breaker.
    ///
    /// Only infrastructure failures do: network, timeout, unavailable service,
    /// 500/502/503/504, and anything that never got a status code. Client
    /// errors pass through without touching the breaker.
    pub fn is_circuit_breaker_error(&self) -> bool {
        match self.status_code {
            None => true,
            Some(status) if CIRCUIT_BREAKER_STATUS_CODES.contains(&status) => true,
            Some(_) => matches!(
                self.category(),
                ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::ServiceUnavailable
            ),
        }
    }

    /// Whether the upstream reported "nothing here" rather than a failure.
    pub fn is_not_found(&self) -> bool {
        self.status_code == Some(404)
            || self.code.eq_ignore_ascii_case("NOT_FOUND")
            || self.message.to_ascii_lowercase().contains("no events found")
    }

    /// User-friendly message for UI display.
    pub fn user_message(&self) -> &'static str {
        crate::strategy::user_message(self.category())
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        let code = match (&err.code, err.status) {
            (Some(code), _) => code.clone(),
            (None, Some(status)) => format!("HTTP_{}", status),
            (None, None) => "UNKNOWN_ERROR".to_string(),
        };

        // Prefer the server's own explanation when the body carries one.
        let message = err
            .data
            .as_ref()
            .and_then(|data| data.get("message").or_else(|| data.get("error")))
            .and_then(|value| value.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| err.message.clone());

        let detail = match (err.status, &err.data) {
            (Some(429), _) => ErrorDetail::RateLimited {
                retry_after: err.retry_after,
            },
            (Some(400) | Some(422), data) => ErrorDetail::Validation {
                details: data.clone(),
            },
            (_, Some(body)) => ErrorDetail::Response { body: body.clone() },
            _ => ErrorDetail::None,
        };

        let endpoint = err
            .request
            .as_ref()
            .map(|request| request.url.clone())
            .unwrap_or_default();

        let mut error = ApiError::new(code, message)
            .with_endpoint(endpoint)
            .with_detail(detail);
        if let Some(status) = err.status {
            error = error.with_status(status);
        }
        error.cause = Some(Arc::new(err));
        error
    }
}
