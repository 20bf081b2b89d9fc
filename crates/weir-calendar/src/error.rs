//! Calendar-specific error types.

use chrono::{DateTime, Utc};
use thiserror::Error;
use weir_core::error::{ApiError, ErrorCategory};

/// Cheap to clone so one load outcome can be shared by every waiting caller.
#[derive(Error, Debug, Clone)]
pub enum CalendarError {
    #[error("Invalid date range: {start} is after {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Load was cancelled")]
    Cancelled,
}

impl CalendarError {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidRange { .. } => "The selected dates are invalid.".to_string(),
            Self::EventNotFound(_) => "Event not found".to_string(),
            Self::Api(error) => error.user_message().to_string(),
            Self::Cache(_) => "Local cache error".to_string(),
            Self::Cancelled => "Loading was interrupted. Please try again.".to_string(),
        }
    }

    /// Whether this error should trigger a token refresh.
    pub fn should_refresh_token(&self) -> bool {
        matches!(self, Self::Api(error) if error.category() == ErrorCategory::Authentication)
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api(error) => error.retryable,
            Self::Cancelled => true,
            _ => false,
        }
    }
}
