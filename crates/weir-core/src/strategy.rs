//! Error-to-recovery policy table.
//!
//! Every [`ErrorCategory`] maps to a fixed strategy. The table is exhaustive;
//! adding a category without a row is a compile error.

use serde::Serialize;

use crate::error::{ApiError, ErrorCategory};

/// Recovery action that can be offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    RefreshAuth,
    RedirectLogin,
    UseCache,
    WaitAndRetry,
    ContactSupport,
}

impl RecoveryAction {
    /// Button label for UI display.
    pub fn label(self) -> &'static str {
        match self {
            Self::Retry => "Retry",
            Self::RefreshAuth => "Refresh session",
            Self::RedirectLogin => "Sign in again",
            Self::UseCache => "Use offline data",
            Self::WaitAndRetry => "Wait and retry",
            Self::ContactSupport => "Contact support",
        }
    }
}

/// How a failed call should be handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorStrategy {
    pub category: ErrorCategory,
    pub retryable: bool,
    pub user_message: &'static str,
    pub technical_message: String,
    pub recovery_actions: Vec<RecoveryAction>,
    pub max_retries: u32,
}

pub(crate) fn user_message(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Network => "Unable to connect. Check your internet connection.",
        ErrorCategory::Authentication => "Your session has expired. Please sign in again.",
        ErrorCategory::ServiceUnavailable => {
            "The service is temporarily unavailable. Please try again later."
        }
        ErrorCategory::RateLimit => "Too many requests. Please wait a moment and try again.",
        ErrorCategory::Timeout => "The request timed out. Please try again.",
        ErrorCategory::Validation => "The request was invalid. Please check your input.",
        ErrorCategory::Unknown => "An unexpected error occurred. Please try again.",
    }
}

/// Classify `error` and return its recovery strategy.
pub fn handle_api_error(error: &ApiError) -> ErrorStrategy {
    use RecoveryAction::*;

    let category = error.category();
    let (retryable, recovery_actions, max_retries) = match category {
        ErrorCategory::Network => (true, vec![Retry, UseCache], 3),
        ErrorCategory::Authentication => (true, vec![RefreshAuth, RedirectLogin], 1),
        ErrorCategory::ServiceUnavailable => (true, vec![Retry, WaitAndRetry, UseCache], 3),
        ErrorCategory::RateLimit => (true, vec![WaitAndRetry], 2),
        ErrorCategory::Timeout => (true, vec![Retry], 2),
        ErrorCategory::Validation => (false, vec![ContactSupport], 0),
        ErrorCategory::Unknown => (true, vec![Retry, ContactSupport], 1),
    };

    let technical_message = match error.status_code {
        Some(status) => format!("[{}] {} (status {}): {}", category, error.code, status, error.message),
        None => format!("[{}] {}: {}", category, error.code, error.message),
    };

    ErrorStrategy {
        category,
        retryable,
        user_message: user_message(category),
        technical_message,
        recovery_actions,
        max_retries,
    }
}
