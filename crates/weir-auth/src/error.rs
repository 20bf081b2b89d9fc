use std::time::Duration;

use thiserror::Error;
use weir_core::error::ApiError;

/// Credential refresh failures. Cheap to clone so one refresh outcome can be
/// handed to every waiting caller.
#[derive(Error, Debug, Clone)]
pub enum AuthError {
    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(#[source] ApiError),

    #[error("Timed out after {0:?} waiting for token refresh")]
    QueueTimeout(Duration),

    #[error("Token refresh was abandoned")]
    RefreshAborted,
}

impl AuthError {
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthError::NoRefreshToken => "Not signed in. Please authenticate.",
            AuthError::RefreshFailed(_) => "Your session has expired. Please sign in again.",
            AuthError::QueueTimeout(_) => "Signing in is taking too long. Please try again.",
            AuthError::RefreshAborted => "Sign-in was interrupted. Please try again.",
        }
    }

    /// The underlying API failure, when the refresh call itself failed.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            AuthError::RefreshFailed(error) => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages() {
        assert!(AuthError::NoRefreshToken.user_message().contains("sign"));
        let err = AuthError::RefreshFailed(ApiError::http(400, "invalid_grant"));
        assert_eq!(err.api_error().and_then(|e| e.status_code), Some(400));
        assert!(err.to_string().contains("invalid_grant"));
    }
}
