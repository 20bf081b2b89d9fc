use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use weir_core::clock;

/// Credential for API requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    /// Access token for API requests
    pub access_token: String,

    /// Optional refresh token for token renewal
    pub refresh_token: Option<String>,

    /// Token expiration time
    pub expires_at: DateTime<Utc>,

    /// Authorization scheme, usually `Bearer`
    pub token_type: String,

    /// Scopes granted to this token
    #[serde(default)]
    pub scope: Vec<String>,
}

impl AuthToken {
    pub fn bearer(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at,
            token_type: "Bearer".to_string(),
            scope: Vec::new(),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// Check if the token is expired
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Check if the token is within `buffer` of expiry
    pub fn needs_refresh_at(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        let buffer = chrono::Duration::from_std(buffer).unwrap_or(chrono::Duration::MAX);
        match self.expires_at.checked_sub_signed(buffer) {
            Some(refresh_at) => now >= refresh_at,
            None => true,
        }
    }

    /// Time left before expiry, zero once expired
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        clock::until(now, self.expires_at)
    }

    /// Value for the `Authorization` header
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}
