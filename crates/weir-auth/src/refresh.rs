//! Token refresh endpoint call.
//!
//! `POST <refresh_token_url>` with `{refresh_token, grant_type: "refresh_token"}`.
//! Any non-2xx response is a refresh failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use weir_core::error::ApiError;
use weir_core::transport::{HttpRequest, HttpTransport};

use crate::token::AuthToken;

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
    grant_type: &'static str,
}

/// Success body of the refresh endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime in seconds
    pub expires_in: u64,
    pub token_type: Option<String>,
    /// Space-delimited scopes
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Build the replacement token. A response without a refresh token keeps
    /// `previous_refresh_token`.
    pub fn into_token(self, now: DateTime<Utc>, previous_refresh_token: Option<String>) -> AuthToken {
        let lifetime = chrono::Duration::seconds(i64::try_from(self.expires_in).unwrap_or(i64::MAX));
        AuthToken {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh_token),
            expires_at: now.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC),
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: self
                .scope
                .map(|scope| scope.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

#[tracing::instrument(skip(transport, refresh_token), level = "info")]
pub(crate) async fn request_refresh(
    transport: &dyn HttpTransport,
    url: &str,
    refresh_token: &str,
    now: DateTime<Utc>,
) -> Result<AuthToken, ApiError> {
    let body = serde_json::to_value(RefreshRequest {
        refresh_token,
        grant_type: "refresh_token",
    })
    .map_err(|e| ApiError::new("SERIALIZATION_ERROR", e.to_string()))?;

    let response = transport
        .send(HttpRequest::post(url).json(body))
        .await
        .map_err(ApiError::from)?;

    let parsed: TokenResponse = serde_json::from_value(response.data).map_err(|e| {
        ApiError::new("PARSE_ERROR", format!("Failed to parse refresh response: {}", e))
            .with_status(response.status)
            .with_endpoint(url)
    })?;

    Ok(parsed.into_token(now, Some(refresh_token.to_string())))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_into_token_keeps_previous_refresh_token() {
        let now = Utc::now();
        let response: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "new",
            "expires_in": 3600,
            "scope": "calendar.read  calendar.write"
        }))
        .unwrap();

        let token = response.into_token(now, Some("old-refresh".to_string()));

        assert_eq!(token.access_token, "new");
        assert_eq!(token.refresh_token.as_deref(), Some("old-refresh"));
        assert_eq!(token.expires_at, now + chrono::Duration::seconds(3600));
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.scope, vec!["calendar.read", "calendar.write"]);
    }

    #[test]
    fn test_into_token_prefers_rotated_refresh_token() {
        let response: TokenResponse = serde_json::from_value(serde_json::json!({
            "access_token": "new",
            "refresh_token": "rotated",
            "expires_in": 60,
            "token_type": "bearer"
        }))
        .unwrap();

        let token = response.into_token(Utc::now(), Some("old".to_string()));
        assert_eq!(token.refresh_token.as_deref(), Some("rotated"));
        assert_eq!(token.token_type, "bearer");
    }
}
