//! HTTP transport seam and its reqwest implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use tracing::instrument;
use url::Url;

use crate::error::TransportError;

/// An outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Absolute URL, or a path resolved against the transport's base URL.
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub data: Option<serde_json::Value>,
    pub params: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            data: None,
            params: Vec::new(),
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::PATCH, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.data = Some(body);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Set a header, replacing any existing value with the same (case-insensitive) name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Serialized size of the request body in bytes.
    pub fn body_size(&self) -> usize {
        self.data
            .as_ref()
            .map_or(0, |data| data.to_string().len())
    }
}

/// A 2xx response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    /// Parsed JSON body; a non-JSON body is kept as a string, an empty one as `null`.
    pub data: serde_json::Value,
    pub headers: HashMap<String, String>,
}

impl HttpResponse {
    pub fn new(status: u16, data: serde_json::Value) -> Self {
        Self {
            status,
            data,
            headers: HashMap::new(),
        }
    }

    pub fn body_size(&self) -> usize {
        match &self.data {
            serde_json::Value::Null => 0,
            serde_json::Value::String(s) => s.len(),
            other => other.to_string().len(),
        }
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync + std::fmt::Debug {
    /// Send `request`. Non-2xx responses are returned as a [`TransportError`]
    /// carrying the status and body.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// [`HttpTransport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Option<Url>,
    default_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: None,
            default_timeout,
        }
    }

    /// Resolve relative request URLs against `base_url`.
    ///
    /// # Errors
    /// Fails when `base_url` is not an absolute URL.
    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, url::ParseError> {
        // A trailing slash makes `join` append instead of replacing the last segment.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        self.base_url = Some(Url::parse(&normalized)?);
        Ok(self)
    }

    fn resolve(&self, url: &str) -> Result<Url, TransportError> {
        let resolved = match (&self.base_url, Url::parse(url)) {
            (_, Ok(absolute)) => Ok(absolute),
            (Some(base), Err(url::ParseError::RelativeUrlWithoutBase)) => {
                base.join(url.trim_start_matches('/'))
            }
            (_, Err(e)) => Err(e),
        };
        resolved.map_err(|e| TransportError::new(format!("Invalid URL {}: {}", url, e)))
    }

    fn convert_error(error: reqwest::Error) -> TransportError {
        if error.is_timeout() {
            TransportError::network("ETIMEDOUT", format!("Request timed out: {}", error))
        } else if error.is_connect() {
            TransportError::network("ECONNREFUSED", format!("Connection failed: {}", error))
        } else if error.is_request() || error.is_body() {
            TransportError::network("NETWORK_ERROR", format!("Network error: {}", error))
        } else {
            TransportError::new(error.to_string())
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url), level = "debug")]
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method = request.method.to_string();
        let url = self
            .resolve(&request.url)
            .map_err(|e| e.with_request(method.clone(), request.url.clone()))?;

        let mut builder = self
            .client
            .request(request.method.clone(), url.clone())
            .timeout(request.timeout.unwrap_or(self.default_timeout));

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        if let Some(data) = &request.data {
            builder = builder.json(data);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::convert_error(e).with_request(method.clone(), url.to_string()))?;

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let text = response
            .text()
            .await
            .map_err(|e| Self::convert_error(e).with_request(method.clone(), url.to_string()))?;
        let data = if text.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
        };

        if status.is_success() {
            return Ok(HttpResponse {
                status: status.as_u16(),
                data,
                headers,
            });
        }

        let data = (!data.is_null()).then_some(data);
        let mut error =
            TransportError::status(status.as_u16(), data).with_request(method, url.to_string());
        if let Some(secs) = headers
            .get("retry-after")
            .and_then(|v| v.parse::<u64>().ok())
        {
            error = error.with_retry_after(Duration::from_secs(secs));
        }
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(server: &MockServer) -> ReqwestTransport {
        ReqwestTransport::new(Duration::from_secs(5))
            .with_base_url(&server.uri())
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_json() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/calendar/events"))
            .and(query_param("start", "2024-02-01"))
            .and(header("Authorization", "Bearer abc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [{"id": "1"}]
            })))
            .mount(&mock_server)
            .await;

        let response = transport(&mock_server)
            .send(
                HttpRequest::get("/calendar/events")
                    .query("start", "2024-02-01")
                    .header("Authorization", "Bearer abc"),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.data["items"][0]["id"], "1");
    }

    #[tokio::test]
    async fn test_post_body() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(serde_json::json!({"refresh_token": "r"})))
            .respond_with(ResponseTemplate::new(201))
            .mount(&mock_server)
            .await;

        let response = transport(&mock_server)
            .send(HttpRequest::post("auth/refresh").json(serde_json::json!({"refresh_token": "r"})))
            .await
            .unwrap();

        assert_eq!(response.status, 201);
        assert!(response.data.is_null());
    }

    #[tokio::test]
    async fn test_error_status_becomes_transport_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/calendar/events"))
            .respond_with(
                ResponseTemplate::new(429)
                    .append_header("Retry-After", "30")
                    .set_body_json(serde_json::json!({"message": "slow down"})),
            )
            .mount(&mock_server)
            .await;

        let err = transport(&mock_server)
            .send(HttpRequest::get("/calendar/events"))
            .await
            .unwrap_err();

        assert_eq!(err.status, Some(429));
        assert_eq!(err.retry_after, Some(Duration::from_secs(30)));
        assert_eq!(err.data.unwrap()["message"], "slow down");
        assert!(err.request.unwrap().url.ends_with("/calendar/events"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        // Nothing listens on port 9 on test machines.
        let transport = ReqwestTransport::new(Duration::from_secs(2));
        let err = transport
            .send(HttpRequest::get("http://127.0.0.1:9/unreachable"))
            .await
            .unwrap_err();

        assert!(err.status.is_none());
        assert!(err.code.is_some());
    }

    #[test]
    fn test_header_replaces_existing() {
        let request = HttpRequest::get("/x")
            .header("Authorization", "Bearer old")
            .header("authorization", "Bearer new");
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header_value("Authorization"), Some("Bearer new"));
    }
}
