//! HTTP client that routes every request through retry and a per-service
//! circuit breaker.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use url::Url;
use weir_core::config::WeirConfig;
use weir_core::error::ApiError;
use weir_core::metrics::{ApiCallRecord, MetricUnit, MetricsSink};
use weir_core::strategy::{handle_api_error, ErrorStrategy};
use weir_core::transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

use crate::circuit_breaker::{CircuitBreakerManager, CircuitBreakerOptions, CircuitBreakerStats};
use crate::retry::{with_retry_report, RetryOptions, RetryStats};

const DEFAULT_SERVICE: &str = "default";

/// Retry and breaker state for every service the client has talked to.
#[derive(Debug, Clone)]
pub struct ClientStats {
    pub retries: HashMap<String, RetryStats>,
    pub circuit_breakers: Vec<CircuitBreakerStats>,
}

#[derive(Debug, Clone)]
pub struct ResilientApiClient {
    transport: Arc<dyn HttpTransport>,
    breakers: Arc<CircuitBreakerManager>,
    metrics: Arc<dyn MetricsSink>,
    retry: RetryOptions,
    retry_stats: Arc<Mutex<HashMap<String, RetryStats>>>,
}

impl ResilientApiClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        breakers: Arc<CircuitBreakerManager>,
        metrics: Arc<dyn MetricsSink>,
        retry: RetryOptions,
    ) -> Self {
        Self {
            transport,
            breakers,
            metrics,
            retry,
            retry_stats: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Build a client over reqwest from configuration.
    ///
    /// Starts the breaker health check when enabled, so this must be called
    /// from inside a Tokio runtime.
    ///
    /// # Errors
    /// Fails when `api.base_url` is not an absolute URL.
    pub fn from_config(
        config: &WeirConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, url::ParseError> {
        let transport = ReqwestTransport::new(config.api.timeout()).with_base_url(&config.api.base_url)?;
        let breakers = Arc::new(CircuitBreakerManager::new(CircuitBreakerOptions::from(
            &config.circuit_breaker,
        )));
        if config.circuit_breaker.health_check_enabled {
            breakers.spawn_health_check();
        }
        Ok(Self::new(
            Arc::new(transport),
            breakers,
            metrics,
            RetryOptions::from(&config.retry),
        ))
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerManager> {
        &self.breakers
    }

    pub fn retry_options(&self) -> &RetryOptions {
        &self.retry
    }

    /// Send `request` with the client's default retry policy.
    ///
    /// # Errors
    /// Returns the final [`ApiError`] after retries, or a circuit-open rejection.
    pub async fn request(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        self.request_with(request, &self.retry).await
    }

    /// Send `request` with an explicit retry policy.
    ///
    /// # Errors
    /// Returns the final [`ApiError`] after retries, or a circuit-open rejection.
    pub async fn request_with(
        &self,
        request: HttpRequest,
        retry: &RetryOptions,
    ) -> Result<HttpResponse, ApiError> {
        let service = service_name(&request.url);
        let breaker = self.breakers.get_breaker(&service);
        let started = Instant::now();
        let request_size = request.body_size();
        let method = request.method.to_string();
        let endpoint = request.url.clone();

        let (result, report) = with_retry_report(retry, || {
            let request = request.clone();
            let breaker = Arc::clone(&breaker);
            let transport = Arc::clone(&self.transport);
            async move {
                breaker
                    .execute(|| async move { transport.send(request).await.map_err(ApiError::from) })
                    .await
            }
        })
        .await;

        let (status_code, response_size) = match &result {
            Ok(response) => (Some(response.status), response.body_size()),
            Err(error) => (error.status_code, 0),
        };
        self.metrics.record_api_call(&ApiCallRecord {
            endpoint,
            method,
            status_code,
            duration: started.elapsed(),
            request_size,
            response_size,
            cached: false,
            retry_count: report.retries,
        });
        if report.retries > 0 {
            let name = if result.is_ok() {
                "api_retry_success"
            } else {
                "api_retry_failure"
            };
            self.metrics.record_metric(
                name,
                f64::from(report.retries),
                MetricUnit::Count,
                &[("service", service.as_str())],
            );
        }
        self.retry_stats
            .lock()
            .entry(service)
            .or_default()
            .record(&report, result.is_ok());

        if let Err(error) = &result {
            tracing::debug!("Request failed after {} retries: {}", report.retries, error);
        }
        result
    }

    /// Send `request` and decode the JSON body as `T`.
    ///
    /// # Errors
    /// Request failures as for [`request`](Self::request), plus a
    /// `PARSE_ERROR` when the body does not decode.
    pub async fn request_json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T, ApiError> {
        let endpoint = request.url.clone();
        let response = self.request(request).await?;
        serde_json::from_value(response.data).map_err(|e| {
            ApiError::new("PARSE_ERROR", format!("Invalid response body: {}", e))
                .with_status(response.status)
                .with_endpoint(endpoint)
        })
    }

    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        self.request_json(HttpRequest::get(url)).await
    }

    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request_json(HttpRequest::post(url).json(encode_body(url, body)?))
            .await
    }

    pub async fn put<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request_json(HttpRequest::put(url).json(encode_body(url, body)?))
            .await
    }

    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request_json(HttpRequest::patch(url).json(encode_body(url, body)?))
            .await
    }

    /// DELETE `url`, discarding any response body.
    pub async fn delete(&self, url: &str) -> Result<(), ApiError> {
        self.request(HttpRequest::delete(url)).await.map(|_| ())
    }

    /// Recovery strategy for an error returned by this client.
    pub fn handle_error(&self, error: &ApiError) -> ErrorStrategy {
        handle_api_error(error)
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            retries: self.retry_stats.lock().clone(),
            circuit_breakers: self.breakers.all_stats(),
        }
    }
}

fn encode_body<B: Serialize + ?Sized>(url: &str, body: &B) -> Result<serde_json::Value, ApiError> {
    serde_json::to_value(body).map_err(|e| {
        ApiError::new("SERIALIZATION_ERROR", format!("Invalid request body: {}", e))
            .with_endpoint(url)
    })
}

/// Breaker name for a request URL: its first path segment, or `"default"`.
///
/// `https://host/calendar/events?x=1` and `/calendar/events` both map to
/// `calendar`.
pub fn service_name(url: &str) -> String {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    path.split('/')
        .find(|segment| !segment.is_empty())
        .map_or_else(|| DEFAULT_SERVICE.to_string(), str::to_string)
}
