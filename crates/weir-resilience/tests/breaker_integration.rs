//! Integration tests for ResilientApiClient against a mock HTTP server.

use std::sync::Arc;
use std::time::Duration;

use weir_core::error::CIRCUIT_BREAKER_OPEN;
use weir_core::metrics::RecordingMetrics;
use weir_core::transport::ReqwestTransport;
use weir_resilience::{
    CircuitBreakerManager, CircuitBreakerOptions, CircuitState, ResilientApiClient, RetryOptions,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, threshold: u32, retry: RetryOptions) -> ResilientApiClient {
    let transport = ReqwestTransport::new(Duration::from_secs(5))
        .with_base_url(&server.uri())
        .unwrap();
    let breakers = Arc::new(CircuitBreakerManager::new(CircuitBreakerOptions {
        failure_threshold: threshold,
        reset_timeout: Duration::from_secs(60),
        monitoring_period: Duration::from_secs(120),
    }));
    ResilientApiClient::new(
        Arc::new(transport),
        breakers,
        Arc::new(RecordingMetrics::new()),
        retry,
    )
}

#[tokio::test]
async fn test_breaker_opens_after_threshold_and_short_circuits() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendar/events"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, 3, RetryOptions::none());

    for _ in 0..3 {
        let err = client
            .get::<serde_json::Value>("/calendar/events")
            .await
            .unwrap_err();
        assert_eq!(err.status_code, Some(500));
    }

    let breaker = client.breakers().get_breaker("calendar");
    assert_eq!(breaker.stats().state, CircuitState::Open);

    // Fourth call is rejected locally; the mock's `expect(3)` verifies no request went out.
    let err = client
        .get::<serde_json::Value>("/calendar/events")
        .await
        .unwrap_err();
    assert_eq!(err.code, CIRCUIT_BREAKER_OPEN);
    assert_eq!(err.status_code, Some(503));

    // Other services are unaffected.
    Mock::given(method("GET"))
        .and(path("/todos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&mock_server)
        .await;
    let todos: Vec<serde_json::Value> = client.get("/todos").await.unwrap();
    assert!(todos.is_empty());
}

#[tokio::test]
async fn test_retry_recovers_from_transient_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/calendar/events"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendar/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": []})))
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, 5, RetryOptions::new(3, 10, 100));

    let body: serde_json::Value = client.get("/calendar/events").await.unwrap();
    assert_eq!(body["items"], serde_json::json!([]));

    let stats = client.stats();
    assert_eq!(stats.retries["calendar"].total_attempts, 3);
    assert_eq!(stats.retries["calendar"].successful_retries, 1);
    assert_eq!(stats.circuit_breakers[0].state, CircuitState::Closed);
}

#[tokio::test]
async fn test_not_found_is_not_retried_and_does_not_trip_breaker() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/calendar/events/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client(&mock_server, 1, RetryOptions::new(3, 10, 100));

    let err = client.delete("/calendar/events/missing").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(
        client.breakers().get_breaker("calendar").state(),
        CircuitState::Closed
    );
}
