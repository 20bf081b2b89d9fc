//! End-to-end tests: cache manager -> API source -> resilient client -> mock server.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use weir_auth::{AuthManager, AuthToken};
use weir_calendar::{ApiEventSource, CalendarCacheManager, DateRange, NewEvent};
use weir_core::cache::{CacheService, MemoryCache};
use weir_core::config::{AuthConfig, CalendarConfig};
use weir_core::metrics::TracingMetrics;
use weir_core::transport::ReqwestTransport;
use weir_resilience::{CircuitBreakerManager, CircuitBreakerOptions, ResilientApiClient, RetryOptions};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EVENTS_PATH: &str = "/calendars/primary/events";

struct Stack {
    manager: CalendarCacheManager,
    auth: AuthManager,
}

async fn stack(server: &MockServer) -> Stack {
    let transport = Arc::new(
        ReqwestTransport::new(Duration::from_secs(5))
            .with_base_url(&server.uri())
            .unwrap(),
    );
    let client = ResilientApiClient::new(
        transport.clone(),
        Arc::new(CircuitBreakerManager::new(CircuitBreakerOptions::default())),
        Arc::new(TracingMetrics),
        RetryOptions::none(),
    );
    let cache: Arc<dyn CacheService> = Arc::new(MemoryCache::new());

    let auth = AuthManager::new(AuthConfig::default(), transport, Arc::clone(&cache));
    auth.set_token(
        AuthToken::bearer("token-1", Utc::now() + chrono::Duration::hours(1))
            .with_refresh_token("refresh-1"),
    )
    .await;

    let source = ApiEventSource::new(client).with_auth(auth.clone());
    let config = CalendarConfig {
        debounce_ms: 10,
        enable_prefetch: false,
        ..CalendarConfig::default()
    };
    let manager = CalendarCacheManager::new(config, cache, Arc::new(source), Arc::new(TracingMetrics));

    Stack { manager, auth }
}

fn api_event(id: &str, start: &str, end: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "summary": format!("Event {}", id),
        "start": {"dateTime": start},
        "end": {"dateTime": end},
        "category": "work"
    })
}

fn feb_week() -> DateRange {
    DateRange::new(
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 2, 8, 0, 0, 0).unwrap(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_pages_are_followed_and_cached() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .and(query_param("pageToken", "page-2"))
        .and(header("Authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [api_event("e2", "2024-02-05T14:00:00Z", "2024-02-05T15:00:00Z")]
        })))
        .with_priority(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .and(query_param("singleEvents", "true"))
        .and(query_param("timeMin", "2024-02-01T00:00:00+00:00"))
        .and(header("Authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [api_event("e1", "2024-02-01T09:00:00Z", "2024-02-01T09:15:00Z")],
            "nextPageToken": "page-2"
        })))
        .with_priority(2)
        .expect(1)
        .mount(&mock_server)
        .await;

    let stack = stack(&mock_server).await;
    let range = feb_week();

    let events = stack
        .manager
        .get_events_for_date_range(range.start, range.end)
        .await
        .unwrap();
    let ids: Vec<&str> = events.iter().map(|event| event.id.as_str()).collect();
    assert_eq!(ids, vec!["e1", "e2"]);

    // Served from cache; the mocks verify one request each on drop.
    let again = stack.manager.get_events(range).await.unwrap();
    assert_eq!(again, events);
    assert_eq!(stack.manager.stats().network_fetches, 1);
}

#[tokio::test]
async fn test_unauthorized_fetch_refreshes_and_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .and(header("Authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_partial_json(serde_json::json!({"refresh_token": "refresh-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "token-2",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .and(header("Authorization", "Bearer token-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [api_event("e1", "2024-02-02T09:00:00Z", "2024-02-02T10:00:00Z")]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let stack = stack(&mock_server).await;

    let events = stack.manager.get_events(feb_week()).await.unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(stack.auth.token().unwrap().access_token, "token-2");
}

#[tokio::test]
async fn test_not_found_is_cached_as_empty() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "message": "No events found"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let stack = stack(&mock_server).await;

    assert!(stack.manager.get_events(feb_week()).await.unwrap().is_empty());
    assert!(stack.manager.get_events(feb_week()).await.unwrap().is_empty());
    assert_eq!(stack.manager.stats().negative_cached, 1);
}

#[tokio::test]
async fn test_create_event_posts_and_invalidates() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(EVENTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": []})))
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(EVENTS_PATH))
        .and(body_partial_json(serde_json::json!({
            "summary": "Planning",
            "start": {"dateTime": "2024-02-03T09:00:00+00:00"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(api_event(
            "new",
            "2024-02-03T09:00:00Z",
            "2024-02-03T10:00:00Z",
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let stack = stack(&mock_server).await;
    stack.manager.get_events(feb_week()).await.unwrap();

    let start = Utc.with_ymd_and_hms(2024, 2, 3, 9, 0, 0).unwrap();
    let created = stack
        .manager
        .create_event(&NewEvent::new("Planning", start, start + chrono::Duration::hours(1)))
        .await
        .unwrap();
    assert_eq!(created.id, "new");

    // The week was invalidated, so this goes back to the server.
    stack.manager.get_events(feb_week()).await.unwrap();
}
