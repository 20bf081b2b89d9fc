//! Upstream calendar API access.

use std::fmt;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::instrument;
use weir_auth::AuthManager;
use weir_core::error::ApiError;
use weir_core::transport::{HttpRequest, HttpResponse};
use weir_resilience::ResilientApiClient;

use crate::range::DateRange;
use crate::types::*;

const DEFAULT_CALENDAR: &str = "primary";
const PAGE_SIZE: &str = "250";

/// Where [`CalendarCacheManager`](crate::CalendarCacheManager) loads events
/// from and sends mutations to.
#[async_trait]
pub trait EventSource: Send + Sync + fmt::Debug {
    /// Every event overlapping `range`.
    async fn fetch_events(&self, range: &DateRange) -> Result<Vec<CalendarEvent>, ApiError>;

    async fn create_event(&self, event: &NewEvent) -> Result<CalendarEvent, ApiError>;

    async fn update_event(&self, id: &str, update: &EventUpdate) -> Result<CalendarEvent, ApiError>;

    async fn delete_event(&self, id: &str) -> Result<(), ApiError>;
}

/// [`EventSource`] backed by the calendar REST API.
///
/// Requests go through the resilient client, so they share its retry policy
/// and the `calendars` circuit breaker. With an [`AuthManager`] attached every
/// request carries the current token and is retried once the token has been
/// refreshed after an authentication failure.
#[derive(Debug, Clone)]
pub struct ApiEventSource {
    client: ResilientApiClient,
    auth: Option<AuthManager>,
    calendar_id: String,
}

impl ApiEventSource {
    pub fn new(client: ResilientApiClient) -> Self {
        Self {
            client,
            auth: None,
            calendar_id: DEFAULT_CALENDAR.to_string(),
        }
    }

    pub fn with_auth(mut self, auth: AuthManager) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_calendar_id(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = calendar_id.into();
        self
    }

    fn events_url(&self) -> String {
        format!("/calendars/{}/events", urlencoding::encode(&self.calendar_id))
    }

    fn event_url(&self, event_id: &str) -> String {
        format!(
            "/calendars/{}/events/{}",
            urlencoding::encode(&self.calendar_id),
            urlencoding::encode(event_id),
        )
    }

    async fn send<F>(&self, build: F) -> Result<HttpResponse, ApiError>
    where
        F: Fn() -> HttpRequest + Sync,
    {
        let client = &self.client;
        let build = &build;
        match &self.auth {
            Some(auth) => {
                auth.retry_with_new_auth(move || async move {
                    let mut request = build();
                    auth.authorize(&mut request).await;
                    client.request(request).await
                })
                .await
            }
            None => client.request(build()).await,
        }
    }

    async fn send_json<T, F>(&self, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn() -> HttpRequest + Sync,
    {
        let response = self.send(&build).await?;
        serde_json::from_value(response.data).map_err(|e| {
            ApiError::new("PARSE_ERROR", format!("Invalid calendar response: {}", e))
                .with_status(response.status)
                .with_endpoint(build().url)
        })
    }
}

#[async_trait]
impl EventSource for ApiEventSource {
    #[instrument(skip(self, range), fields(range = %range), level = "info")]
    async fn fetch_events(&self, range: &DateRange) -> Result<Vec<CalendarEvent>, ApiError> {
        let url = self.events_url();
        let time_min = range.start.to_rfc3339();
        let time_max = range.end.to_rfc3339();
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: EventListResponse = self
                .send_json(|| {
                    let request = HttpRequest::get(url.as_str())
                        .query("timeMin", time_min.as_str())
                        .query("timeMax", time_max.as_str())
                        .query("singleEvents", "true")
                        .query("orderBy", "startTime")
                        .query("maxResults", PAGE_SIZE);
                    match &page_token {
                        Some(token) => request.query("pageToken", token.as_str()),
                        None => request,
                    }
                })
                .await?;

            let now = Utc::now();
            events.extend(page.items.into_iter().map(|api| CalendarEvent::from_api(api, now)));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::debug!("Fetched {} events for {}", events.len(), range);
        Ok(events)
    }

    #[instrument(skip(self, event), fields(title = %event.title), level = "info")]
    async fn create_event(&self, event: &NewEvent) -> Result<CalendarEvent, ApiError> {
        let url = self.events_url();
        let body = event.to_api_body();
        let api_event: ApiEvent = self
            .send_json(|| HttpRequest::post(url.as_str()).json(body.clone()))
            .await?;
        Ok(CalendarEvent::from_api(api_event, Utc::now()))
    }

    #[instrument(skip(self, update), level = "info")]
    async fn update_event(&self, id: &str, update: &EventUpdate) -> Result<CalendarEvent, ApiError> {
        let url = self.event_url(id);
        let body = update.to_api_body();
        let api_event: ApiEvent = self
            .send_json(|| HttpRequest::patch(url.as_str()).json(body.clone()))
            .await?;
        Ok(CalendarEvent::from_api(api_event, Utc::now()))
    }

    #[instrument(skip(self), level = "info")]
    async fn delete_event(&self, id: &str) -> Result<(), ApiError> {
        let url = self.event_url(id);
        self.send(|| HttpRequest::delete(url.as_str())).await?;
        Ok(())
    }
}
