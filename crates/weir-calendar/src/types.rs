//! Calendar API types and data structures.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::range::DateRange;

/// Calendar event as cached and returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub location: Option<String>,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    #[serde(default)]
    pub category: EventCategory,
    pub color: String,
    pub is_all_day: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Event category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Meeting,
    Personal,
    Work,
    Reminder,
    Holiday,
    #[default]
    Other,
}

impl EventCategory {
    fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "meeting" => Self::Meeting,
            "personal" => Self::Personal,
            "work" => Self::Work,
            "reminder" => Self::Reminder,
            "holiday" => Self::Holiday,
            _ => Self::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Meeting => "meeting",
            Self::Personal => "personal",
            Self::Work => "work",
            Self::Reminder => "reminder",
            Self::Holiday => "holiday",
            Self::Other => "other",
        }
    }

    /// Display color used when the upstream event carries none.
    pub fn default_color(self) -> &'static str {
        match self {
            Self::Meeting => "#3b82f6",
            Self::Personal => "#10b981",
            Self::Work => "#6366f1",
            Self::Reminder => "#f59e0b",
            Self::Holiday => "#ef4444",
            Self::Other => "#6b7280",
        }
    }
}

/// Event attendee.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attendee {
    pub email: String,
    pub display_name: Option<String>,
    pub response_status: ResponseStatus,
    pub is_organizer: bool,
}

/// Attendee response status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ResponseStatus {
    #[default]
    NeedsAction,
    Declined,
    Tentative,
    Accepted,
}

impl CalendarEvent {
    /// Convert API response to local event.
    ///
    /// `now` stands in for missing timestamps.
    pub fn from_api(api: ApiEvent, now: DateTime<Utc>) -> Self {
        let (start_date, is_all_day) = api
            .start
            .as_ref()
            .and_then(parse_event_time)
            .unwrap_or((now, false));

        let end_date = api
            .end
            .as_ref()
            .and_then(parse_event_time)
            .map_or(start_date, |(end, _)| end);

        let category = api
            .category
            .as_deref()
            .map(EventCategory::parse)
            .unwrap_or_default();

        let attendees = api
            .attendees
            .into_iter()
            .map(|a| {
                let response_status = match a.response_status.as_deref() {
                    Some("accepted") => ResponseStatus::Accepted,
                    Some("declined") => ResponseStatus::Declined,
                    Some("tentative") => ResponseStatus::Tentative,
                    _ => ResponseStatus::NeedsAction,
                };
                Attendee {
                    email: a.email,
                    display_name: a.display_name,
                    response_status,
                    is_organizer: a.organizer,
                }
            })
            .collect();

        Self {
            id: api.id,
            title: api.summary.unwrap_or_default(),
            description: api.description,
            start_date,
            end_date,
            location: api.location,
            attendees,
            category,
            color: api
                .color
                .unwrap_or_else(|| category.default_color().to_string()),
            is_all_day,
            created_at: parse_timestamp(api.created.as_deref()).unwrap_or(now),
            updated_at: parse_timestamp(api.updated.as_deref()).unwrap_or(now),
        }
    }

    /// Whether the event falls on `date` (UTC).
    ///
    /// An event counts for every day it overlaps, and zero-length events count
    /// for the day they start on.
    pub fn occurs_on(&self, date: NaiveDate) -> bool {
        let day = DateRange::day(date);
        self.start_date.date_naive() == date
            || (self.start_date < day.end && self.end_date > day.start)
    }

    /// Days touched by this event, for cache invalidation.
    pub fn date_range(&self) -> DateRange {
        DateRange::from_dates(self.start_date.date_naive(), self.end_date.date_naive())
    }
}

/// Event to be created upstream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEvent {
    pub title: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub location: Option<String>,
    pub category: EventCategory,
    pub is_all_day: bool,
}

impl NewEvent {
    pub fn new(title: impl Into<String>, start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            description: None,
            start_date,
            end_date,
            location: None,
            category: EventCategory::Other,
            is_all_day: false,
        }
    }

    /// Request body in the upstream wire format.
    pub fn to_api_body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "summary": self.title,
            "start": api_time(self.start_date, self.is_all_day),
            "end": api_time(self.end_date, self.is_all_day),
            "category": self.category.as_str(),
        });
        if let Some(description) = &self.description {
            body["description"] = serde_json::json!(description);
        }
        if let Some(location) = &self.location {
            body["location"] = serde_json::json!(location);
        }
        body
    }
}

/// Partial update; `None` fields are left unchanged upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub category: Option<EventCategory>,
}

impl EventUpdate {
    /// Whether the update can move the event to other days.
    pub fn moves_event(&self) -> bool {
        self.start_date.is_some() || self.end_date.is_some()
    }

    pub fn to_api_body(&self) -> serde_json::Value {
        let mut body = serde_json::Map::new();
        if let Some(title) = &self.title {
            body.insert("summary".into(), serde_json::json!(title));
        }
        if let Some(description) = &self.description {
            body.insert("description".into(), serde_json::json!(description));
        }
        if let Some(start) = self.start_date {
            body.insert("start".into(), api_time(start, false));
        }
        if let Some(end) = self.end_date {
            body.insert("end".into(), api_time(end, false));
        }
        if let Some(location) = &self.location {
            body.insert("location".into(), serde_json::json!(location));
        }
        if let Some(category) = self.category {
            body.insert("category".into(), serde_json::json!(category.as_str()));
        }
        serde_json::Value::Object(body)
    }
}

// API Response Types

/// Upstream event representation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEvent {
    pub id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<ApiEventTime>,
    pub end: Option<ApiEventTime>,
    #[serde(default)]
    pub attendees: Vec<ApiAttendee>,
    pub category: Option<String>,
    pub color: Option<String>,
    pub created: Option<String>,
    pub updated: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEventTime {
    pub date_time: Option<String>,
    pub date: Option<String>,
    pub time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAttendee {
    pub email: String,
    pub display_name: Option<String>,
    pub response_status: Option<String>,
    #[serde(default)]
    pub organizer: bool,
}

/// API response for event list.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListResponse {
    #[serde(default)]
    pub items: Vec<ApiEvent>,
    pub next_page_token: Option<String>,
}

fn parse_event_time(api: &ApiEventTime) -> Option<(DateTime<Utc>, bool)> {
    if let Some(dt) = parse_timestamp(api.date_time.as_deref()) {
        return Some((dt, false));
    }
    let date = NaiveDate::parse_from_str(api.date.as_deref()?, "%Y-%m-%d").ok()?;
    Some((DateRange::day(date).start, true))
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn api_time(at: DateTime<Utc>, all_day: bool) -> serde_json::Value {
    if all_day {
        serde_json::json!({ "date": at.format("%Y-%m-%d").to_string() })
    } else {
        serde_json::json!({ "dateTime": at.to_rfc3339() })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_event_from_api() {
        let json = r#"{
            "id": "event123",
            "summary": "Team Meeting",
            "description": "Weekly sync",
            "location": "Conference Room A",
            "start": {"dateTime": "2024-02-01T10:00:00Z"},
            "end": {"dateTime": "2024-02-01T11:00:00Z"},
            "category": "Meeting",
            "created": "2024-01-20T08:00:00Z",
            "attendees": [
                {"email": "a@example.com", "responseStatus": "accepted", "organizer": true}
            ]
        }"#;

        let api_event: ApiEvent = serde_json::from_str(json).unwrap();
        let event = CalendarEvent::from_api(api_event, now());

        assert_eq!(event.id, "event123");
        assert_eq!(event.title, "Team Meeting");
        assert_eq!(event.category, EventCategory::Meeting);
        assert_eq!(event.color, "#3b82f6");
        assert!(!event.is_all_day);
        assert_eq!(event.start_date, Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap());
        assert_eq!(event.created_at, Utc.with_ymd_and_hms(2024, 1, 20, 8, 0, 0).unwrap());
        assert_eq!(event.updated_at, now());
        assert_eq!(event.attendees[0].response_status, ResponseStatus::Accepted);
        assert!(event.attendees[0].is_organizer);
    }

    #[test]
    fn test_all_day_event() {
        let json = r##"{
            "id": "event456",
            "summary": "Holiday",
            "start": {"date": "2024-12-25"},
            "end": {"date": "2024-12-26"},
            "color": "#000000"
        }"##;

        let api_event: ApiEvent = serde_json::from_str(json).unwrap();
        let event = CalendarEvent::from_api(api_event, now());

        assert!(event.is_all_day);
        assert_eq!(event.color, "#000000");
        assert_eq!(event.category, EventCategory::Other);
        assert!(event.occurs_on(NaiveDate::from_ymd_opt(2024, 12, 25).unwrap()));
        assert!(!event.occurs_on(NaiveDate::from_ymd_opt(2024, 12, 26).unwrap()));
    }

    #[test]
    fn test_multi_day_event_occurs_on_each_day() {
        let api_event: ApiEvent = serde_json::from_str(
            r#"{"id": "trip", "start": {"dateTime": "2024-03-01T18:00:00Z"},
                "end": {"dateTime": "2024-03-03T09:00:00Z"}}"#,
        )
        .unwrap();
        let event = CalendarEvent::from_api(api_event, now());

        for day in 1..=3 {
            assert!(event.occurs_on(NaiveDate::from_ymd_opt(2024, 3, day).unwrap()));
        }
        assert!(!event.occurs_on(NaiveDate::from_ymd_opt(2024, 3, 4).unwrap()));
        assert_eq!(event.date_range().days(), 3);
    }

    #[test]
    fn test_new_event_body() {
        let start = Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap();
        let mut event = NewEvent::new("Standup", start, start + chrono::Duration::minutes(15));
        event.location = Some("Room 4".into());

        let body = event.to_api_body();
        assert_eq!(body["summary"], "Standup");
        assert_eq!(body["start"]["dateTime"], start.to_rfc3339());
        assert_eq!(body["location"], "Room 4");
        assert!(body.get("description").is_none());
    }

    #[test]
    fn test_update_body_only_contains_changes() {
        let update = EventUpdate {
            title: Some("Renamed".into()),
            ..Default::default()
        };
        assert_eq!(update.to_api_body(), serde_json::json!({"summary": "Renamed"}));
        assert!(!update.moves_event());
    }
}
