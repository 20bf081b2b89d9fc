//! Half-open UTC date ranges aligned to whole days.

use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CalendarError;

const KEY_PREFIX: &str = "calendar:events";

/// `[start, end)`, both at UTC midnight.
///
/// Construction rounds `start` down and `end` up to day boundaries so that
/// every request for the same days shares one cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// Day-aligned range covering `start..end`. An empty range covers the
    /// day `start` falls on.
    ///
    /// # Errors
    /// [`CalendarError::InvalidRange`] when `end` is before `start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, CalendarError> {
        if end < start {
            return Err(CalendarError::InvalidRange { start, end });
        }
        let first = start.date_naive();
        let mut last = end.date_naive();
        if end.time() == NaiveTime::MIN && last > first {
            last = last.pred_opt().unwrap_or(last);
        }
        Ok(Self::from_dates(first, last))
    }

    /// Range covering `first..=last`.
    pub fn from_dates(first: NaiveDate, last: NaiveDate) -> Self {
        let last = last.max(first);
        Self {
            start: midnight(first),
            end: midnight(last) + Duration::days(1),
        }
    }

    pub fn day(date: NaiveDate) -> Self {
        Self::from_dates(date, date)
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.start.date_naive()
    }

    pub fn last_day(&self) -> NaiveDate {
        (self.end - Duration::days(1)).date_naive()
    }

    pub fn cache_key(&self) -> String {
        format!("{}:{}:{}", KEY_PREFIX, self.first_day(), self.last_day())
    }

    /// Key of the long-lived copy served when a reload fails.
    pub fn stale_key(&self) -> String {
        format!("{}:stale:{}:{}", KEY_PREFIX, self.first_day(), self.last_day())
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Consecutive chunks of at most `max_days` days covering the range.
    pub fn split(&self, max_days: u32) -> Vec<DateRange> {
        let step = Duration::days(i64::from(max_days.max(1)));
        let mut chunks = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let end = (cursor + step).min(self.end);
            chunks.push(DateRange { start: cursor, end });
            cursor = end;
        }
        chunks
    }

    /// The `days` days immediately before this range.
    pub fn before(&self, days: u32) -> DateRange {
        DateRange {
            start: self.start - Duration::days(i64::from(days.max(1))),
            end: self.start,
        }
    }

    /// The `days` days immediately after this range.
    pub fn after(&self, days: u32) -> DateRange {
        DateRange {
            start: self.end,
            end: self.end + Duration::days(i64::from(days.max(1))),
        }
    }

    /// Group dates into ranges of consecutive days. Duplicates and order are
    /// ignored.
    pub fn group_dates(dates: &[NaiveDate]) -> Vec<DateRange> {
        let mut sorted = dates.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut groups = Vec::new();
        let mut iter = sorted.into_iter();
        let Some(mut first) = iter.next() else {
            return groups;
        };
        let mut last = first;
        for date in iter {
            if (date - last).num_days() <= 1 {
                last = date;
            } else {
                groups.push(Self::from_dates(first, last));
                first = date;
                last = date;
            }
        }
        groups.push(Self::from_dates(first, last));
        groups
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.first_day(), self.last_day())
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}
