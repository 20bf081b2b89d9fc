pub mod debounce;
pub mod error;
pub mod manager;
pub mod range;
pub mod source;
pub mod types;

pub use debounce::{DebounceCancelled, Debouncer};
pub use error::CalendarError;
pub use manager::{CalendarCacheManager, CalendarCacheStats, CACHE_TAG};
pub use range::DateRange;
pub use source::{ApiEventSource, EventSource};
pub use types::{Attendee, CalendarEvent, EventCategory, EventUpdate, NewEvent, ResponseStatus};
