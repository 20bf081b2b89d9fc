//! Date-range cache in front of an [`EventSource`].
//!
//! A request for a range is answered from cache when possible. Misses go
//! through a per-range debouncer and then a single-flight load, so a burst of
//! identical requests costs one upstream call. Every successful load is stored
//! twice: under the primary key with the configured TTL and under a stale key
//! that lives three times as long and is served when a later reload fails.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::instrument;
use weir_core::cache::{get_json, set_json, CacheService, SetOptions};
use weir_core::config::CalendarConfig;
use weir_core::metrics::{MetricUnit, MetricsSink};

use crate::debounce::Debouncer;
use crate::error::CalendarError;
use crate::range::DateRange;
use crate::source::EventSource;
use crate::types::{CalendarEvent, EventUpdate, NewEvent};

/// Tag carried by every calendar cache entry.
pub const CACHE_TAG: &str = "calendar";

type LoadResult = Result<Vec<CalendarEvent>, CalendarError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CalendarCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Failed loads answered from the stale copy.
    pub stale_hits: u64,
    pub network_fetches: u64,
    /// Not-found responses cached as an empty list.
    pub negative_cached: u64,
    pub prefetches: u64,
    /// Loads currently in flight.
    pub in_flight: usize,
    /// Ranges this manager has written to the cache and not invalidated.
    pub cached_ranges: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale_hits: AtomicU64,
    network_fetches: AtomicU64,
    negative_cached: AtomicU64,
    prefetches: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct Inner {
    config: CalendarConfig,
    cache: Arc<dyn CacheService>,
    source: Arc<dyn EventSource>,
    metrics: Arc<dyn MetricsSink>,
    pending: Mutex<HashMap<String, SharedLoad>>,
    cached: Mutex<HashMap<String, DateRange>>,
    debouncer: Debouncer<String, LoadResult>,
    counters: Counters,
}

#[derive(Clone)]
pub struct CalendarCacheManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CalendarCacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalendarCacheManager")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl CalendarCacheManager {
    pub fn new(
        config: CalendarConfig,
        cache: Arc<dyn CacheService>,
        source: Arc<dyn EventSource>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let debouncer = Debouncer::new(config.debounce());
        Self {
            inner: Arc::new(Inner {
                config,
                cache,
                source,
                metrics,
                pending: Mutex::new(HashMap::new()),
                cached: Mutex::new(HashMap::new()),
                debouncer,
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &CalendarConfig {
        &self.inner.config
    }

    /// Events overlapping the days from `start` to `end`.
    ///
    /// Served from cache when fresh. Otherwise the request waits out the
    /// debounce window and joins any identical load already in flight. When the
    /// load fails, the stale copy of the range is returned if one exists.
    ///
    /// # Errors
    /// [`CalendarError::InvalidRange`] for reversed bounds, or the load error
    /// when no stale copy is available.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_events_for_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let range = DateRange::new(start, end)?;
        self.get_events(range).await
    }

    /// [`get_events_for_date_range`](Self::get_events_for_date_range) for an
    /// already aligned range.
    ///
    /// # Errors
    /// The load error when no stale copy is available.
    pub async fn get_events(&self, range: DateRange) -> Result<Vec<CalendarEvent>, CalendarError> {
        let inner = &self.inner;
        let key = range.cache_key();
        let started = Instant::now();

        if let Some(events) = get_json::<Vec<CalendarEvent>>(inner.cache.as_ref(), &key).await {
            Counters::bump(&inner.counters.hits);
            inner.record(MetricName::Hit, 1.0, MetricUnit::Count, &key);
            inner.record(MetricName::LoadDuration, 0.0, MetricUnit::Milliseconds, &key);
            return Ok(events);
        }
        Counters::bump(&inner.counters.misses);
        inner.record(MetricName::Miss, 1.0, MetricUnit::Count, &key);
        // Expired or evicted; re-added if the load below stores it again.
        inner.cached.lock().remove(&key);

        let job_inner = Arc::clone(inner);
        let result = inner
            .debouncer
            .call(key.clone(), move || async move {
                Inner::load(&job_inner, range, true).await
            })
            .await
            .unwrap_or(Err(CalendarError::Cancelled));

        inner.record(
            MetricName::LoadDuration,
            started.elapsed().as_secs_f64() * 1000.0,
            MetricUnit::Milliseconds,
            &key,
        );

        match result {
            Ok(events) => Ok(events),
            Err(error) => {
                let stale = get_json::<Vec<CalendarEvent>>(inner.cache.as_ref(), &range.stale_key()).await;
                match stale {
                    Some(events) => {
                        tracing::warn!("Serving stale events for {} after load failure: {}", range, error);
                        Counters::bump(&inner.counters.stale_hits);
                        Ok(events)
                    }
                    None => Err(error),
                }
            }
        }
    }

    /// Load several days at once.
    ///
    /// Consecutive dates are loaded as one range; the result maps every
    /// requested date to the events occurring on it.
    ///
    /// # Errors
    /// The first error from any range that could not be loaded.
    #[instrument(skip(self, dates), fields(dates = dates.len()), level = "debug")]
    pub async fn batch_load_dates(
        &self,
        dates: &[NaiveDate],
    ) -> Result<HashMap<NaiveDate, Vec<CalendarEvent>>, CalendarError> {
        let ranges = DateRange::group_dates(dates);
        let loaded = join_all(ranges.into_iter().map(|range| self.get_events(range))).await;

        let mut events = Vec::new();
        let mut seen = HashSet::new();
        for result in loaded {
            events.extend(result?.into_iter().filter(|event| seen.insert(event.id.clone())));
        }

        Ok(dates
            .iter()
            .map(|&date| {
                let on_date = events
                    .iter()
                    .filter(|event| event.occurs_on(date))
                    .cloned()
                    .collect();
                (date, on_date)
            })
            .collect())
    }

    /// Drop cached events for `range`, or for every range when `None`.
    ///
    /// # Errors
    /// [`CalendarError::Cache`] when the cache rejects the removal.
    pub async fn invalidate_cache(&self, range: Option<&DateRange>) -> Result<(), CalendarError> {
        let cache = self.inner.cache.as_ref();
        match range {
            Some(range) => {
                self.inner.cached.lock().remove(&range.cache_key());
                cache.delete(&range.cache_key()).await.map_err(cache_error)?;
                cache.delete(&range.stale_key()).await.map_err(cache_error)?;
                tracing::debug!("Invalidated calendar cache for {}", range);
            }
            None => {
                self.inner.cached.lock().clear();
                let removed = cache.invalidate(&[CACHE_TAG]).await.map_err(cache_error)?;
                tracing::debug!("Invalidated {} calendar cache entries", removed);
            }
        }
        Ok(())
    }

    /// Drop every cached range that overlaps `range`. Returns how many were
    /// dropped.
    ///
    /// # Errors
    /// [`CalendarError::Cache`] when the cache rejects a removal.
    pub async fn invalidate_overlapping(&self, range: &DateRange) -> Result<usize, CalendarError> {
        let affected: Vec<DateRange> = self
            .inner
            .cached
            .lock()
            .values()
            .filter(|cached| cached.overlaps(range))
            .copied()
            .collect();

        for cached in &affected {
            self.invalidate_cache(Some(cached)).await?;
        }
        Ok(affected.len())
    }

    /// Create an event upstream and drop cached ranges covering its days.
    ///
    /// # Errors
    /// The upstream error, or a cache error from invalidation.
    #[instrument(skip(self, event), fields(title = %event.title), level = "info")]
    pub async fn create_event(&self, event: &NewEvent) -> Result<CalendarEvent, CalendarError> {
        let created = self.inner.source.create_event(event).await?;
        self.invalidate_overlapping(&created.date_range()).await?;
        Ok(created)
    }

    /// Update an event upstream.
    ///
    /// The previous dates of the event are unknown here, so an update that
    /// moves the event clears the whole calendar cache.
    ///
    /// # Errors
    /// The upstream error, or a cache error from invalidation.
    #[instrument(skip(self, update), level = "info")]
    pub async fn update_event(&self, id: &str, update: &EventUpdate) -> Result<CalendarEvent, CalendarError> {
        let updated = self.inner.source.update_event(id, update).await?;
        if update.moves_event() {
            self.invalidate_cache(None).await?;
        } else {
            self.invalidate_overlapping(&updated.date_range()).await?;
        }
        Ok(updated)
    }

    /// Delete an event upstream.
    ///
    /// Pass the event's days as `range` to keep the rest of the cache.
    ///
    /// # Errors
    /// The upstream error, or a cache error from invalidation.
    #[instrument(skip(self, range), level = "info")]
    pub async fn delete_event(&self, id: &str, range: Option<&DateRange>) -> Result<(), CalendarError> {
        self.inner.source.delete_event(id).await?;
        match range {
            Some(range) => {
                self.invalidate_overlapping(range).await?;
            }
            None => self.invalidate_cache(None).await?,
        }
        Ok(())
    }

    pub fn stats(&self) -> CalendarCacheStats {
        let counters = &self.inner.counters;
        CalendarCacheStats {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            stale_hits: counters.stale_hits.load(Ordering::Relaxed),
            network_fetches: counters.network_fetches.load(Ordering::Relaxed),
            negative_cached: counters.negative_cached.load(Ordering::Relaxed),
            prefetches: counters.prefetches.load(Ordering::Relaxed),
            in_flight: self.inner.pending.lock().len(),
            cached_ranges: self.inner.cached.lock().len(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum MetricName {
    Hit,
    Miss,
    LoadDuration,
}

impl MetricName {
    fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "calendar_cache_hit",
            Self::Miss => "calendar_cache_miss",
            Self::LoadDuration => "calendar_load_duration",
        }
    }
}

impl Inner {
    /// Widest range fetched in one request. Zero is treated as one day.
    fn max_chunk_days(&self) -> u32 {
        self.config.max_date_range_days.max(1)
    }

    fn record(&self, name: MetricName, value: f64, unit: MetricUnit, key: &str) {
        self.metrics.record_metric(name.as_str(), value, unit, &[("cache_key", key)]);
    }

    /// Join the in-flight load for `range`, or start one.
    fn load(inner: &Arc<Inner>, range: DateRange, prefetch: bool) -> SharedLoad {
        let key = range.cache_key();
        let mut pending = inner.pending.lock();
        if let Some(existing) = pending.get(&key) {
            tracing::debug!("Joining in-flight load for {}", range);
            return existing.clone();
        }

        let task = tokio::spawn(Inner::fetch_and_store(Arc::clone(inner), range, prefetch));
        let shared = task
            .map(|joined| joined.unwrap_or(Err(CalendarError::Cancelled)))
            .boxed()
            .shared();
        pending.insert(key, shared.clone());
        shared
    }

    async fn fetch_and_store(inner: Arc<Inner>, range: DateRange, prefetch: bool) -> LoadResult {
        let _pending = PendingGuard {
            inner: Arc::clone(&inner),
            key: range.cache_key(),
        };

        let events = if range.days() > i64::from(inner.max_chunk_days()) {
            inner.fetch_chunked(&inner, range).await?
        } else {
            inner.fetch_range(range).await?
        };

        if prefetch && inner.config.enable_prefetch && !events.is_empty() {
            Inner::prefetch_adjacent(&inner, range);
        }
        Ok(events)
    }

    /// One upstream request for `range`, cached on success.
    async fn fetch_range(&self, range: DateRange) -> LoadResult {
        Counters::bump(&self.counters.network_fetches);
        match self.source.fetch_events(&range).await {
            Ok(events) => {
                self.store(range, &events).await;
                Ok(events)
            }
            Err(error) if error.is_not_found() => {
                tracing::debug!("No events upstream for {}, caching empty result", range);
                Counters::bump(&self.counters.negative_cached);
                self.store_primary(range, &[]).await;
                Ok(Vec::new())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Sequential per-chunk loads. Failed chunks are left out of the result;
    /// the aggregate is only cached when every chunk loaded.
    async fn fetch_chunked(&self, inner: &Arc<Inner>, range: DateRange) -> LoadResult {
        let chunks = range.split(self.max_chunk_days());
        tracing::debug!("Loading {} in {} chunks", range, chunks.len());

        let mut events = Vec::new();
        let mut seen = HashSet::new();
        let mut last_error = None;
        let mut failed = 0;

        for chunk in &chunks {
            let loaded = match get_json::<Vec<CalendarEvent>>(self.cache.as_ref(), &chunk.cache_key()).await {
                Some(cached) => Ok(cached),
                None => Inner::load(inner, *chunk, false).await,
            };
            match loaded {
                Ok(chunk_events) => {
                    for event in chunk_events {
                        if seen.insert(event.id.clone()) {
                            events.push(event);
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!("Skipping chunk {} of {}: {}", chunk, range, error);
                    failed += 1;
                    last_error = Some(error);
                }
            }
        }

        if failed == chunks.len() {
            if let Some(error) = last_error {
                return Err(error);
            }
        }

        events.sort_by_key(|event| event.start_date);
        if failed == 0 {
            self.store(range, &events).await;
        }
        Ok(events)
    }

    fn prefetch_adjacent(inner: &Arc<Inner>, range: DateRange) {
        let days = inner.config.prefetch_buffer_days;
        let adjacent = [range.before(days), range.after(days)];
        let inner = Arc::clone(inner);

        tokio::spawn(async move {
            for neighbour in adjacent {
                let key = neighbour.cache_key();
                let in_flight = inner.pending.lock().contains_key(&key);
                if in_flight || inner.cache.get(&key).await.is_some() {
                    continue;
                }
                Counters::bump(&inner.counters.prefetches);
                if let Err(error) = Inner::load(&inner, neighbour, false).await {
                    tracing::debug!("Prefetch of {} failed: {}", neighbour, error);
                }
            }
        });
    }

    async fn store(&self, range: DateRange, events: &[CalendarEvent]) {
        self.store_primary(range, events).await;
        let stale = SetOptions::with_ttl(self.config.stale_ttl()).tag(CACHE_TAG);
        if let Err(e) = set_json(self.cache.as_ref(), &range.stale_key(), events, stale).await {
            tracing::warn!("Failed to cache stale copy of {}: {}", range, e);
        }
    }

    async fn store_primary(&self, range: DateRange, events: &[CalendarEvent]) {
        let key = range.cache_key();
        let options = SetOptions::with_ttl(self.config.cache_ttl()).tag(CACHE_TAG);
        match set_json(self.cache.as_ref(), &key, events, options).await {
            Ok(()) => {
                self.cached.lock().insert(key, range);
            }
            Err(e) => tracing::warn!("Failed to cache events for {}: {}", range, e),
        }
    }
}

/// Removes the pending entry for a load when the load task ends, including
/// when it panics.
struct PendingGuard {
    inner: Arc<Inner>,
    key: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.key);
    }
}

fn cache_error(error: weir_core::cache::CacheError) -> CalendarError {
    CalendarError::Cache(error.to_string())
}
