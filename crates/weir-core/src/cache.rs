//! Key-value cache service interface and an in-memory implementation.
//!
//! Values are stored as JSON so one cache can hold tokens, event lists and
//! anything else serde can handle. Entries carry an optional TTL and a set of
//! tags that can be invalidated together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// Eviction priority hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum CachePriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Options for [`CacheService::set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// `None` keeps the entry until deleted or invalidated.
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    /// Hint that the entry should survive restarts when the backend supports it.
    pub persistent: bool,
    pub priority: CachePriority,
}

impl SetOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn priority(mut self, priority: CachePriority) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub expired: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Key-value cache with TTL and tag invalidation.
///
/// Implementations must make a single `get` or `set` atomic per key.
#[async_trait]
pub trait CacheService: Send + Sync + std::fmt::Debug {
    /// Look up `key`. Missing, expired and unreadable entries are all `None`.
    async fn get(&self, key: &str) -> Option<serde_json::Value>;

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        options: SetOptions,
    ) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Remove every entry carrying at least one of `tags`. Returns how many were removed.
    async fn invalidate(&self, tags: &[&str]) -> Result<usize, CacheError>;

    fn stats(&self) -> CacheStats;
}

/// Typed read. Entries that do not deserialize as `T` are treated as missing.
pub async fn get_json<T: DeserializeOwned>(cache: &dyn CacheService, key: &str) -> Option<T> {
    let value = cache.get(key).await?;
    match serde_json::from_value(value) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Discarding unreadable cache entry {}: {}", key, e);
            None
        }
    }
}

/// Typed write.
///
/// # Errors
/// Fails when `value` cannot be serialized or the backend rejects the write.
pub async fn set_json<T: Serialize + ?Sized>(
    cache: &dyn CacheService,
    key: &str,
    value: &T,
    options: SetOptions,
) -> Result<(), CacheError> {
    let value = serde_json::to_value(value)?;
    cache.set(key, value, options).await
}

#[derive(Debug)]
struct Entry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
    tags: Vec<String>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Process-local cache. Expiry is measured with tokio time, so tests running on
/// a paused runtime can expire entries by advancing the clock.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    expired: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        self.expired.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }
}

#[async_trait]
impl CacheService for MemoryCache {
    async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                self.expired.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        options: SetOptions,
    ) -> Result<(), CacheError> {
        let entry = Entry {
            value,
            expires_at: options.ttl.map(|ttl| Instant::now() + ttl),
            tags: options.tags,
        };
        self.entries.lock().insert(key.to_string(), entry);
        self.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn invalidate(&self, tags: &[&str]) -> Result<usize, CacheError> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.tags.iter().any(|t| tags.contains(&t.as_str())));
        let removed = before - entries.len();
        tracing::debug!("Invalidated {} cache entries for tags {:?}", removed, tags);
        Ok(removed)
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.lock().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let cache = MemoryCache::new();
        let sample = Sample { name: "a".into(), count: 2 };

        set_json(&cache, "sample", &sample, SetOptions::default()).await.unwrap();
        let loaded: Option<Sample> = get_json(&cache, "sample").await;

        assert_eq!(loaded, Some(sample));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_wrong_shape_is_a_miss() {
        let cache = MemoryCache::new();
        cache.set("k", serde_json::json!("text"), SetOptions::default()).await.unwrap();

        let loaded: Option<Sample> = get_json(&cache, "k").await;
        assert!(loaded.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = MemoryCache::new();
        cache
            .set("k", serde_json::json!(1), SetOptions::with_ttl(Duration::from_secs(60)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get("k").await.is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.stats().expired, 1);
    }

    #[tokio::test]
    async fn test_invalidate_by_tag() {
        let cache = MemoryCache::new();
        let calendar = SetOptions::default().tag("calendar");
        cache.set("a", serde_json::json!(1), calendar.clone()).await.unwrap();
        cache.set("b", serde_json::json!(2), calendar).await.unwrap();
        cache.set("c", serde_json::json!(3), SetOptions::default().tag("auth")).await.unwrap();

        let removed = cache.invalidate(&["calendar"]).await.unwrap();

        assert_eq!(removed, 2);
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("c").await.is_some());
    }

    #[tokio::test]
    async fn test_delete() {
        let cache = MemoryCache::new();
        cache.set("k", serde_json::json!(1), SetOptions::default()).await.unwrap();
        cache.delete("k").await.unwrap();
        assert!(!cache.contains_key("k"));
    }
}
