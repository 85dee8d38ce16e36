use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use lru::LruCache;

use crate::core::AggregateCollection;

/// Key-value response cache with TTL and pattern invalidation, shaped after
/// the Redis commands the API layer uses (`GET`, `SETEX`, `KEYS` + `DEL`).
pub trait ResponseCache {
    fn get(&self, key: &str) -> impl Future<Output = Option<String>> + Send;

    fn set(&self, key: &str, value: String, ttl: Duration) -> impl Future<Output = ()> + Send;

    /// Removes every key matching `pattern`. A trailing `*` matches any
    /// suffix; otherwise the key must match exactly. Returns the number of
    /// keys removed.
    fn invalidate(&self, pattern: &str) -> impl Future<Output = usize> + Send;
}

fn matches_pattern(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

/// In-process [`ResponseCache`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live (unexpired) entry count.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| entry.value().1 > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.value().1 > now {
                return Some(entry.value().0.clone());
            }
        }

        // Only drop the entry if it is still the expired one.
        self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        None
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires)| *expires > now);
        self.entries.insert(key.to_string(), (value, now + ttl));
    }

    async fn invalidate(&self, pattern: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| !matches_pattern(pattern, key));
        before - self.entries.len()
    }
}

/// Bounded least-recently-used store of finished query results, keyed by
/// filter identity (see [`crate::client::Filter::query_key`]).
pub struct ResultCache {
    inner: Mutex<LruCache<String, AggregateCollection>>,
}

impl ResultCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, AggregateCollection>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns a copy of the cached result and marks it most recently used.
    pub fn get(&self, key: &str) -> Option<AggregateCollection> {
        self.lock().get(key).cloned()
    }

    pub fn put(&self, key: impl Into<String>, collection: AggregateCollection) {
        self.lock().put(key.into(), collection);
    }

    pub fn remove(&self, key: &str) -> Option<AggregateCollection> {
        self.lock().pop(key)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
