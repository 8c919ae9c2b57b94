use crate::events::{EventSender, ProxyEvent};
use crate::util::Result;
use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt};
use http::{HeaderMap, StatusCode};
use log::{debug, warn};
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// captured response: status code, headers, originating url and body
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub url: String,
    pub data: Bytes,
}

impl CacheEntry {
    /// stand-in recorded when a miss happens while outbound requests are disabled
    pub fn placeholder(url: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            headers: HeaderMap::new(),
            url: url.into(),
            data: Bytes::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub count: u64,
    pub hits: u64,
    pub misses: u64,
}

/// storage behind the cache store. implementations must refuse to replace
/// an existing key.
pub trait CacheBackend: Send + Sync {
    fn contains<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Arc<CacheEntry>>>>;

    /// stores `entry` unless `key` is taken; returns whether it was stored
    fn insert_if_absent<'a>(&'a self, key: &'a str, entry: CacheEntry)
        -> BoxFuture<'a, Result<bool>>;

    /// number of stored keys
    fn len(&self) -> u64;
}

/// unbounded in-memory backend
pub struct MemoryBackend {
    cache: Cache<String, Arc<CacheEntry>>,
    count: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        // no capacity or ttl: entries live until the process exits
        Self {
            cache: Cache::builder().build(),
            count: AtomicU64::new(0),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheBackend for MemoryBackend {
    fn contains<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        let found = self.cache.contains_key(key);
        async move { Ok(found) }.boxed()
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Arc<CacheEntry>>>> {
        async move { Ok(self.cache.get(key).await) }.boxed()
    }

    fn insert_if_absent<'a>(
        &'a self,
        key: &'a str,
        entry: CacheEntry,
    ) -> BoxFuture<'a, Result<bool>> {
        async move {
            let slot = self
                .cache
                .entry(key.to_owned())
                .or_insert_with(async move { Arc::new(entry) })
                .await;
            if slot.is_fresh() {
                self.count.fetch_add(1, Ordering::Relaxed);
            }
            Ok(slot.is_fresh())
        }
        .boxed()
    }

    fn len(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// write-once response store with hit/miss accounting
pub struct CacheStore {
    backend: Box<dyn CacheBackend>,
    hits: AtomicU64,
    misses: AtomicU64,
    events: EventSender,
}

impl CacheStore {
    pub fn new(backend: Box<dyn CacheBackend>, events: EventSender) -> Self {
        Self {
            backend,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            events,
        }
    }

    pub async fn contains(&self, key: &str) -> bool {
        match self.backend.contains(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!("cache lookup failed for {}: {}", key, e);
                false
            }
        }
    }

    /// retrieves an entry, counting the hit or miss
    pub async fn read(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let found = match self.backend.get(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!("cache read failed for {}: {}", key, e);
                None
            }
        };

        match found {
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.events
                    .emit(ProxyEvent::CacheHit {
                        key: key.to_owned(),
                    })
                    .await;
                Some(entry)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// stores an entry unless the key already has one
    pub async fn write(&self, key: &str, entry: CacheEntry) -> bool {
        match self.backend.insert_if_absent(key, entry).await {
            Ok(true) => {
                self.events
                    .emit(ProxyEvent::CacheWrite {
                        key: key.to_owned(),
                    })
                    .await;
                true
            }
            Ok(false) => {
                debug!("not overwriting existing entry for: {}", key);
                false
            }
            Err(e) => {
                warn!("failed to cache {}, continuing without it: {}", key, e);
                false
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            count: self.backend.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
