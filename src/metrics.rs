//! request/miss accounting fed by the event channel.

use crate::cache::CacheStore;
use crate::events::{EventReceiver, ProxyEvent};
use log::debug;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use url::Url;

pub const DEFAULT_TOP_N: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissCount {
    pub url: String,
    pub misses: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsReport {
    pub total_requests: u64,
    pub keys: u64,
    pub hits: u64,
    pub misses: u64,
    pub top_miss_counts: Vec<MissCount>,
}

#[derive(Debug, Default)]
pub struct MetricsObserver {
    total_requests: AtomicU64,
    miss_tally: Mutex<HashMap<String, u64>>,
}

impl MetricsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// consumes events until every sender is gone
    pub fn spawn(self: Arc<Self>, mut events: EventReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.observe(&event);
            }
            debug!("event channel closed, metrics observer stopping");
        })
    }

    pub fn observe(&self, event: &ProxyEvent) {
        match event {
            ProxyEvent::RequestReceived { .. } => {
                self.total_requests.fetch_add(1, Ordering::Relaxed);
            }
            ProxyEvent::CacheMiss { method, url, key } => {
                debug!("cache miss: {} {} ({})", method, url, key);
                let mut tally = self
                    .miss_tally
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                *tally.entry(base_url(url)).or_insert(0) += 1;
            }
            ProxyEvent::CacheHit { key } => debug!("cache hit: {}", key),
            ProxyEvent::CacheWrite { key } => debug!("cache write: {}", key),
        }
    }

    /// merges store stats with the miss tally, most-missed first
    pub fn report(&self, store: &CacheStore, top_n: usize) -> MetricsReport {
        let stats = store.stats();

        let mut top_miss_counts: Vec<MissCount> = self
            .miss_tally
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(url, misses)| MissCount {
                url: url.clone(),
                misses: *misses,
            })
            .collect();
        top_miss_counts.sort_by(|a, b| b.misses.cmp(&a.misses).then_with(|| a.url.cmp(&b.url)));
        top_miss_counts.truncate(top_n);

        MetricsReport {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            keys: stats.count,
            hits: stats.hits,
            misses: stats.misses,
            top_miss_counts,
        }
    }
}

/// scheme, host and path of `url`; query and fragment dropped
pub fn base_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.split(|c: char| c == '?' || c == '#').next().unwrap_or(url).to_owned(),
    }
}
