//! request dispatch: control, metrics and fingerprint endpoints, and the
//! cache-or-forward path for everything else.

use crate::cache::{CacheEntry, CacheStore};
use crate::cache_key::derive_key;
use crate::events::{EventSender, ProxyEvent};
use crate::exchange::{Exchange, ProxyResponse};
use crate::fetcher::{OriginForwarder, CACHE_KEY_HEADER};
use crate::lock::RequestLock;
use crate::metrics::{MetricsObserver, DEFAULT_TOP_N};
use crate::util::Result;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{Request, StatusCode};
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::Arc;

pub const CONTROL_PATH: &str = "/__stasis/outbound";
pub const METRICS_PREFIX: &str = "/__stasis/metrics";
pub const FINGERPRINT_PATH: &str = "/__stasis/fingerprint";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Control,
    Metrics,
    Fingerprint,
    Proxy,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockCommand {
    enable_outbound_requests: Option<bool>,
}

pub struct Dispatcher {
    store: Arc<CacheStore>,
    lock: Arc<RequestLock>,
    metrics: Arc<MetricsObserver>,
    events: EventSender,
    forwarder: Arc<dyn OriginForwarder>,
    hostname: String,
    spki_fingerprint: String,
}

impl Dispatcher {
    pub fn new(
        store: Arc<CacheStore>,
        lock: Arc<RequestLock>,
        metrics: Arc<MetricsObserver>,
        events: EventSender,
        forwarder: Arc<dyn OriginForwarder>,
        hostname: impl Into<String>,
        spki_fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            store,
            lock,
            metrics,
            events,
            forwarder,
            hostname: hostname.into(),
            spki_fingerprint: spki_fingerprint.into(),
        }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn lock(&self) -> &RequestLock {
        &self.lock
    }

    pub fn metrics(&self) -> &MetricsObserver {
        &self.metrics
    }

    /// classifies a request; earlier routes win
    pub fn route(&self, exchange: &dyn Exchange) -> Route {
        let path = exchange.path();
        if path == CONTROL_PATH && exchange.host() == self.hostname {
            Route::Control
        } else if path.starts_with(METRICS_PREFIX) {
            Route::Metrics
        } else if path == FINGERPRINT_PATH && exchange.is_secure() {
            Route::Fingerprint
        } else {
            Route::Proxy
        }
    }

    pub async fn handle(&self, exchange: &dyn Exchange) -> ProxyResponse {
        match self.route(exchange) {
            Route::Control => self.handle_control(exchange),
            Route::Metrics => self.handle_metrics(exchange),
            Route::Fingerprint => ProxyResponse::json(
                StatusCode::OK,
                &serde_json::json!({ "spkiFingerprint": self.spki_fingerprint }),
            ),
            Route::Proxy => self.handle_proxy(exchange).await,
        }
    }

    /// a payload that does not carry the flag is acknowledged with 202 and ignored
    fn handle_control(&self, exchange: &dyn Exchange) -> ProxyResponse {
        let command = serde_json::from_slice::<LockCommand>(exchange.body())
            .ok()
            .and_then(|command| command.enable_outbound_requests);

        match command {
            Some(enabled) => {
                self.lock.set_status(enabled);
                ProxyResponse::empty(StatusCode::OK)
            }
            None => {
                info!("ignoring unrecognized lock command");
                ProxyResponse::empty(StatusCode::ACCEPTED)
            }
        }
    }

    fn handle_metrics(&self, exchange: &dyn Exchange) -> ProxyResponse {
        let top_n = top_n_from_query(exchange.query());
        ProxyResponse::json(StatusCode::OK, &self.metrics.report(&self.store, top_n))
    }

    async fn handle_proxy(&self, exchange: &dyn Exchange) -> ProxyResponse {
        let url = exchange.url();
        let key = derive_key(
            exchange.host(),
            exchange.path(),
            exchange.query(),
            exchange.headers(),
            exchange.body(),
        );

        self.events
            .emit(ProxyEvent::RequestReceived { key: key.clone() })
            .await;

        if let Some(entry) = self.store.read(&key).await {
            if entry.url != url {
                warn!(
                    "cache key {} was captured for {} but is serving {}",
                    key, entry.url, url
                );
            }
            debug!("cache hit for: {}", url);
            return ProxyResponse::from_entry(&entry);
        }

        self.events
            .emit(ProxyEvent::CacheMiss {
                method: exchange.method().clone(),
                url: url.clone(),
                key: key.clone(),
            })
            .await;

        if !self.lock.status() {
            debug!("outbound requests disabled, recording placeholder for: {}", url);
            self.store.write(&key, CacheEntry::placeholder(url)).await;
            return ProxyResponse::empty(StatusCode::NO_CONTENT);
        }

        let outcome = match build_origin_request(exchange, &url, &key) {
            Ok(outbound) => self.fetch_and_capture(outbound, &url).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(response) => response,
            Err(e) => {
                warn!("failed to fetch {} from origin: {}", url, e);
                ProxyResponse::empty(StatusCode::NOT_FOUND)
            }
        }
    }

    /// forwards the request and stores the reply under the key stamped on it
    async fn fetch_and_capture(&self, outbound: Request<Bytes>, url: &str) -> Result<ProxyResponse> {
        let stamped_key = outbound
            .headers()
            .get(CACHE_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let relayed = ProxyResponse::from_origin(self.forwarder.forward(outbound).await?);

        match stamped_key {
            Some(key) => {
                let entry = CacheEntry {
                    status: relayed.status,
                    headers: relayed.headers.clone(),
                    url: url.to_owned(),
                    data: relayed.body.clone(),
                };
                if self.store.write(&key, entry).await {
                    debug!("cached {} under {}", url, key);
                }
            }
            None => warn!("origin request for {} lost its cache key, not caching", url),
        }

        Ok(relayed)
    }
}

/// copies the inbound request onto its https origin and stamps the cache key
fn build_origin_request(exchange: &dyn Exchange, url: &str, key: &str) -> Result<Request<Bytes>> {
    let mut builder = Request::builder().method(exchange.method().clone()).uri(url);
    if let Some(headers) = builder.headers_mut() {
        for (name, value) in exchange.headers() {
            headers.append(name.clone(), value.clone());
        }
        headers.insert(
            HeaderName::from_static(CACHE_KEY_HEADER),
            HeaderValue::from_str(key)?,
        );
    }
    Ok(builder.body(exchange.body().clone())?)
}

fn top_n_from_query(query: Option<&str>) -> usize {
    query
        .and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(name, _)| name == "n")
                .and_then(|(_, value)| value.parse().ok())
        })
        .unwrap_or(DEFAULT_TOP_N)
}
