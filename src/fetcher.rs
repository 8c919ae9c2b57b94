use crate::exchange::is_hop_by_hop;
use crate::util::Result;
use bytes::Bytes;
use futures_util::future::{BoxFuture, FutureExt};
use http::{Request, Response};
use hyper::client::HttpConnector;
use hyper::{body::to_bytes, Body, Client as HyperClient};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use log::debug;
use std::sync::Arc;

/// internal header carrying the cache key from the miss path to the capture stage
pub const CACHE_KEY_HEADER: &str = "ll-cache-key";

/// sends a fully buffered request to its origin and buffers the reply
pub trait OriginForwarder: Send + Sync {
    fn forward(&self, req: Request<Bytes>) -> BoxFuture<'_, Result<Response<Bytes>>>;
}

#[derive(Clone)]
pub struct OriginFetcher {
    client: Arc<HyperClient<HttpsConnector<HttpConnector>>>,
}

impl OriginFetcher {
    pub fn new() -> Self {
        // create a new HTTPS connector with native-trust roots for TLS
        let https = HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();

        Self {
            client: Arc::new(HyperClient::builder().build(https)),
        }
    }

    async fn fetch_from_origin(&self, req: Request<Bytes>) -> Result<Response<Bytes>> {
        let req = into_wire_request(req);
        debug!("fetching from origin: {} {}", req.method(), req.uri());

        let origin_response = self.client.request(req).await?;

        let (parts, body) = origin_response.into_parts();
        let body_bytes = to_bytes(body).await?;

        Ok(Response::from_parts(parts, body_bytes))
    }
}

impl Default for OriginFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl OriginForwarder for OriginFetcher {
    fn forward(&self, req: Request<Bytes>) -> BoxFuture<'_, Result<Response<Bytes>>> {
        self.fetch_from_origin(req).boxed()
    }
}

/// drops headers that must not reach the origin: the internal cache key,
/// hop-by-hop headers and host (hyper sets it from the uri).
fn into_wire_request(req: Request<Bytes>) -> Request<Body> {
    let (mut parts, body) = req.into_parts();

    let dropped: Vec<_> = parts
        .headers
        .keys()
        .filter(|name| {
            **name == http::header::HOST
                || name.as_str() == CACHE_KEY_HEADER
                || is_hop_by_hop(name)
        })
        .cloned()
        .collect();
    for name in dropped {
        parts.headers.remove(name);
    }

    Request::from_parts(parts, Body::from(body))
}
