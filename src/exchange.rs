//! the request/response surface the dispatcher works against.
//!
//! the dispatcher only needs to read a request's method, target, headers and
//! buffered body, and to hand back a status, headers and body. `Exchange` is
//! that read side, implemented once per transport: actix-web requests (which
//! already cover http/1.1, h2c and h2 over tls) and plain `http::Request`s.
//! `ProxyResponse` is the write side.

use crate::cache::CacheEntry;
use actix_web::{HttpRequest, HttpResponse};
use bytes::Bytes;
use http::header::{self, HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use log::error;
use serde::Serialize;

pub trait Exchange {
    fn method(&self) -> &Method;
    fn uri(&self) -> &Uri;
    fn headers(&self) -> &HeaderMap;
    fn body(&self) -> &Bytes;
    /// true when the request arrived over the tls listener
    fn is_secure(&self) -> bool;

    /// host header, falling back to the uri authority (h2 `:authority`)
    fn host(&self) -> &str {
        self.headers()
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| self.uri().authority().map(|authority| authority.as_str()))
            .unwrap_or("")
    }

    fn path(&self) -> &str {
        self.uri().path()
    }

    fn query(&self) -> Option<&str> {
        self.uri().query()
    }

    fn path_and_query(&self) -> &str {
        self.uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
    }

    /// origin url; both listeners relay to https origins
    fn url(&self) -> String {
        format!("https://{}{}", self.host(), self.path_and_query())
    }
}

/// an actix-web request with its drained payload
pub struct ActixExchange<'a> {
    req: &'a HttpRequest,
    headers: HeaderMap,
    body: Bytes,
}

impl<'a> ActixExchange<'a> {
    pub fn new(req: &'a HttpRequest, body: Bytes) -> Self {
        let mut headers = HeaderMap::with_capacity(req.headers().len());
        for (name, value) in req.headers().iter() {
            headers.append(name.clone(), value.clone());
        }
        Self { req, headers, body }
    }
}

impl Exchange for ActixExchange<'_> {
    fn method(&self) -> &Method {
        self.req.method()
    }

    fn uri(&self) -> &Uri {
        self.req.uri()
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn body(&self) -> &Bytes {
        &self.body
    }

    fn is_secure(&self) -> bool {
        self.req.app_config().secure()
    }
}

impl Exchange for Request<Bytes> {
    fn method(&self) -> &Method {
        Request::method(self)
    }

    fn uri(&self) -> &Uri {
        Request::uri(self)
    }

    fn headers(&self) -> &HeaderMap {
        Request::headers(self)
    }

    fn body(&self) -> &Bytes {
        Request::body(self)
    }

    fn is_secure(&self) -> bool {
        Request::uri(self).scheme_str() == Some("https")
    }
}

/// transport-neutral response produced by the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyResponse {
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => {
                let mut headers = HeaderMap::new();
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                Self {
                    status,
                    headers,
                    body: Bytes::from(body),
                }
            }
            Err(e) => {
                error!("failed to serialize response body: {}", e);
                Self::empty(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// replays a cached entry verbatim
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            status: entry.status,
            headers: entry.headers.clone(),
            body: entry.data.clone(),
        }
    }

    pub fn from_origin(response: Response<Bytes>) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            headers: parts.headers,
            body,
        }
    }

    #[cfg(test)]
    pub(crate) fn json_body(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

impl From<ProxyResponse> for HttpResponse {
    fn from(response: ProxyResponse) -> Self {
        let mut builder = HttpResponse::build(response.status);
        for (name, value) in response.headers.iter() {
            // actix writes its own framing headers
            if is_hop_by_hop(name) || *name == header::CONTENT_LENGTH {
                continue;
            }
            builder.append_header((name.clone(), value.clone()));
        }
        builder.body(response.body)
    }
}

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// headers that describe a single connection and never travel past a proxy
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name)
        || name.as_str() == "keep-alive"
        || name.as_str() == "proxy-connection"
}
