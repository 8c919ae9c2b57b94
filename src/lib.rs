//! stasis - a caching, tls-intercepting reverse proxy for deterministic
//! performance test runs
//!
//! provides:
//! - write-once response cache keyed on host, path and headers or body
//! - an outbound gate that switches the proxy into replay-only mode
//! - a per-process self-signed ca for http/2 capable tls termination
//! - hit/miss metrics over an event channel
//!

pub mod ca;
pub mod cache;
pub mod cache_key;
pub mod config;
pub mod disk_cache;
pub mod events;
pub mod exchange;
pub mod fetcher;
pub mod lock;
pub mod metrics;
pub mod proxy;
pub mod server;
pub mod tls;
pub mod util;
