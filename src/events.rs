//! notifications flowing from the dispatcher and cache store to the metrics observer

use http::Method;
use log::debug;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyEvent {
    /// a proxyable request arrived and its key was computed
    RequestReceived { key: String },
    /// the store had nothing under `key` for this request
    CacheMiss { method: Method, url: String, key: String },
    CacheHit { key: String },
    CacheWrite { key: String },
}

pub type EventReceiver = mpsc::Receiver<ProxyEvent>;

/// sending half handed to every producer
#[derive(Clone, Debug)]
pub struct EventSender {
    tx: mpsc::Sender<ProxyEvent>,
}

impl EventSender {
    /// waits for channel capacity rather than dropping the event
    pub async fn emit(&self, event: ProxyEvent) {
        if let Err(e) = self.tx.send(event).await {
            debug!("no event subscriber, dropping {:?}", e.0);
        }
    }
}

/// creates a bounded event channel
pub fn channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { tx }, rx)
}
