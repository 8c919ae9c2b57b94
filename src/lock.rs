use log::info;
use std::sync::atomic::{AtomicBool, Ordering};

/// gate deciding whether uncached requests may reach the origin.
///
/// a plain flag read at decision time. concurrent toggles race with readers
/// and the last write wins.
#[derive(Debug)]
pub struct RequestLock {
    outbound_allowed: AtomicBool,
}

impl RequestLock {
    pub fn new(outbound_allowed: bool) -> Self {
        Self {
            outbound_allowed: AtomicBool::new(outbound_allowed),
        }
    }

    pub fn set_status(&self, outbound_allowed: bool) {
        let previous = self.outbound_allowed.swap(outbound_allowed, Ordering::SeqCst);
        if previous != outbound_allowed {
            info!(
                "outbound requests {}",
                if outbound_allowed { "enabled" } else { "disabled" }
            );
        }
    }

    /// true while misses may be fetched from the origin
    pub fn status(&self) -> bool {
        self.outbound_allowed.load(Ordering::SeqCst)
    }
}

impl Default for RequestLock {
    fn default() -> Self {
        Self::new(true)
    }
}
