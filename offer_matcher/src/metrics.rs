use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Live gauges exposed by a running offer matcher.
///
/// Cheap to clone, safe to read from any thread, no lock contention with
/// the processor's own mailbox loop.
#[derive(Clone, Default)]
pub struct OfferMatcherMetrics {
    launch_tokens: Arc<AtomicI64>,
    current_offers: Arc<AtomicI64>,
}

impl OfferMatcherMetrics {
    pub fn launch_tokens(&self) -> i64 {
        self.launch_tokens.load(Ordering::Relaxed)
    }

    pub fn current_offers(&self) -> i64 {
        self.current_offers.load(Ordering::Relaxed)
    }

    pub(crate) fn set_launch_tokens(&self, value: i64) {
        self.launch_tokens.store(value, Ordering::Relaxed);
    }

    pub(crate) fn incr_current_offers(&self) {
        self.current_offers.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn decr_current_offers(&self) {
        self.current_offers.fetch_sub(1, Ordering::Relaxed);
    }
}
