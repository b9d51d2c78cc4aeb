//! Data model for offers and the launch ops matchers propose against them.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Unique identifier for an offer, opaque to this crate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OfferId(pub String);

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OfferId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// App identifier decoded out of a persistent disk reservation's `persistenceId`.
pub type AppId = String;

/// A persistent disk reservation embedded in a resource.
///
/// `persistence_id` is opaque here; decoding it into an [`AppId`] is a
/// pluggable function supplied by the cluster-manager adapter (see
/// [`crate::facade::spawn`]).
#[derive(Clone, Debug)]
pub struct PersistentReservation {
    pub persistence_id: String,
}

/// One resource entry within an offer (CPU, memory, disk, ports, ...).
///
/// The core does not interpret resource quantities; `kind` is diagnostic
/// only. The one field it does interpret is an optional persistent
/// reservation, used for matcher precedence ordering (see
/// [`crate::ordering`]).
#[derive(Clone, Debug)]
pub struct Resource {
    pub kind: String,
    pub persistent_reservation: Option<PersistentReservation>,
}

/// A resource bundle offered by the upstream cluster manager for one host.
#[derive(Clone, Debug)]
pub struct Offer {
    pub offer_id: OfferId,
    pub hostname: String,
    pub resources: Vec<Resource>,
}

/// A proposed launch (or reservation) action that consumes part of an offer.
///
/// Implementations must be pure and side-effect free: `apply_to_offer` is
/// called by the processor while folding a matcher's accepted ops into the
/// offer's remaining resources, and may be invoked zero times if the op
/// ends up rejected instead.
pub trait InstanceOp: Send + Sync + fmt::Debug {
    fn apply_to_offer(&self, offer: &Offer) -> Offer;
}

/// An op together with the callback that resolves it.
///
/// Every `InstanceOpWithSource` the processor receives is terminally
/// resolved by exactly one of: being folded into some offer's accepted
/// `ops`, or having `reject` invoked. `reject` is safe to call more than
/// once; only the first call has any effect, mirroring the single-shot
/// completion semantics of the offer promise itself.
pub struct InstanceOpWithSource {
    pub op: Arc<dyn InstanceOp>,
    reject_fn: Mutex<Option<Box<dyn FnOnce(String) + Send>>>,
}

impl InstanceOpWithSource {
    pub fn new<F>(op: Arc<dyn InstanceOp>, reject_fn: F) -> Self
    where
        F: FnOnce(String) + Send + 'static,
    {
        Self {
            op,
            reject_fn: Mutex::new(Some(Box::new(reject_fn))),
        }
    }

    /// Reject this op with `reason`. Idempotent: only the first call fires.
    pub fn reject(&self, reason: impl Into<String>) {
        if let Some(f) = self.reject_fn.lock().unwrap().take() {
            f(reason.into());
        }
    }
}

impl fmt::Debug for InstanceOpWithSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceOpWithSource")
            .field("op", &self.op)
            .finish()
    }
}

/// Result of matching (part of) an offer, produced by a matcher and also
/// returned to the original requester once the offer completes.
#[derive(Debug)]
pub struct MatchedInstanceOps {
    pub offer_id: OfferId,
    pub ops: Vec<InstanceOpWithSource>,
    pub resend_this_offer: bool,
}

impl MatchedInstanceOps {
    pub fn no_match(offer_id: OfferId, resend_this_offer: bool) -> Self {
        Self {
            offer_id,
            ops: Vec::new(),
            resend_this_offer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn reject_fires_exactly_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        #[derive(Debug)]
        struct NoopOp;
        impl InstanceOp for NoopOp {
            fn apply_to_offer(&self, offer: &Offer) -> Offer {
                offer.clone()
            }
        }

        let op = InstanceOpWithSource::new(Arc::new(NoopOp), move |_reason| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        op.reject("first");
        op.reject("second");

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
