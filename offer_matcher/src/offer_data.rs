//! In-flight bookkeeping for a single offer being matched.

use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::oneshot;
use tracing::Span;

use crate::matcher::MatcherHandle;
use crate::offer::{InstanceOpWithSource, MatchedInstanceOps, Offer};

/// Everything the processor needs to keep track of while an offer is
/// working its way through the matcher queue.
pub struct OfferData {
    pub offer: Offer,
    pub deadline: Instant,
    pub promise: oneshot::Sender<MatchedInstanceOps>,
    pub matcher_queue: VecDeque<MatcherHandle>,
    pub ops: Vec<InstanceOpWithSource>,
    pub match_passes: u32,
    pub resend_this_offer: bool,
    /// Span every log line about this offer is emitted under, so a reader
    /// can follow one offer's whole lifetime across match passes.
    pub span: Span,
}

impl OfferData {
    pub fn new(
        offer: Offer,
        deadline: Instant,
        promise: oneshot::Sender<MatchedInstanceOps>,
        matcher_queue: VecDeque<MatcherHandle>,
        span: Span,
    ) -> Self {
        Self {
            offer,
            deadline,
            promise,
            matcher_queue,
            ops: Vec::new(),
            match_passes: 0,
            resend_this_offer: false,
            span,
        }
    }
}
