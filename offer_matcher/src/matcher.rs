//! The matcher trait third parties implement to bid on offers.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::offer::{AppId, MatchedInstanceOps, Offer};

/// A pluggable strategy that proposes launch ops against an offer.
///
/// Matchers are consulted one at a time, in an order decided per-offer by
/// [`crate::ordering::build_matcher_queue`]. A matcher must return within
/// `deadline` is best-effort on its part; the processor itself enforces the
/// hard cutoff regardless of how long `match_offer` actually takes.
#[async_trait]
pub trait Matcher: Send + Sync {
    /// Stable identity used for registry membership and re-queuing. Two
    /// matchers are considered the same registry entry iff their `id()`
    /// strings are equal.
    fn id(&self) -> &str;

    /// Apps this matcher holds persistent reservations for, if any.
    ///
    /// When non-`None`, offers carrying a persistent reservation for one of
    /// these apps route to this matcher ahead of matchers with no stated
    /// precedence.
    fn precedence(&self) -> Option<HashSet<AppId>> {
        None
    }

    /// Propose launch ops against `offer`. `now` and `deadline` are the
    /// processor's own clock readings, not wall-clock time, so matchers can
    /// be tested deterministically against an injected [`crate::clock::Clock`].
    async fn match_offer(
        &self,
        now: Instant,
        deadline: Instant,
        offer: Offer,
    ) -> anyhow::Result<MatchedInstanceOps>;
}

/// Shared, type-erased handle to a registered matcher.
pub type MatcherHandle = Arc<dyn Matcher>;
