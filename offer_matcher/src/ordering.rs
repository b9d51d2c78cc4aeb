//! Builds the per-offer matcher call order: reservation-holders first,
//! each group shuffled independently.

use std::collections::{HashSet, VecDeque};

use crate::matcher::MatcherHandle;
use crate::offer::{AppId, Offer};
use crate::random::RandomSource;
use crate::registry::MatcherRegistry;

/// Builds the queue of matchers to consult for `offer`, in call order.
///
/// Matchers whose stated precedence intersects an app that holds a
/// persistent reservation on one of `offer`'s resources go first; all
/// other matchers follow. Each group is shuffled independently before being
/// concatenated, so precedence is a strict priority tier rather than a
/// stable sort key.
pub fn build_matcher_queue(
    registry: &MatcherRegistry,
    offer: &Offer,
    decode_persistence_id: &dyn Fn(&str) -> Option<AppId>,
    random: &dyn RandomSource,
) -> VecDeque<MatcherHandle> {
    let reserved_apps: HashSet<AppId> = offer
        .resources
        .iter()
        .filter_map(|r| r.persistent_reservation.as_ref())
        .filter_map(|res| decode_persistence_id(&res.persistence_id))
        .collect();

    let mut reserved: Vec<MatcherHandle> = Vec::new();
    let mut normal: Vec<MatcherHandle> = Vec::new();

    for matcher in registry.iter() {
        let has_precedence = matcher
            .precedence()
            .map(|apps| apps.intersection(&reserved_apps).next().is_some())
            .unwrap_or(false);

        if has_precedence {
            reserved.push(matcher.clone());
        } else {
            normal.push(matcher.clone());
        }
    }

    random.shuffle(&mut reserved);
    random.shuffle(&mut normal);

    let mut queue = VecDeque::with_capacity(reserved.len() + normal.len());
    queue.extend(reserved);
    queue.extend(normal);
    queue
}
