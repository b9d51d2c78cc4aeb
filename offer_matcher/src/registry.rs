//! Tracks the set of currently registered matchers.

use crate::matcher::MatcherHandle;

/// The set of matchers currently participating in offer matching.
///
/// Membership is keyed by [`crate::matcher::Matcher::id`] rather than by
/// pointer identity, so a caller can re-register an updated matcher
/// implementation under the same id without it being treated as a new
/// member.
#[derive(Default)]
pub struct MatcherRegistry {
    matchers: Vec<MatcherHandle>,
}

impl MatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `matcher`, or replaces the existing entry with the same id.
    ///
    /// Returns `true` iff this added a *new* member (membership changed),
    /// `false` if it only replaced an existing entry in place.
    pub fn add_or_update(&mut self, matcher: MatcherHandle) -> bool {
        if let Some(slot) = self.matchers.iter_mut().find(|m| m.id() == matcher.id()) {
            *slot = matcher;
            false
        } else {
            self.matchers.push(matcher);
            true
        }
    }

    /// Removes the matcher with the given id. Returns `true` iff a member
    /// was actually removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.matchers.len();
        self.matchers.retain(|m| m.id() != id);
        self.matchers.len() != before
    }

    pub fn is_member(&self, id: &str) -> bool {
        self.matchers.iter().any(|m| m.id() == id)
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MatcherHandle> {
        self.matchers.iter()
    }
}
