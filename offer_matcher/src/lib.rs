//! Offer matcher: consults a registry of pluggable matchers against
//! incoming resource offers, bounded by a per-offer instance cap and a
//! shared launch-token budget.

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod facade;
pub mod matcher;
pub mod metrics;
pub mod offer;
pub mod offer_data;
pub mod ordering;
mod processor;
pub mod random;
pub mod registry;
pub mod tokens;
pub mod wanted;

pub use clock::{Clock, SystemClock};
pub use config::OfferMatcherConfig;
pub use error::OfferMatcherError;
pub use facade::{spawn, spawn_with_random, OfferMatcherHandle};
pub use matcher::{Matcher, MatcherHandle};
pub use metrics::OfferMatcherMetrics;
pub use offer::{
    AppId, InstanceOp, InstanceOpWithSource, MatchedInstanceOps, Offer, OfferId,
    PersistentReservation, Resource,
};
pub use random::RandomSource;
pub use wanted::WantedSignalObserver;
