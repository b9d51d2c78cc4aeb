//! Public entry point: spawns the processor task and hands back a cheap,
//! cloneable handle plus a metrics snapshot.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::clock::Clock;
use crate::config::OfferMatcherConfig;
use crate::error::OfferMatcherError;
use crate::matcher::MatcherHandle;
use crate::metrics::OfferMatcherMetrics;
use crate::offer::{AppId, MatchedInstanceOps, Offer};
use crate::processor::{Command, OfferProcessor};
use crate::random::{RandomSource, ThreadRngSource};
use crate::wanted::WantedSignalObserver;

/// Handle to a running offer matcher. Cloning shares the same underlying
/// processor task; the task itself shuts down once every clone (and the
/// processor's own retained sender) is dropped.
#[derive(Clone)]
pub struct OfferMatcherHandle {
    tx: mpsc::Sender<Command>,
}

impl OfferMatcherHandle {
    /// Submits `offer` for matching and awaits its final result.
    ///
    /// Resolves once every stop condition in the processor's matching loop
    /// has been reached for this offer: the deadline passes, the matcher
    /// queue is exhausted, the per-offer instance cap is hit, or the
    /// launch-token balance runs out.
    pub async fn match_offer(
        &self,
        deadline: Instant,
        offer: Offer,
    ) -> Result<MatchedInstanceOps, OfferMatcherError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(Command::MatchOffer {
                deadline,
                offer,
                respond_to,
            })
            .await
            .map_err(|_| OfferMatcherError::FacadeClosed)?;
        rx.await.map_err(|_| OfferMatcherError::ReplyChannelClosed)
    }

    /// Registers `matcher`, or replaces the existing entry sharing its id.
    pub async fn add_or_update_matcher(
        &self,
        matcher: MatcherHandle,
    ) -> Result<MatcherHandle, OfferMatcherError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(Command::AddOrUpdateMatcher {
                matcher,
                respond_to,
            })
            .await
            .map_err(|_| OfferMatcherError::FacadeClosed)?;
        rx.await.map_err(|_| OfferMatcherError::ReplyChannelClosed)
    }

    /// Removes a matcher sharing `matcher`'s id from the registry.
    pub async fn remove_matcher(&self, matcher: MatcherHandle) -> Result<(), OfferMatcherError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(Command::RemoveMatcher {
                matcher,
                respond_to,
            })
            .await
            .map_err(|_| OfferMatcherError::FacadeClosed)?;
        rx.await.map_err(|_| OfferMatcherError::ReplyChannelClosed)
    }

    /// Overwrites the launch-token balance.
    pub async fn set_instance_launch_tokens(&self, n: i64) -> Result<(), OfferMatcherError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(Command::SetInstanceLaunchTokens { n, respond_to })
            .await
            .map_err(|_| OfferMatcherError::FacadeClosed)?;
        rx.await.map_err(|_| OfferMatcherError::ReplyChannelClosed)
    }

    /// Adds to (or, if negative, subtracts from) the launch-token balance.
    pub async fn add_instance_launch_tokens(&self, n: i64) -> Result<(), OfferMatcherError> {
        let (respond_to, rx) = oneshot::channel();
        self.tx
            .send(Command::AddInstanceLaunchTokens { n, respond_to })
            .await
            .map_err(|_| OfferMatcherError::FacadeClosed)?;
        rx.await.map_err(|_| OfferMatcherError::ReplyChannelClosed)
    }
}

/// Spawns a new offer processor task and returns a handle to it along with
/// a metrics snapshot handle.
///
/// `decode_persistence_id` decodes a resource's opaque persistence id into
/// the [`AppId`] that holds the reservation, if any; it is supplied by the
/// cluster-manager adapter since this crate has no opinion on that id's
/// format.
pub fn spawn(
    cfg: OfferMatcherConfig,
    wanted_observer: Arc<dyn WantedSignalObserver>,
    clock: Arc<dyn Clock>,
    decode_persistence_id: Arc<dyn Fn(&str) -> Option<AppId> + Send + Sync>,
) -> (OfferMatcherHandle, OfferMatcherMetrics) {
    spawn_with_random(
        cfg,
        wanted_observer,
        clock,
        Arc::new(ThreadRngSource),
        decode_persistence_id,
    )
}

/// Like [`spawn`], but with an explicit [`RandomSource`], for tests that
/// need deterministic or reproducible matcher-queue ordering.
pub fn spawn_with_random(
    cfg: OfferMatcherConfig,
    wanted_observer: Arc<dyn WantedSignalObserver>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    decode_persistence_id: Arc<dyn Fn(&str) -> Option<AppId> + Send + Sync>,
) -> (OfferMatcherHandle, OfferMatcherMetrics) {
    let mailbox_capacity = cfg.mailbox_capacity;
    let metrics = OfferMatcherMetrics::default();
    let (tx, rx) = mpsc::channel(mailbox_capacity);

    let processor = OfferProcessor::new(
        cfg,
        metrics.clone(),
        wanted_observer,
        clock,
        random,
        decode_persistence_id,
        tx.clone(),
    );

    tokio::spawn(processor.run(rx));

    (OfferMatcherHandle { tx }, metrics)
}
