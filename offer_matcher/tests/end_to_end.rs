//! Integration tests driving the public facade end to end.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, Notify};

use offer_matcher::{
    spawn_with_random, AppId, Clock, InstanceOp, InstanceOpWithSource, Matcher,
    MatchedInstanceOps, Offer, OfferId, OfferMatcherConfig, PersistentReservation, Resource,
    SystemClock, WantedSignalObserver,
};

#[derive(Debug)]
struct NoopOp;

impl InstanceOp for NoopOp {
    fn apply_to_offer(&self, offer: &Offer) -> Offer {
        offer.clone()
    }
}

fn make_op() -> InstanceOpWithSource {
    InstanceOpWithSource::new(Arc::new(NoopOp), |_reason| {})
}

fn plain_offer(id: &str) -> Offer {
    Offer {
        offer_id: OfferId::from(id),
        hostname: "host".to_string(),
        resources: vec![],
    }
}

/// A matcher that always proposes `n` ops and never errors.
struct AlwaysMatches {
    id: String,
    n: usize,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Matcher for AlwaysMatches {
    fn id(&self) -> &str {
        &self.id
    }

    async fn match_offer(
        &self,
        _now: Instant,
        _deadline: Instant,
        offer: Offer,
    ) -> anyhow::Result<MatchedInstanceOps> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let ops = (0..self.n).map(|_| make_op()).collect();
        Ok(MatchedInstanceOps {
            offer_id: offer.offer_id,
            ops,
            resend_this_offer: false,
        })
    }
}

/// A matcher that never finds anything.
struct NeverMatches {
    id: String,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Matcher for NeverMatches {
    fn id(&self) -> &str {
        &self.id
    }

    async fn match_offer(
        &self,
        _now: Instant,
        _deadline: Instant,
        offer: Offer,
    ) -> anyhow::Result<MatchedInstanceOps> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(MatchedInstanceOps::no_match(offer.offer_id, false))
    }
}

/// A matcher that never returns before its deadline passes, by sleeping
/// far past any deadline used in these tests.
struct NeverReplies {
    id: String,
}

#[async_trait]
impl Matcher for NeverReplies {
    fn id(&self) -> &str {
        &self.id
    }

    async fn match_offer(
        &self,
        _now: Instant,
        _deadline: Instant,
        offer: Offer,
    ) -> anyhow::Result<MatchedInstanceOps> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(MatchedInstanceOps::no_match(offer.offer_id, false))
    }
}

/// A matcher that proposes one op, but only after `gate` fires, so a test
/// can control exactly when its reply reaches the processor. The proposed
/// op records its rejection reason into `rejections` instead of discarding
/// it, so a test can assert on it later.
struct GatedMatcher {
    id: String,
    gate: Arc<Notify>,
    rejections: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Matcher for GatedMatcher {
    fn id(&self) -> &str {
        &self.id
    }

    async fn match_offer(
        &self,
        _now: Instant,
        _deadline: Instant,
        offer: Offer,
    ) -> anyhow::Result<MatchedInstanceOps> {
        self.gate.notified().await;
        let rejections = Arc::clone(&self.rejections);
        let op = InstanceOpWithSource::new(Arc::new(NoopOp), move |reason| {
            rejections.lock().unwrap().push(reason);
        });
        Ok(MatchedInstanceOps {
            offer_id: offer.offer_id,
            ops: vec![op],
            resend_this_offer: false,
        })
    }
}

#[derive(Default)]
struct RecordingObserver {
    seen: AsyncMutex<Vec<bool>>,
}

impl WantedSignalObserver for RecordingObserver {
    fn on_wanted_changed(&self, wanted: bool) {
        self.seen.blocking_lock().push(wanted);
    }
}

fn decode_none() -> Arc<dyn Fn(&str) -> Option<AppId> + Send + Sync> {
    Arc::new(|_: &str| None)
}

#[tokio::test]
async fn no_matchers_short_circuits_even_with_tokens() {
    let cfg = OfferMatcherConfig::new(10).unwrap();
    let (handle, _metrics) = spawn_with_random(
        cfg,
        Arc::new(RecordingObserver::default()),
        Arc::new(SystemClock),
        Arc::new(offer_matcher::random::NoShuffleSource),
        decode_none(),
    );

    handle.set_instance_launch_tokens(5).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let result = handle
        .match_offer(deadline, plain_offer("offer-1"))
        .await
        .unwrap();

    assert!(result.ops.is_empty());
    assert!(!result.resend_this_offer);
}

#[tokio::test]
async fn registering_first_matcher_with_tokens_flips_wanted_on() {
    let cfg = OfferMatcherConfig::new(10).unwrap();
    let observer = Arc::new(RecordingObserver::default());
    let (handle, _metrics) = spawn_with_random(
        cfg,
        Arc::clone(&observer) as Arc<dyn WantedSignalObserver>,
        Arc::new(SystemClock),
        Arc::new(offer_matcher::random::NoShuffleSource),
        decode_none(),
    );

    handle.set_instance_launch_tokens(3).await.unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    handle
        .add_or_update_matcher(Arc::new(NeverMatches {
            id: "m1".to_string(),
            calls,
        }))
        .await
        .unwrap();

    // give the processor a moment to process both commands in order
    tokio::task::yield_now().await;

    let history = observer.seen.lock().await.clone();
    assert_eq!(
        history,
        vec![false, true],
        "tokens arrive while the registry is still empty, so wanted stays false \
         until the first matcher joins"
    );
}

#[tokio::test]
async fn token_budget_partially_admits_and_rejects_rest() {
    let cfg = OfferMatcherConfig::new(100).unwrap();
    let (handle, metrics) = spawn_with_random(
        cfg,
        Arc::new(RecordingObserver::default()),
        Arc::new(SystemClock),
        Arc::new(offer_matcher::random::NoShuffleSource),
        decode_none(),
    );

    handle.set_instance_launch_tokens(2).await.unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    handle
        .add_or_update_matcher(Arc::new(AlwaysMatches {
            id: "m1".to_string(),
            n: 5,
            calls,
        }))
        .await
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let offer = plain_offer("offer-2");

    let result = handle.match_offer(deadline, offer).await.unwrap();

    assert_eq!(result.ops.len(), 2);
    assert_eq!(metrics.launch_tokens(), 0);
}

#[tokio::test(start_paused = true)]
async fn deadline_timeout_still_returns_whatever_was_admitted() {
    let cfg = OfferMatcherConfig::new(100).unwrap();
    let (handle, _metrics) = spawn_with_random(
        cfg,
        Arc::new(RecordingObserver::default()),
        Arc::new(SystemClock),
        Arc::new(offer_matcher::random::NoShuffleSource),
        decode_none(),
    );

    handle.set_instance_launch_tokens(10).await.unwrap();

    let fast_calls = Arc::new(AtomicUsize::new(0));
    handle
        .add_or_update_matcher(Arc::new(AlwaysMatches {
            id: "fast".to_string(),
            n: 1,
            calls: Arc::clone(&fast_calls),
        }))
        .await
        .unwrap();
    handle
        .add_or_update_matcher(Arc::new(NeverReplies {
            id: "slow".to_string(),
        }))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now().into_std() + Duration::from_secs(1);
    let offer = plain_offer("offer-3");

    let match_future = handle.match_offer(deadline, offer);
    tokio::pin!(match_future);

    tokio::time::advance(Duration::from_secs(2)).await;

    let result = match_future.await.unwrap();
    assert!(result.ops.len() <= 1);
}

#[tokio::test]
async fn reservation_holder_is_consulted_before_unaffiliated_matchers() {
    let mut affiliated_wins = 0;
    for trial in 0..20 {
        let cfg = OfferMatcherConfig::new(100).unwrap();
        let owner_calls = Arc::new(AtomicUsize::new(0));
        let other_calls = Arc::new(AtomicUsize::new(0));

        let decode: Arc<dyn Fn(&str) -> Option<AppId> + Send + Sync> =
            Arc::new(|persistence_id: &str| {
                if persistence_id == "disk-app-1" {
                    Some("app-1".to_string())
                } else {
                    None
                }
            });

        let (handle, _metrics) = spawn_with_random(
            cfg,
            Arc::new(RecordingObserver::default()),
            Arc::new(SystemClock),
            Arc::new(offer_matcher::random::ThreadRngSource),
            decode,
        );

        handle.set_instance_launch_tokens(100).await.unwrap();

        struct PrecedenceMatcher {
            id: String,
            apps: HashSet<AppId>,
            calls: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl Matcher for PrecedenceMatcher {
            fn id(&self) -> &str {
                &self.id
            }
            fn precedence(&self) -> Option<HashSet<AppId>> {
                Some(self.apps.clone())
            }
            async fn match_offer(
                &self,
                _now: Instant,
                _deadline: Instant,
                offer: Offer,
            ) -> anyhow::Result<MatchedInstanceOps> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(MatchedInstanceOps::no_match(offer.offer_id, false))
            }
        }

        handle
            .add_or_update_matcher(Arc::new(PrecedenceMatcher {
                id: "owner".to_string(),
                apps: ["app-1".to_string()].into_iter().collect(),
                calls: Arc::clone(&owner_calls),
            }))
            .await
            .unwrap();
        handle
            .add_or_update_matcher(Arc::new(NeverMatches {
                id: "other".to_string(),
                calls: Arc::clone(&other_calls),
            }))
            .await
            .unwrap();

        let offer = Offer {
            offer_id: OfferId::from(format!("offer-{trial}")),
            hostname: "host".to_string(),
            resources: vec![Resource {
                kind: "disk".to_string(),
                persistent_reservation: Some(PersistentReservation {
                    persistence_id: "disk-app-1".to_string(),
                }),
            }],
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        let _ = handle.match_offer(deadline, offer).await.unwrap();

        if owner_calls.load(Ordering::SeqCst) == 1 && other_calls.load(Ordering::SeqCst) == 1 {
            affiliated_wins += 1;
        }
    }

    assert_eq!(affiliated_wins, 20, "owner must always be consulted, in every trial");
}

#[tokio::test]
async fn matcher_registered_mid_offer_joins_the_in_flight_queue() {
    let cfg = OfferMatcherConfig::new(100).unwrap();
    let (handle, _metrics) = spawn_with_random(
        cfg,
        Arc::new(RecordingObserver::default()),
        Arc::new(SystemClock),
        Arc::new(offer_matcher::random::NoShuffleSource),
        decode_none(),
    );

    handle.set_instance_launch_tokens(10).await.unwrap();

    let slow_calls = Arc::new(AtomicUsize::new(0));
    struct SlowMatcher {
        id: String,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Matcher for SlowMatcher {
        fn id(&self) -> &str {
            &self.id
        }
        async fn match_offer(
            &self,
            _now: Instant,
            _deadline: Instant,
            offer: Offer,
        ) -> anyhow::Result<MatchedInstanceOps> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(MatchedInstanceOps::no_match(offer.offer_id, false))
        }
    }

    handle
        .add_or_update_matcher(Arc::new(SlowMatcher {
            id: "slow".to_string(),
            calls: Arc::clone(&slow_calls),
        }))
        .await
        .unwrap();

    let late_calls = Arc::new(AtomicUsize::new(0));
    let deadline = Instant::now() + Duration::from_secs(5);
    let offer = plain_offer("offer-late-join");

    let handle_clone = handle.clone();
    let match_fut = tokio::spawn(async move { handle_clone.match_offer(deadline, offer).await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    handle
        .add_or_update_matcher(Arc::new(NeverMatches {
            id: "late".to_string(),
            calls: Arc::clone(&late_calls),
        }))
        .await
        .unwrap();

    let result = match_fut.await.unwrap().unwrap();
    assert!(result.ops.is_empty());
    assert_eq!(late_calls.load(Ordering::SeqCst), 1, "late-joined matcher must still be consulted");
}

#[tokio::test(start_paused = true)]
async fn late_reply_after_offer_timeout_is_rejected() {
    let cfg = OfferMatcherConfig::new(100).unwrap();
    let (handle, _metrics) = spawn_with_random(
        cfg,
        Arc::new(RecordingObserver::default()),
        Arc::new(SystemClock),
        Arc::new(offer_matcher::random::NoShuffleSource),
        decode_none(),
    );

    handle.set_instance_launch_tokens(10).await.unwrap();

    let gate = Arc::new(Notify::new());
    let rejections = Arc::new(Mutex::new(Vec::new()));
    handle
        .add_or_update_matcher(Arc::new(GatedMatcher {
            id: "gated".to_string(),
            gate: Arc::clone(&gate),
            rejections: Arc::clone(&rejections),
        }))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now().into_std() + Duration::from_secs(1);
    let offer = plain_offer("offer-late-reply");
    let offer_id = offer.offer_id.clone();

    let match_future = handle.match_offer(deadline, offer);
    tokio::pin!(match_future);

    // Let the offer's deadline elapse and complete it while the matcher is
    // still gated, so its eventual reply lands after `offer_id` has already
    // been removed from the processor's in-flight map.
    tokio::time::advance(Duration::from_secs(2)).await;
    let result = match_future.await.unwrap();
    assert!(result.ops.is_empty());

    // Now let the gated matcher's reply reach the processor. No more timers
    // are pending, so drive the scheduler with yields rather than `advance`.
    gate.notify_one();
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    // The op the matcher proposed never shows up in any result; instead it
    // must have been rejected through its own callback with the
    // already-timed-out message, proving the late reply took the
    // unknown-offerId rejection branch rather than being silently dropped.
    assert_eq!(rejections.lock().unwrap().len(), 1);
    assert_eq!(
        rejections.lock().unwrap()[0],
        format!("offer '{offer_id}' already timed out")
    );
}

#[tokio::test]
async fn removing_the_last_matcher_flips_wanted_back_off() {
    let cfg = OfferMatcherConfig::new(10).unwrap();
    let observer = Arc::new(RecordingObserver::default());
    let (handle, _metrics) = spawn_with_random(
        cfg,
        Arc::clone(&observer) as Arc<dyn WantedSignalObserver>,
        Arc::new(SystemClock),
        Arc::new(offer_matcher::random::NoShuffleSource),
        decode_none(),
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let matcher = Arc::new(NeverMatches {
        id: "m1".to_string(),
        calls,
    });

    // Registry gets a member while tokens are still zero: wanted stays false.
    let added = handle
        .add_or_update_matcher(Arc::clone(&matcher) as Arc<dyn Matcher>)
        .await
        .unwrap();
    tokio::task::yield_now().await;

    // Tokens arrive: wanted flips on.
    handle.set_instance_launch_tokens(3).await.unwrap();
    tokio::task::yield_now().await;

    // Removing the only matcher empties the registry again: wanted flips off.
    handle.remove_matcher(added).await.unwrap();
    tokio::task::yield_now().await;

    let history = observer.seen.lock().await.clone();
    assert_eq!(
        history,
        vec![false, true, false],
        "wanted must go false -> true -> false as the registry empties back out"
    );
}
