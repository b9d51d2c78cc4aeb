//! The offer processor: a single-writer state machine driven by a mailbox
//! of commands.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant as StdInstant;

use common::logger::correlated_span;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant as TokioInstant;
use tracing::{debug, error, info, warn};

use crate::admission;
use crate::clock::Clock;
use crate::config::OfferMatcherConfig;
use crate::matcher::MatcherHandle;
use crate::metrics::OfferMatcherMetrics;
use crate::offer::{AppId, MatchedInstanceOps, Offer, OfferId};
use crate::offer_data::OfferData;
use crate::ordering;
use crate::random::RandomSource;
use crate::registry::MatcherRegistry;
use crate::tokens::TokenAccountant;
use crate::wanted::WantedSignalObserver;

const REJECT_NOT_ENOUGH_CAPACITY: &str =
    "not enough launch tokens OR already scheduled sufficient instances on offer";

pub(crate) enum Command {
    MatchOffer {
        deadline: StdInstant,
        offer: Offer,
        respond_to: oneshot::Sender<MatchedInstanceOps>,
    },
    AddOrUpdateMatcher {
        matcher: MatcherHandle,
        respond_to: oneshot::Sender<MatcherHandle>,
    },
    RemoveMatcher {
        matcher: MatcherHandle,
        respond_to: oneshot::Sender<()>,
    },
    SetInstanceLaunchTokens {
        n: i64,
        respond_to: oneshot::Sender<()>,
    },
    AddInstanceLaunchTokens {
        n: i64,
        respond_to: oneshot::Sender<()>,
    },
    MatcherReply {
        offer_id: OfferId,
        matcher: MatcherHandle,
        matched: anyhow::Result<MatchedInstanceOps>,
    },
    MatchTimeout {
        offer_id: OfferId,
    },
}

pub(crate) struct OfferProcessor {
    cfg: OfferMatcherConfig,
    registry: MatcherRegistry,
    tokens: TokenAccountant,
    offers: HashMap<OfferId, OfferData>,
    metrics: OfferMatcherMetrics,
    wanted_observer: Arc<dyn WantedSignalObserver>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    decode_persistence_id: Arc<dyn Fn(&str) -> Option<AppId> + Send + Sync>,
    self_tx: mpsc::Sender<Command>,
}

impl OfferProcessor {
    pub(crate) fn new(
        cfg: OfferMatcherConfig,
        metrics: OfferMatcherMetrics,
        wanted_observer: Arc<dyn WantedSignalObserver>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        decode_persistence_id: Arc<dyn Fn(&str) -> Option<AppId> + Send + Sync>,
        self_tx: mpsc::Sender<Command>,
    ) -> Self {
        let tokens = TokenAccountant::new(cfg.initial_launch_tokens);
        metrics.set_launch_tokens(tokens.balance());

        Self {
            cfg,
            registry: MatcherRegistry::new(),
            tokens,
            offers: HashMap::new(),
            metrics,
            wanted_observer,
            clock,
            random,
            decode_persistence_id,
            self_tx,
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::MatchOffer {
                    deadline,
                    offer,
                    respond_to,
                } => self.handle_match_offer(deadline, offer, respond_to),
                Command::AddOrUpdateMatcher {
                    matcher,
                    respond_to,
                } => self.handle_add_or_update_matcher(matcher, respond_to),
                Command::RemoveMatcher {
                    matcher,
                    respond_to,
                } => self.handle_remove_matcher(matcher, respond_to),
                Command::SetInstanceLaunchTokens { n, respond_to } => {
                    self.handle_set_tokens(n, respond_to)
                }
                Command::AddInstanceLaunchTokens { n, respond_to } => {
                    self.handle_add_tokens(n, respond_to)
                }
                Command::MatcherReply {
                    offer_id,
                    matcher,
                    matched,
                } => self.handle_matcher_reply(offer_id, matcher, matched),
                Command::MatchTimeout { offer_id } => self.handle_timeout(offer_id),
            }
        }
        debug!("offer processor mailbox closed, shutting down");
    }

    fn handle_match_offer(
        &mut self,
        deadline: StdInstant,
        offer: Offer,
        respond_to: oneshot::Sender<MatchedInstanceOps>,
    ) {
        let offer_id = offer.offer_id.clone();
        let wanted = !self.registry.is_empty() && self.tokens.balance() > 0;

        if !wanted {
            let _ = respond_to.send(MatchedInstanceOps::no_match(offer_id, false));
            return;
        }

        let matcher_queue = ordering::build_matcher_queue(
            &self.registry,
            &offer,
            self.decode_persistence_id.as_ref(),
            self.random.as_ref(),
        );

        let span = correlated_span("match_offer", &offer_id.0);
        self.metrics.incr_current_offers();
        let data = OfferData::new(offer, deadline, respond_to, matcher_queue, span);
        self.offers.insert(offer_id.clone(), data);

        let self_tx = self.self_tx.clone();
        let offer_id_for_timer = offer_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(TokioInstant::from_std(deadline)).await;
            let _ = self_tx
                .send(Command::MatchTimeout {
                    offer_id: offer_id_for_timer,
                })
                .await;
        });

        self.schedule_next_matcher_or_finish(&offer_id);
    }

    fn schedule_next_matcher_or_finish(&mut self, offer_id: &OfferId) {
        let Some(data) = self.offers.get(offer_id) else {
            return;
        };
        let _guard = data.span.clone().entered();

        let now = self.clock.now();
        let instance_cap_hit = data.ops.len() >= self.cfg.max_instances_per_offer;
        let no_tokens_left = self.tokens.balance() <= 0;
        let queue_exhausted = data.matcher_queue.is_empty();
        let deadline_passed = now >= data.deadline;

        if deadline_passed {
            warn!(
                %offer_id,
                matcher_passes = data.match_passes,
                "offer overdue, completing with partial result"
            );
            self.complete_offer(offer_id.clone());
            return;
        }

        if instance_cap_hit {
            debug!(
                %offer_id,
                cap_flag = %self.cfg.max_instances_per_offer_flag_name,
                max_instances_per_offer = self.cfg.max_instances_per_offer,
                "per-offer instance cap reached, completing offer"
            );
            self.complete_offer(offer_id.clone());
            return;
        }

        if queue_exhausted || no_tokens_left {
            self.complete_offer(offer_id.clone());
            return;
        }

        self.dispatch_matcher(offer_id.clone());
    }

    fn dispatch_matcher(&mut self, offer_id: OfferId) {
        let Some(data) = self.offers.get_mut(&offer_id) else {
            return;
        };

        let Some(matcher) = data.matcher_queue.pop_front() else {
            self.complete_offer(offer_id);
            return;
        };

        let now = self.clock.now();
        let deadline = data.deadline;
        let offer = data.offer.clone();
        let self_tx = self.self_tx.clone();
        let matcher_for_task = Arc::clone(&matcher);
        let offer_id_for_task = offer_id.clone();

        tokio::spawn(async move {
            let result = matcher_for_task.match_offer(now, deadline, offer).await;
            let _ = self_tx
                .send(Command::MatcherReply {
                    offer_id: offer_id_for_task,
                    matcher: matcher_for_task,
                    matched: result,
                })
                .await;
        });
    }

    fn handle_matcher_reply(
        &mut self,
        offer_id: OfferId,
        matcher: MatcherHandle,
        matched: anyhow::Result<MatchedInstanceOps>,
    ) {
        let matched = match matched {
            Ok(m) => m,
            Err(err) => {
                warn!(%offer_id, matcher = matcher.id(), error = %err, "matcher returned an error, treating as no-match");
                MatchedInstanceOps::no_match(offer_id.clone(), false)
            }
        };

        let Some(data) = self.offers.get_mut(&offer_id) else {
            for op in matched.ops {
                op.reject(format!("offer '{offer_id}' already timed out"));
            }
            return;
        };
        let _guard = data.span.clone().entered();

        data.match_passes += 1;
        data.resend_this_offer = data.resend_this_offer || matched.resend_this_offer;
        let had_proposed_ops = !matched.ops.is_empty();

        let admission_result = catch_unwind(AssertUnwindSafe(|| {
            admission::admit(
                data,
                &mut self.tokens,
                self.cfg.max_instances_per_offer,
                matched.ops,
            )
        }));

        match admission_result {
            Ok(rejected) => {
                for op in rejected {
                    op.reject(REJECT_NOT_ENOUGH_CAPACITY);
                }
                self.metrics.set_launch_tokens(self.tokens.balance());

                if had_proposed_ops {
                    if let Some(data) = self.offers.get_mut(&offer_id) {
                        data.matcher_queue.push_back(matcher);
                    }
                }
            }
            Err(_) => {
                error!(
                    %offer_id,
                    matcher = matcher.id(),
                    "op admission panicked, dropping matcher's proposed ops for this pass"
                );
            }
        }

        self.schedule_next_matcher_or_finish(&offer_id);
    }

    fn handle_timeout(&mut self, offer_id: OfferId) {
        let Some(data) = self.offers.get_mut(&offer_id) else {
            return;
        };
        data.resend_this_offer = true;
        self.complete_offer(offer_id);
    }

    fn complete_offer(&mut self, offer_id: OfferId) {
        let Some(data) = self.offers.remove(&offer_id) else {
            return;
        };
        let _guard = data.span.clone().entered();

        self.metrics.decr_current_offers();

        info!(
            %offer_id,
            match_passes = data.match_passes,
            ops_accepted = data.ops.len(),
            resend_this_offer = data.resend_this_offer,
            leftover_resources = data.offer.resources.len(),
            "offer matching complete"
        );

        let result = MatchedInstanceOps {
            offer_id,
            ops: data.ops,
            resend_this_offer: data.resend_this_offer,
        };
        let _ = data.promise.send(result);
    }

    fn handle_add_or_update_matcher(
        &mut self,
        matcher: MatcherHandle,
        respond_to: oneshot::Sender<MatcherHandle>,
    ) {
        let matcher_for_queues = Arc::clone(&matcher);
        let newly_added = self.registry.add_or_update(matcher);

        if newly_added {
            for data in self.offers.values_mut() {
                data.matcher_queue.push_back(Arc::clone(&matcher_for_queues));
            }
            self.publish_wanted();
        }

        let _ = respond_to.send(matcher_for_queues);
    }

    fn handle_remove_matcher(&mut self, matcher: MatcherHandle, respond_to: oneshot::Sender<()>) {
        let removed = self.registry.remove(matcher.id());
        if removed {
            self.publish_wanted();
        }
        let _ = respond_to.send(());
    }

    fn handle_set_tokens(&mut self, n: i64, respond_to: oneshot::Sender<()>) {
        let became_available = self.tokens.set(n);
        self.metrics.set_launch_tokens(self.tokens.balance());
        if became_available {
            self.publish_wanted();
        }
        let _ = respond_to.send(());
    }

    fn handle_add_tokens(&mut self, n: i64, respond_to: oneshot::Sender<()>) {
        let became_available = self.tokens.add(n);
        self.metrics.set_launch_tokens(self.tokens.balance());
        if became_available {
            self.publish_wanted();
        }
        let _ = respond_to.send(());
    }

    fn publish_wanted(&self) {
        let wanted = !self.registry.is_empty() && self.tokens.balance() > 0;
        self.wanted_observer.on_wanted_changed(wanted);
    }
}
