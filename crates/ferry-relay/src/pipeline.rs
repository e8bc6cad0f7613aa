// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The relay pipeline: filter, format, deliver over two hops, and keep the
//! correlation record that ties the copies together.
//!
//! Every public entry point is serialized per (pair, source message), so a
//! new/edit/delete sequence for one logical message never interleaves.
//! Different messages and different pairs proceed in parallel.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::OptionFuture;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ferry_config::model::RelayConfig;
use ferry_core::{
    ChatRef, Content, ContentFormatter, CorrelationRecord, CorrelationStore, CredentialStore,
    FerryError, FilterDecision, FilterEngine, ForwardingPair, Hop, HopAck, InsertOutcome,
    MessageId, MessageState, PairId, PairStatus, PlatformAdapter,
};
use ferry_scheduler::Scheduler;

use crate::sequencer::{Sequenced, Sequencer};

const HOPS: [Hop; 2] = [Hop::Relay, Hop::Destination];

type MessageKey = (PairId, MessageId);

/// Terminal outcome of one relay event. Errors are reported separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Both hops delivered and correlated.
    Delivered {
        relay: MessageId,
        destination: MessageId,
    },
    /// The missing destination hop of a partial delivery was sent.
    Completed { destination: MessageId },
    /// Hops whose copy was edited. Hops that were never delivered or no
    /// longer exist are not listed.
    Edited { hops: Vec<Hop> },
    /// Hops whose copy was deleted by this call.
    Deleted { hops: Vec<Hop> },
    /// The filter blocked the message. Nothing was sent.
    Filtered { reason: String },
    /// The message was already handled; nothing was sent.
    Duplicate,
    /// The pair is disabled or the message is already deleted.
    Skipped,
    /// A sequenced event whose number was already applied.
    Stale,
}

/// What happened on the source chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    New(Content),
    Edited(Content),
    Deleted,
}

/// One inbound platform event for a pair.
///
/// `seq` numbers events of the same source message, starting at 0. Events
/// without a number are applied in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEvent {
    pub pair_id: PairId,
    pub source_message_id: MessageId,
    pub seq: Option<u64>,
    pub kind: EventKind,
}

/// Platform adapters for each hop.
#[derive(Clone)]
pub struct Hops {
    /// Adapter watching the source chat. Only used for access checks.
    pub source: Option<Arc<dyn PlatformAdapter>>,
    pub relay: Arc<dyn PlatformAdapter>,
    pub destination: Arc<dyn PlatformAdapter>,
}

/// Per-chat access of one pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectivityReport {
    pub pair_id: PairId,
    /// `None` when no source adapter is configured.
    pub source: Option<bool>,
    pub relay: bool,
    pub destination: bool,
}

impl ConnectivityReport {
    pub fn is_ok(&self) -> bool {
        self.source.unwrap_or(true) && self.relay && self.destination
    }
}

/// Result of one retention pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub purged_records: u64,
    pub dropped_pending: usize,
    pub pruned_gates: usize,
}

/// Filtered content waiting for its destination hop.
struct PendingHop {
    content: Content,
    queued_at: Instant,
}

/// Where a reply points on each downstream hop.
#[derive(Debug, Default)]
struct ReplyTargets {
    relay: Option<MessageId>,
    destination: Option<MessageId>,
}

enum Verdict {
    Deliver(Content),
    Blocked(String),
}

pub struct RelayPipeline {
    scheduler: Arc<Scheduler>,
    pairs: Arc<dyn CredentialStore>,
    correlations: Arc<dyn CorrelationStore>,
    filter: Arc<dyn FilterEngine>,
    formatter: Arc<dyn ContentFormatter>,
    hops: Hops,
    sequencer: Sequencer<MessageKey>,
    pending: DashMap<MessageKey, PendingHop>,
    config: RelayConfig,
}

impl RelayPipeline {
    pub fn new(
        scheduler: Arc<Scheduler>,
        pairs: Arc<dyn CredentialStore>,
        correlations: Arc<dyn CorrelationStore>,
        filter: Arc<dyn FilterEngine>,
        formatter: Arc<dyn ContentFormatter>,
        hops: Hops,
        config: RelayConfig,
    ) -> Self {
        Self {
            scheduler,
            pairs,
            correlations,
            filter,
            formatter,
            hops,
            sequencer: Sequencer::new(config.reorder_timeout()),
            pending: DashMap::new(),
            config,
        }
    }

    /// Relay a message first seen on the pair's source chat.
    ///
    /// Hop 1 failing leaves no trace. Hop 2 failing leaves a record with
    /// no destination id and returns the hop's error; see
    /// [`complete_delivery`](Self::complete_delivery).
    pub async fn on_new_message(
        &self,
        pair_id: PairId,
        source_id: &MessageId,
        content: Content,
    ) -> Result<RelayOutcome, FerryError> {
        let key = (pair_id, source_id.clone());
        self.serialized(&key, self.handle_new(pair_id, source_id, content))
            .await
    }

    /// Replay an edit on every delivered copy. An edit for a message never
    /// relayed is relayed as new.
    pub async fn on_edited_message(
        &self,
        pair_id: PairId,
        source_id: &MessageId,
        content: Content,
    ) -> Result<RelayOutcome, FerryError> {
        let key = (pair_id, source_id.clone());
        self.serialized(&key, self.handle_edit(pair_id, source_id, content))
            .await
    }

    /// Delete every delivered copy and clear the record's hop ids.
    /// Repeating the call is a no-op.
    pub async fn on_deleted_message(
        &self,
        pair_id: PairId,
        source_id: &MessageId,
    ) -> Result<RelayOutcome, FerryError> {
        let key = (pair_id, source_id.clone());
        self.serialized(&key, self.handle_delete(pair_id, source_id))
            .await
    }

    /// Send only the missing destination hop of a partial delivery, using
    /// the content kept from the failed attempt or from the latest edit
    /// since.
    ///
    /// Fails with `NotFound` when there is no record, or when the content
    /// is no longer held (e.g. after a restart); use
    /// [`complete_delivery_with`](Self::complete_delivery_with) then.
    pub async fn complete_delivery(
        &self,
        pair_id: PairId,
        source_id: &MessageId,
    ) -> Result<RelayOutcome, FerryError> {
        let key = (pair_id, source_id.clone());
        self.serialized(&key, self.handle_complete(pair_id, source_id, None))
            .await
    }

    /// Like [`complete_delivery`](Self::complete_delivery), with the
    /// original content supplied by the caller. The content is filtered
    /// again before sending.
    pub async fn complete_delivery_with(
        &self,
        pair_id: PairId,
        source_id: &MessageId,
        content: Content,
    ) -> Result<RelayOutcome, FerryError> {
        let key = (pair_id, source_id.clone());
        self.serialized(&key, self.handle_complete(pair_id, source_id, Some(content)))
            .await
    }

    /// Apply an event in per-message sequence order.
    pub async fn dispatch(&self, event: RelayEvent) -> Result<RelayOutcome, FerryError> {
        let RelayEvent {
            pair_id,
            source_message_id,
            seq,
            kind,
        } = event;
        let key = (pair_id, source_message_id.clone());
        let source = &source_message_id;
        let work = async move {
            match kind {
                EventKind::New(content) => self.handle_new(pair_id, source, content).await,
                EventKind::Edited(content) => self.handle_edit(pair_id, source, content).await,
                EventKind::Deleted => self.handle_delete(pair_id, source).await,
            }
        };
        match self.sequencer.run(&key, seq, work).await {
            Sequenced::Ran(result) => result,
            Sequenced::Stale => Ok(RelayOutcome::Stale),
        }
    }

    /// Ask each adapter whether it can reach its chat of `pair_id`.
    pub async fn check_pair_connectivity(
        &self,
        pair_id: PairId,
    ) -> Result<ConnectivityReport, FerryError> {
        let pair = self
            .pairs
            .get_pair(pair_id)
            .await?
            .ok_or_else(|| FerryError::NotFound {
                kind: "pair",
                id: pair_id.to_string(),
            })?;

        let source: OptionFuture<_> = self
            .hops
            .source
            .as_ref()
            .map(|adapter| self.bounded("source access", adapter.validate_access(&pair.source_chat)))
            .into();
        let relay = self.bounded(
            "relay access",
            self.hops.relay.validate_access(&pair.relay_chat),
        );
        let destination = self.bounded(
            "destination access",
            self.hops.destination.validate_access(&pair.destination_chat),
        );
        let (source, relay, destination) = tokio::join!(source, relay, destination);

        let report = ConnectivityReport {
            pair_id,
            source: source.transpose()?,
            relay: relay?,
            destination: destination?,
        };
        if !report.is_ok() {
            warn!(pair_id = %pair_id, ?report, "pair cannot reach all of its chats");
        }
        Ok(report)
    }

    /// Purge expired correlation records, forget stale pending hops, and
    /// prune idle sequencing state.
    pub async fn sweep(&self) -> Result<SweepReport, FerryError> {
        let cutoff = Utc::now() - self.config.retention();
        let purged_records = self.correlations.purge_correlations(cutoff).await?;

        let retention = self.config.retention().to_std().unwrap_or(Duration::MAX);
        let before = self.pending.len();
        self.pending
            .retain(|_, pending| pending.queued_at.elapsed() < retention);
        let dropped_pending = before - self.pending.len();

        let pruned_gates = self.sequencer.prune_idle(self.config.sequencer_idle());
        Ok(SweepReport {
            purged_records,
            dropped_pending,
            pruned_gates,
        })
    }

    /// Number of partial deliveries whose content is still held.
    pub fn pending_deliveries(&self) -> usize {
        self.pending.len()
    }

    // --- handlers, always called under the message's sequencer gate ---

    async fn handle_new(
        &self,
        pair_id: PairId,
        source_id: &MessageId,
        content: Content,
    ) -> Result<RelayOutcome, FerryError> {
        let Some(pair) = self.deliverable_pair(pair_id).await? else {
            return Ok(RelayOutcome::Skipped);
        };
        self.relay_new(&pair, source_id, content).await
    }

    async fn handle_edit(
        &self,
        pair_id: PairId,
        source_id: &MessageId,
        content: Content,
    ) -> Result<RelayOutcome, FerryError> {
        let Some(pair) = self.deliverable_pair(pair_id).await? else {
            return Ok(RelayOutcome::Skipped);
        };
        let Some(record) = self.correlations.get_correlation(pair_id, source_id).await? else {
            debug!(pair_id = %pair_id, source = %source_id, "edit of unrelayed message, relaying as new");
            return self.relay_new(&pair, source_id, content).await;
        };
        if record.state() == MessageState::Deleted {
            debug!(pair_id = %pair_id, source = %source_id, "edit of deleted message ignored");
            return Ok(RelayOutcome::Skipped);
        }

        let content = match self.apply_filter(pair_id, content) {
            Verdict::Deliver(content) => content,
            Verdict::Blocked(reason) => {
                info!(pair_id = %pair_id, source = %source_id, %reason, "edit blocked by filter");
                return Ok(RelayOutcome::Filtered { reason });
            }
        };
        let replies = self.reply_targets(pair_id, content.reply_to.as_ref()).await?;

        let mut edited = Vec::new();
        for hop in HOPS {
            let Some(id) = record.hop_id(hop) else {
                continue;
            };
            let message = self
                .formatter
                .format(hop, &pair, &content, replies.for_hop(hop));
            let ack = self
                .on_hop(
                    hop,
                    format!("{hop} edit"),
                    self.adapter(hop).edit(chat(&pair, hop), id, &message),
                )
                .await?;
            match ack {
                HopAck::Done => edited.push(hop),
                HopAck::Gone => debug!(pair_id = %pair_id, %hop, id = %id, "edited copy no longer exists"),
            }
        }

        // A later completion must send what the relay copy now shows.
        if let Some(mut pending) = self.pending.get_mut(&(pair_id, source_id.clone())) {
            debug!(pair_id = %pair_id, source = %source_id, "pending destination content replaced by edit");
            pending.content = content;
        }

        debug!(pair_id = %pair_id, source = %source_id, ?edited, "edit relayed");
        Ok(RelayOutcome::Edited { hops: edited })
    }

    async fn handle_delete(
        &self,
        pair_id: PairId,
        source_id: &MessageId,
    ) -> Result<RelayOutcome, FerryError> {
        let Some(pair) = self.deliverable_pair(pair_id).await? else {
            return Ok(RelayOutcome::Skipped);
        };
        let key = (pair_id, source_id.clone());
        self.pending.remove(&key);

        let Some(record) = self.correlations.get_correlation(pair_id, source_id).await? else {
            debug!(pair_id = %pair_id, source = %source_id, "delete of unrelayed message ignored");
            return Ok(RelayOutcome::Deleted { hops: Vec::new() });
        };

        let mut deleted = Vec::new();
        for hop in HOPS {
            let Some(id) = record.hop_id(hop) else {
                continue;
            };
            let ack = self
                .on_hop(
                    hop,
                    format!("{hop} delete"),
                    self.adapter(hop).delete(chat(&pair, hop), id),
                )
                .await?;
            if ack == HopAck::Done {
                deleted.push(hop);
            }
            self.correlations.clear_hop(pair_id, source_id, hop).await?;
        }

        if !deleted.is_empty() {
            info!(pair_id = %pair_id, source = %source_id, ?deleted, "deletion relayed");
        }
        Ok(RelayOutcome::Deleted { hops: deleted })
    }

    async fn handle_complete(
        &self,
        pair_id: PairId,
        source_id: &MessageId,
        supplied: Option<Content>,
    ) -> Result<RelayOutcome, FerryError> {
        let Some(pair) = self.deliverable_pair(pair_id).await? else {
            return Ok(RelayOutcome::Skipped);
        };
        let key = (pair_id, source_id.clone());
        let record = self
            .correlations
            .get_correlation(pair_id, source_id)
            .await?
            .ok_or_else(|| correlation_not_found(pair_id, source_id))?;

        match record.state() {
            MessageState::Deleted => {
                self.pending.remove(&key);
                return Ok(RelayOutcome::Skipped);
            }
            MessageState::Delivered => {
                self.pending.remove(&key);
                return Ok(RelayOutcome::Duplicate);
            }
            MessageState::PartiallyDelivered => {}
        }

        let content = match supplied {
            Some(content) => match self.apply_filter(pair_id, content) {
                Verdict::Deliver(content) => content,
                Verdict::Blocked(reason) => return Ok(RelayOutcome::Filtered { reason }),
            },
            None => self
                .pending
                .get(&key)
                .map(|pending| pending.content.clone())
                .ok_or_else(|| FerryError::NotFound {
                    kind: "pending delivery",
                    id: format!("{pair_id}/{source_id}"),
                })?,
        };

        let replies = self.reply_targets(pair_id, content.reply_to.as_ref()).await?;
        let destination = self
            .deliver_destination(&pair, source_id, content, replies.destination)
            .await?;
        info!(pair_id = %pair_id, source = %source_id, destination = %destination, "partial delivery completed");
        Ok(RelayOutcome::Completed { destination })
    }

    // --- internals ---

    async fn relay_new(
        &self,
        pair: &ForwardingPair,
        source_id: &MessageId,
        content: Content,
    ) -> Result<RelayOutcome, FerryError> {
        let pair_id = pair.id;
        if self
            .correlations
            .get_correlation(pair_id, source_id)
            .await?
            .is_some()
        {
            debug!(pair_id = %pair_id, source = %source_id, "message already relayed");
            return Ok(RelayOutcome::Duplicate);
        }

        let content = match self.apply_filter(pair_id, content) {
            Verdict::Deliver(content) => content,
            Verdict::Blocked(reason) => {
                info!(pair_id = %pair_id, source = %source_id, %reason, "message blocked by filter");
                return Ok(RelayOutcome::Filtered { reason });
            }
        };
        let replies = self.reply_targets(pair_id, content.reply_to.as_ref()).await?;

        let message = self
            .formatter
            .format(Hop::Relay, pair, &content, replies.relay);
        let relay_id = self
            .on_hop(Hop::Relay, "relay send", self.hops.relay.send(&pair.relay_chat, &message))
            .await?;

        let record = CorrelationRecord::relayed(pair_id, source_id.clone(), relay_id.clone());
        if let InsertOutcome::Existing(_) = self.correlations.insert_correlation(&record).await? {
            warn!(
                pair_id = %pair_id,
                source = %source_id,
                relay = %relay_id,
                "message was relayed concurrently, removing extra relay copy"
            );
            if let Err(e) = self
                .on_hop(Hop::Relay, "relay delete", self.hops.relay.delete(&pair.relay_chat, &relay_id))
                .await
            {
                warn!(pair_id = %pair_id, relay = %relay_id, error = %e, "extra relay copy left in place");
            }
            return Ok(RelayOutcome::Duplicate);
        }

        let destination = self
            .deliver_destination(pair, source_id, content, replies.destination)
            .await?;
        self.pairs.record_pair_activity(pair_id, Utc::now()).await?;

        info!(
            pair_id = %pair_id,
            source = %source_id,
            relay = %relay_id,
            destination = %destination,
            "message relayed"
        );
        Ok(RelayOutcome::Delivered {
            relay: relay_id,
            destination,
        })
    }

    /// Send hop 2 and record its id. The content stays pending until the
    /// send succeeds.
    async fn deliver_destination(
        &self,
        pair: &ForwardingPair,
        source_id: &MessageId,
        content: Content,
        reply_to: Option<MessageId>,
    ) -> Result<MessageId, FerryError> {
        let key = (pair.id, source_id.clone());
        let message = self
            .formatter
            .format(Hop::Destination, pair, &content, reply_to);
        self.pending.insert(
            key.clone(),
            PendingHop {
                content,
                queued_at: Instant::now(),
            },
        );

        let sent = self
            .on_hop(
                Hop::Destination,
                "destination send",
                self.hops.destination.send(&pair.destination_chat, &message),
            )
            .await;
        let destination = match sent {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    pair_id = %pair.id,
                    source = %source_id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "partial delivery: destination hop failed"
                );
                return Err(e);
            }
        };

        self.correlations
            .set_destination_id(pair.id, source_id, &destination)
            .await?;
        self.pending.remove(&key);
        Ok(destination)
    }

    /// The pair, if events for it should be delivered at all.
    ///
    /// `Ok(None)` for a pair an operator disabled. An orphaned, unassigned,
    /// or badly-hosted pair is `SessionUnavailable`.
    async fn deliverable_pair(
        &self,
        pair_id: PairId,
    ) -> Result<Option<ForwardingPair>, FerryError> {
        let resolution = self.scheduler.resolve_pair(pair_id).await?;
        if !resolution.pair.enabled && resolution.pair.status != PairStatus::Orphaned {
            debug!(pair_id = %pair_id, "pair disabled, skipping event");
            return Ok(None);
        }
        if let Err(e) = resolution.deliverable_session() {
            warn!(pair_id = %pair_id, error = %e, "delivery refused");
            return Err(e);
        }
        Ok(Some(resolution.pair))
    }

    fn apply_filter(&self, pair_id: PairId, content: Content) -> Verdict {
        match self.filter.decide(pair_id, &content) {
            FilterDecision::Allow => Verdict::Deliver(content),
            FilterDecision::Block { reason } => Verdict::Blocked(reason),
            FilterDecision::Replace(replacement) => Verdict::Deliver(Content {
                reply_to: replacement.reply_to.or(content.reply_to),
                text: replacement.text,
            }),
            FilterDecision::Warn(warning) => Verdict::Deliver(Content {
                text: format!("{warning}\n{}", content.text),
                reply_to: content.reply_to,
            }),
        }
    }

    /// Resolve a replied-to source message to its downstream copies.
    /// Unknown and deleted messages resolve to no reply.
    async fn reply_targets(
        &self,
        pair_id: PairId,
        reply_to: Option<&MessageId>,
    ) -> Result<ReplyTargets, FerryError> {
        let Some(source) = reply_to else {
            return Ok(ReplyTargets::default());
        };
        match self.correlations.get_correlation(pair_id, source).await? {
            Some(record) if record.deleted_at.is_none() => Ok(ReplyTargets {
                relay: record.relay_message_id,
                destination: record.destination_message_id,
            }),
            _ => {
                debug!(pair_id = %pair_id, reply_to = %source, "reply target unknown, sending without reply");
                Ok(ReplyTargets::default())
            }
        }
    }

    fn adapter(&self, hop: Hop) -> &dyn PlatformAdapter {
        match hop {
            Hop::Relay => self.hops.relay.as_ref(),
            Hop::Destination => self.hops.destination.as_ref(),
        }
    }

    /// Bound one platform call by the delivery timeout.
    async fn bounded<T>(
        &self,
        what: impl fmt::Display,
        call: impl Future<Output = Result<T, FerryError>>,
    ) -> Result<T, FerryError> {
        let limit = self.config.delivery_timeout();
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(call = %what, timeout_secs = limit.as_secs(), "platform call timed out");
                Err(FerryError::Timeout { duration: limit })
            }
        }
    }

    /// Bound one platform call on `hop`. A timeout is reported as a
    /// delivery failure of that hop.
    async fn on_hop<T>(
        &self,
        hop: Hop,
        what: impl fmt::Display,
        call: impl Future<Output = Result<T, FerryError>>,
    ) -> Result<T, FerryError> {
        self.bounded(what, call).await.map_err(|e| match e {
            timeout @ FerryError::Timeout { .. } => FerryError::DeliveryFailed {
                hop,
                message: timeout.to_string(),
                source: Some(Box::new(timeout)),
            },
            other => other,
        })
    }

    async fn serialized(
        &self,
        key: &MessageKey,
        work: impl Future<Output = Result<RelayOutcome, FerryError>>,
    ) -> Result<RelayOutcome, FerryError> {
        match self.sequencer.run(key, None, work).await {
            Sequenced::Ran(result) => result,
            Sequenced::Stale => Ok(RelayOutcome::Stale),
        }
    }
}

impl ReplyTargets {
    fn for_hop(&self, hop: Hop) -> Option<MessageId> {
        match hop {
            Hop::Relay => self.relay.clone(),
            Hop::Destination => self.destination.clone(),
        }
    }
}

fn chat(pair: &ForwardingPair, hop: Hop) -> &ChatRef {
    match hop {
        Hop::Relay => &pair.relay_chat,
        Hop::Destination => &pair.destination_chat,
    }
}

fn correlation_not_found(pair_id: PairId, source_id: &MessageId) -> FerryError {
    FerryError::NotFound {
        kind: "correlation",
        id: format!("{pair_id}/{source_id}"),
    }
}
