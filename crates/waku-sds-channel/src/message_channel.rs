//! The SDS protocol state machine for one channel.
//!
//! A [`MessageChannel`] is synchronous and owns all protocol state. It never
//! touches the network: the caller publishes what [`MessageChannel::prepare_message`]
//! and friends return, feeds decoded messages into [`MessageChannel::receive`],
//! and drains [`ChannelEvent`]s afterwards.

use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::time::Duration;

use bytes::Bytes;
use lru::LruCache;

use waku_sds_core::{
    BloomFilter, BloomFilterOptions, ChannelId, Clock, ContentMessage, EphemeralMessage,
    HistoryEntry, LamportClock, LamportTimestamp, Message, MessageId, SenderId, SyncMessage,
    SystemClock,
};
use waku_sds_history::LocalHistory;

use crate::error::{ChannelError, Result};
use crate::events::ChannelEvent;
use crate::repair::{RepairConfig, RepairManager, RepairStats};

/// Default number of recent history entries attached to outgoing messages.
pub const DEFAULT_CAUSAL_HISTORY_SIZE: usize = 200;

/// Default bloom hits needed to treat an outgoing message as acknowledged.
pub const DEFAULT_POSSIBLE_ACKS_THRESHOLD: u32 = 2;

/// Default time a buffered message waits for its dependencies.
pub const DEFAULT_RECEIVED_MESSAGE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default number of ids kept in each of the own, delivered and lost sets.
pub const DEFAULT_SEEN_IDS_CAPACITY: usize = 10_000;

/// Configuration for a message channel.
#[derive(Debug, Clone)]
pub struct MessageChannelConfig {
    /// Recent history entries attached to each outgoing message.
    pub causal_history_size: usize,
    /// Sizing of the seen-ids digest. Must match the other participants.
    pub bloom: BloomFilterOptions,
    /// Bloom hits after which an outgoing message counts as acknowledged.
    pub possible_acks_threshold: u32,
    /// Give up on the dependencies of a buffered message after this long.
    /// `None` waits until they arrive or are marked lost.
    pub received_message_timeout: Option<Duration>,
    /// Capacity of the recently seen id sets used for echo and duplicate
    /// detection. Ids evicted from these and from history are treated as new.
    pub seen_ids_capacity: usize,
    /// Enable SDS-R repair.
    pub repair: Option<RepairConfig>,
}

impl Default for MessageChannelConfig {
    fn default() -> Self {
        Self {
            causal_history_size: DEFAULT_CAUSAL_HISTORY_SIZE,
            bloom: BloomFilterOptions::default(),
            possible_acks_threshold: DEFAULT_POSSIBLE_ACKS_THRESHOLD,
            received_message_timeout: Some(DEFAULT_RECEIVED_MESSAGE_TIMEOUT),
            seen_ids_capacity: DEFAULT_SEEN_IDS_CAPACITY,
            repair: None,
        }
    }
}

impl MessageChannelConfig {
    pub fn with_causal_history_size(mut self, size: usize) -> Self {
        self.causal_history_size = size;
        self
    }

    pub fn with_possible_acks_threshold(mut self, threshold: u32) -> Self {
        self.possible_acks_threshold = threshold;
        self
    }

    pub fn with_received_message_timeout(mut self, timeout: Duration) -> Self {
        self.received_message_timeout = Some(timeout);
        self
    }

    /// Buffer messages until every dependency arrives or is marked lost.
    pub fn without_received_message_timeout(mut self) -> Self {
        self.received_message_timeout = None;
        self
    }

    pub fn with_seen_ids_capacity(mut self, capacity: usize) -> Self {
        self.seen_ids_capacity = capacity;
        self
    }

    pub fn with_repair(mut self, repair: RepairConfig) -> Self {
        self.repair = Some(repair);
        self
    }
}

/// What [`MessageChannel::receive`] did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Dependencies were met; the message is now in local history.
    Delivered,
    /// Waiting in the incoming buffer for these dependencies.
    Buffered { missing: Vec<HistoryEntry> },
    /// A sync message was processed; these dependencies are missing.
    SyncProcessed { missing: Vec<HistoryEntry> },
    EphemeralDelivered,
    /// Already seen.
    Duplicate,
    /// Our own message, echoed back by the transport.
    OwnMessage,
}

/// Result of [`MessageChannel::sweep_incoming_buffer`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncomingSweep {
    /// Buffered messages delivered by this sweep, in delivery order.
    pub delivered: Vec<MessageId>,
    /// Dependencies still missing.
    pub missing: Vec<HistoryEntry>,
    /// Dependencies given up on.
    pub lost: Vec<HistoryEntry>,
}

/// Result of [`MessageChannel::sweep_outgoing_buffer`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingSweep {
    /// Sent messages nobody has reported seeing.
    pub unacknowledged: Vec<ContentMessage>,
    /// Sent messages seen in at least one peer bloom filter.
    pub possibly_acknowledged: Vec<ContentMessage>,
}

/// Protocol state for one participant in one channel.
pub struct MessageChannel<H: LocalHistory, C: Clock = SystemClock> {
    channel_id: ChannelId,
    sender_id: SenderId,
    config: MessageChannelConfig,
    clock: LamportClock<C>,
    filter: BloomFilter,
    history: H,
    /// Own messages awaiting acknowledgment, oldest first.
    outgoing_buffer: Vec<ContentMessage>,
    /// Bloom hits per outgoing message.
    acknowledgements: HashMap<MessageId, u32>,
    /// Received messages with unmet dependencies.
    incoming_buffer: Vec<ContentMessage>,
    /// Wall time each buffered message was received.
    time_received: HashMap<MessageId, u64>,
    /// Ids we created.
    outgoing_ids: LruCache<MessageId, ()>,
    /// Ids recently added to history, kept past history eviction.
    delivered_ids: LruCache<MessageId, ()>,
    /// Dependencies given up on. Buffered messages do not wait for them.
    lost_ids: LruCache<MessageId, ()>,
    repair: Option<RepairManager>,
    events: VecDeque<ChannelEvent>,
}

impl<H: LocalHistory> MessageChannel<H, SystemClock> {
    pub fn new(
        channel_id: ChannelId,
        sender_id: SenderId,
        history: H,
        config: MessageChannelConfig,
    ) -> Result<Self> {
        Self::with_clock(channel_id, sender_id, history, config, SystemClock)
    }
}

impl<H: LocalHistory, C: Clock> MessageChannel<H, C> {
    /// Create a channel over an existing history.
    ///
    /// The bloom filter is seeded with every stored id and the Lamport clock
    /// starts past the newest stored message.
    pub fn with_clock(
        channel_id: ChannelId,
        sender_id: SenderId,
        history: H,
        config: MessageChannelConfig,
        clock: C,
    ) -> Result<Self> {
        let mut filter = BloomFilter::new(config.bloom.clone())?;
        let mut lamport = LamportClock::with_clock(clock);
        for message in history.messages() {
            filter.insert(message.message_id.as_str());
            lamport.observe(message.lamport_timestamp);
        }
        let repair = config
            .repair
            .clone()
            .map(|repair| RepairManager::new(sender_id.clone(), repair));

        let capacity = NonZeroUsize::new(config.seen_ids_capacity).unwrap_or(NonZeroUsize::MIN);

        tracing::info!(
            "Channel {} opened by {} with {} messages in history",
            channel_id,
            sender_id,
            history.len()
        );

        Ok(Self {
            channel_id,
            sender_id,
            config,
            clock: lamport,
            filter,
            history,
            outgoing_buffer: Vec::new(),
            acknowledgements: HashMap::new(),
            incoming_buffer: Vec::new(),
            time_received: HashMap::new(),
            outgoing_ids: LruCache::new(capacity),
            delivered_ids: LruCache::new(capacity),
            lost_ids: LruCache::new(capacity),
            repair,
            events: VecDeque::new(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sending
    // ─────────────────────────────────────────────────────────────────────────

    /// Build the next content message for `payload` and track it until it
    /// is acknowledged.
    pub fn prepare_message(&mut self, payload: impl Into<Bytes>) -> Result<ContentMessage> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(ChannelError::EmptyPayload);
        }

        let lamport_timestamp = self.clock.increment();
        let message_id = MessageId::from_payload(&payload);
        let now = self.clock.now_millis();

        let message = ContentMessage {
            message_id: message_id.clone(),
            channel_id: self.channel_id.clone(),
            sender_id: self.sender_id.clone(),
            lamport_timestamp,
            causal_history: self.causal_history(),
            bloom_filter: Some(Bytes::from(self.filter.to_bytes())),
            repair_request: self.take_repair_requests(now),
            content: payload,
            retrieval_hint: None,
        };

        self.outgoing_ids.put(message_id.clone(), ());
        if !self.is_pending_outgoing(&message_id) {
            self.outgoing_buffer.push(message.clone());
        }
        tracing::debug!(
            "Prepared {} at lamport {} with {} dependencies",
            message_id,
            lamport_timestamp,
            message.causal_history.len()
        );
        Ok(message)
    }

    /// Record that `message` was accepted by the transport.
    ///
    /// Calling this again for a retry only refreshes the retrieval hint.
    pub fn mark_sent(
        &mut self,
        message: &ContentMessage,
        retrieval_hint: Option<Bytes>,
    ) -> Result<()> {
        let id = &message.message_id;
        self.outgoing_ids.put(id.clone(), ());
        self.filter.insert(id.as_str());

        if let Some(pending) = self.outgoing_buffer.iter_mut().find(|m| &m.message_id == id) {
            if retrieval_hint.is_some() {
                pending.retrieval_hint = retrieval_hint.clone();
            }
        }

        if self.history.contains(id) {
            return Ok(());
        }

        let mut stored = message.clone();
        stored.repair_request.clear();
        stored.retrieval_hint = retrieval_hint;
        self.history.push(vec![stored])?;
        self.delivered_ids.put(id.clone(), ());
        self.events.push_back(ChannelEvent::OutMessageSent {
            message_id: id.clone(),
        });
        Ok(())
    }

    /// A heartbeat carrying our causal history and digest.
    ///
    /// Returns `None` while local history is empty: there is nothing to
    /// sync yet.
    pub fn build_sync_message(&mut self) -> Option<SyncMessage> {
        if self.history.is_empty() {
            return None;
        }
        let lamport_timestamp = self.clock.increment();
        let now = self.clock.now_millis();
        let message_id = MessageId::from_payload(
            format!("{}:sync:{}", self.sender_id, lamport_timestamp).as_bytes(),
        );
        Some(SyncMessage {
            message_id,
            channel_id: self.channel_id.clone(),
            sender_id: self.sender_id.clone(),
            lamport_timestamp,
            causal_history: self.causal_history(),
            bloom_filter: Some(Bytes::from(self.filter.to_bytes())),
            repair_request: self.take_repair_requests(now),
        })
    }

    /// A best-effort message outside the causal order.
    pub fn build_ephemeral_message(
        &self,
        payload: impl Into<Bytes>,
    ) -> Result<EphemeralMessage> {
        let content = payload.into();
        if content.is_empty() {
            return Err(ChannelError::EmptyPayload);
        }
        Ok(EphemeralMessage {
            message_id: MessageId::from_payload(&content),
            channel_id: self.channel_id.clone(),
            sender_id: self.sender_id.clone(),
            content,
        })
    }

    fn causal_history(&self) -> Vec<HistoryEntry> {
        self.history
            .recent(self.config.causal_history_size)
            .iter()
            .map(ContentMessage::history_entry)
            .collect()
    }

    fn take_repair_requests(&mut self, now: u64) -> Vec<HistoryEntry> {
        match self.repair.as_mut() {
            Some(repair) => repair.repair_requests(now),
            None => Vec::new(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Receiving
    // ─────────────────────────────────────────────────────────────────────────

    /// Process a decoded message.
    ///
    /// `retrieval_hint` is where the transport says this message can be
    /// fetched again; it is kept with the message in history.
    pub fn receive(
        &mut self,
        message: Message,
        retrieval_hint: Option<Bytes>,
    ) -> Result<ReceiveOutcome> {
        if message.channel_id() != &self.channel_id {
            return Err(ChannelError::ChannelMismatch {
                expected: self.channel_id.clone(),
                actual: message.channel_id().clone(),
                message_id: message.message_id().clone(),
            });
        }

        match message {
            Message::Ephemeral(message) => Ok(self.receive_ephemeral(message)),
            Message::Sync(message) => Ok(self.receive_sync(message)),
            Message::Content(message) => self.receive_content(message, retrieval_hint),
        }
    }

    fn receive_ephemeral(&mut self, message: EphemeralMessage) -> ReceiveOutcome {
        if message.sender_id == self.sender_id {
            return ReceiveOutcome::OwnMessage;
        }
        self.events
            .push_back(ChannelEvent::InEphemeralDelivered(message));
        ReceiveOutcome::EphemeralDelivered
    }

    fn receive_sync(&mut self, message: SyncMessage) -> ReceiveOutcome {
        if message.sender_id == self.sender_id {
            return ReceiveOutcome::OwnMessage;
        }
        tracing::debug!("Sync {} from {}", message.message_id, message.sender_id);
        self.events.push_back(ChannelEvent::InSyncReceived {
            message_id: message.message_id.clone(),
            sender_id: message.sender_id.clone(),
        });

        self.review_ack_status(&message.causal_history, message.bloom_filter.as_ref());
        self.process_repair_requests(&message.repair_request);
        self.clock.observe(message.lamport_timestamp);

        let missing = self.missing_dependencies(&message.causal_history);
        self.report_missing(&missing);
        ReceiveOutcome::SyncProcessed { missing }
    }

    fn receive_content(
        &mut self,
        mut message: ContentMessage,
        retrieval_hint: Option<Bytes>,
    ) -> Result<ReceiveOutcome> {
        let id = message.message_id.clone();
        if let Some(repair) = self.repair.as_mut() {
            repair.mark_message_received(&id);
        }

        if self.outgoing_ids.contains(&id) {
            return Ok(ReceiveOutcome::OwnMessage);
        }
        if self.is_buffered(&id) || self.is_delivered(&id) {
            tracing::debug!("Ignoring duplicate {}", id);
            return Ok(ReceiveOutcome::Duplicate);
        }

        message.retrieval_hint = retrieval_hint;
        let unmet = message
            .causal_history
            .iter()
            .filter(|entry| !self.is_resolved(&entry.message_id))
            .count();
        if unmet == 0 {
            // Nothing is recorded until history accepts the message, so a
            // failed write leaves a later copy free to be processed again.
            self.store(&message)?;
            self.accept(&message);
            self.complete_delivery(&message);
            return Ok(ReceiveOutcome::Delivered);
        }

        self.accept(&message);
        // Dependencies already buffered are not missing, only undelivered.
        let missing = self.missing_dependencies(&message.causal_history);
        tracing::debug!("Buffering {}: {} dependencies undelivered", id, unmet);
        self.time_received.insert(id, self.clock.now_millis());
        self.incoming_buffer.push(message);
        self.report_missing(&missing);
        Ok(ReceiveOutcome::Buffered { missing })
    }

    /// Side effects of first sight of a content message.
    fn accept(&mut self, message: &ContentMessage) {
        self.events.push_back(ChannelEvent::InMessageReceived {
            message_id: message.message_id.clone(),
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
        });
        self.review_ack_status(&message.causal_history, message.bloom_filter.as_ref());
        self.filter.insert(message.message_id.as_str());
        self.process_repair_requests(&message.repair_request);
    }

    fn is_buffered(&self, id: &MessageId) -> bool {
        self.time_received.contains_key(id)
    }

    fn is_delivered(&self, id: &MessageId) -> bool {
        self.history.contains(id) || self.delivered_ids.contains(id)
    }

    /// Whether a dependency no longer holds back delivery.
    fn is_resolved(&self, id: &MessageId) -> bool {
        self.is_delivered(id) || self.lost_ids.contains(id)
    }

    /// Dependencies we neither hold nor are waiting to deliver.
    fn missing_dependencies(&self, causal_history: &[HistoryEntry]) -> Vec<HistoryEntry> {
        causal_history
            .iter()
            .filter(|entry| !self.is_resolved(&entry.message_id))
            .filter(|entry| {
                !self
                    .incoming_buffer
                    .iter()
                    .any(|m| m.message_id == entry.message_id)
            })
            .cloned()
            .collect()
    }

    fn report_missing(&mut self, missing: &[HistoryEntry]) {
        if missing.is_empty() {
            return;
        }
        if let Some(repair) = self.repair.as_mut() {
            let now = self.clock.now_millis();
            for (message_id, t_req) in repair.mark_dependencies_missing(missing, now) {
                self.events
                    .push_back(ChannelEvent::RepairRequestQueued { message_id, t_req });
            }
        }
        self.events.push_back(ChannelEvent::InMessageMissing {
            entries: missing.to_vec(),
        });
    }

    fn process_repair_requests(&mut self, requests: &[HistoryEntry]) {
        if requests.is_empty() {
            return;
        }
        if let Some(repair) = self.repair.as_mut() {
            let now = self.clock.now_millis();
            for (message_id, t_resp) in
                repair.process_incoming_requests(requests, &self.history, now)
            {
                self.events
                    .push_back(ChannelEvent::RepairResponseQueued { message_id, t_resp });
            }
        }
    }

    fn store(&mut self, message: &ContentMessage) -> Result<()> {
        let mut stored = message.clone();
        stored.repair_request.clear();
        self.history.push(vec![stored])?;
        Ok(())
    }

    /// Deliver a message taken out of the incoming buffer.
    ///
    /// If history rejects it the message is dropped and forgotten; a copy
    /// retrieved later starts over.
    fn deliver(&mut self, message: ContentMessage) -> Result<()> {
        if let Err(e) = self.store(&message) {
            tracing::warn!("Dropping {}: {}", message.message_id, e);
            self.time_received.remove(&message.message_id);
            return Err(e);
        }
        self.complete_delivery(&message);
        Ok(())
    }

    /// Bookkeeping once `message` is in history.
    fn complete_delivery(&mut self, message: &ContentMessage) {
        let id = &message.message_id;
        self.time_received.remove(id);
        self.lost_ids.pop(id);
        self.delivered_ids.put(id.clone(), ());
        self.clock.observe(message.lamport_timestamp);
        self.events.push_back(ChannelEvent::InMessageDelivered {
            message_id: id.clone(),
            sender_id: message.sender_id.clone(),
            content: message.content.clone(),
        });
    }

    /// Give up on dependencies that cannot be retrieved.
    ///
    /// Buffered messages waiting only on these are delivered by the next
    /// [`Self::sweep_incoming_buffer`]. No event is emitted; the caller has
    /// already reported them. A marked id that arrives later is still
    /// delivered normally.
    pub fn mark_lost(&mut self, ids: impl IntoIterator<Item = MessageId>) {
        for id in ids {
            if self.is_delivered(&id) {
                continue;
            }
            if let Some(repair) = self.repair.as_mut() {
                repair.mark_message_received(&id);
            }
            tracing::debug!("Marking {} lost", id);
            self.lost_ids.put(id, ());
        }
    }

    /// Settle our outgoing messages against what a peer reports having seen.
    fn review_ack_status(&mut self, causal_history: &[HistoryEntry], bloom: Option<&Bytes>) {
        for entry in causal_history {
            if self.remove_outgoing(&entry.message_id) {
                tracing::debug!("{} acknowledged by reference", entry.message_id);
                self.events.push_back(ChannelEvent::OutMessageAcknowledged {
                    message_id: entry.message_id.clone(),
                });
            }
        }

        let Some(bytes) = bloom else {
            return;
        };
        let filter = match BloomFilter::from_bytes(bytes, self.config.bloom.clone()) {
            Ok(filter) => filter,
            Err(e) => {
                tracing::warn!("Ignoring peer bloom filter: {}", e);
                return;
            }
        };

        let threshold = self.config.possible_acks_threshold;
        let hits: Vec<MessageId> = self
            .outgoing_buffer
            .iter()
            .filter(|m| filter.lookup(m.message_id.as_str()))
            .map(|m| m.message_id.clone())
            .collect();

        for message_id in hits {
            let count = self.acknowledgements.entry(message_id.clone()).or_insert(0);
            *count += 1;
            let count = *count;
            if count < threshold {
                self.events
                    .push_back(ChannelEvent::OutMessagePossiblyAcknowledged { message_id, count });
            } else {
                tracing::debug!("{} acknowledged after {} bloom hits", message_id, count);
                self.remove_outgoing(&message_id);
                self.events
                    .push_back(ChannelEvent::OutMessageAcknowledged { message_id });
            }
        }
    }

    fn remove_outgoing(&mut self, id: &MessageId) -> bool {
        let before = self.outgoing_buffer.len();
        self.outgoing_buffer.retain(|m| &m.message_id != id);
        self.acknowledgements.remove(id);
        self.outgoing_buffer.len() != before
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Periodic work
    // ─────────────────────────────────────────────────────────────────────────

    /// Deliver buffered messages whose dependencies arrived.
    ///
    /// Delivery cascades: a message delivered here can unblock others in the
    /// same sweep. With a receive timeout configured, expired messages are
    /// delivered without their dependencies, which are reported lost.
    pub fn sweep_incoming_buffer(&mut self) -> Result<IncomingSweep> {
        let mut sweep = IncomingSweep::default();

        loop {
            self.deliver_ready(&mut sweep)?;
            if !self.deliver_expired(&mut sweep)? {
                break;
            }
        }

        let mut seen = HashSet::new();
        for message in &self.incoming_buffer {
            for entry in self.missing_dependencies(&message.causal_history) {
                if seen.insert(entry.message_id.clone()) {
                    sweep.missing.push(entry);
                }
            }
        }

        if !sweep.lost.is_empty() {
            self.events.push_back(ChannelEvent::InMessageLost {
                entries: sweep.lost.clone(),
            });
        }
        if !sweep.missing.is_empty() {
            self.events.push_back(ChannelEvent::InMessageMissing {
                entries: sweep.missing.clone(),
            });
        }
        Ok(sweep)
    }

    fn deliver_ready(&mut self, sweep: &mut IncomingSweep) -> Result<()> {
        loop {
            self.incoming_buffer.sort_by(|a, b| a.compare(b));
            let ready = self.incoming_buffer.iter().position(|m| {
                m.causal_history
                    .iter()
                    .all(|entry| self.is_resolved(&entry.message_id))
            });
            let Some(index) = ready else {
                return Ok(());
            };
            let message = self.incoming_buffer.remove(index);
            let id = message.message_id.clone();
            self.deliver(message)?;
            sweep.delivered.push(id);
        }
    }

    /// Returns whether anything was delivered.
    fn deliver_expired(&mut self, sweep: &mut IncomingSweep) -> Result<bool> {
        let Some(timeout) = self.config.received_message_timeout else {
            return Ok(false);
        };
        let timeout = timeout.as_millis().min(u128::from(u64::MAX)) as u64;
        let now = self.clock.now_millis();

        let (mut expired, waiting): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.incoming_buffer)
                .into_iter()
                .partition(|m| {
                    self.time_received
                        .get(&m.message_id)
                        .is_some_and(|&at| now.saturating_sub(at) > timeout)
                });
        self.incoming_buffer = waiting;
        if expired.is_empty() {
            return Ok(false);
        }

        expired.sort_by(|a, b| a.compare(b));
        let mut expired = expired.into_iter();
        while let Some(message) = expired.next() {
            let lost = self.missing_dependencies(&message.causal_history);
            for entry in lost {
                self.lost_ids.put(entry.message_id.clone(), ());
                if !sweep.lost.iter().any(|l| l.message_id == entry.message_id) {
                    sweep.lost.push(entry);
                }
            }
            tracing::warn!(
                "Delivering {} without its dependencies after {} ms",
                message.message_id,
                timeout
            );
            if let Some(repair) = self.repair.as_mut() {
                for entry in &message.causal_history {
                    repair.mark_message_received(&entry.message_id);
                }
            }
            let id = message.message_id.clone();
            if let Err(e) = self.deliver(message) {
                self.incoming_buffer.extend(expired);
                return Err(e);
            }
            sweep.delivered.push(id);
        }
        Ok(true)
    }

    /// Partition our unacknowledged messages by whether any peer digest
    /// contained them.
    pub fn sweep_outgoing_buffer(&self) -> OutgoingSweep {
        let (possibly_acknowledged, unacknowledged) = self
            .outgoing_buffer
            .iter()
            .cloned()
            .partition(|m| self.acknowledgements.get(&m.message_id).copied().unwrap_or(0) > 0);
        OutgoingSweep {
            unacknowledged,
            possibly_acknowledged,
        }
    }

    /// Messages this participant should rebroadcast now for SDS-R.
    pub fn sweep_repair_responses(&mut self) -> Vec<ContentMessage> {
        let now = self.clock.now_millis();
        match self.repair.as_mut() {
            Some(repair) => repair.sweep_incoming(&self.history, now),
            None => Vec::new(),
        }
    }

    /// Drain queued events.
    pub fn take_events(&mut self) -> Vec<ChannelEvent> {
        self.events.drain(..).collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    pub fn sender_id(&self) -> &SenderId {
        &self.sender_id
    }

    pub fn config(&self) -> &MessageChannelConfig {
        &self.config
    }

    pub fn history(&self) -> &H {
        &self.history
    }

    pub fn lamport_timestamp(&self) -> LamportTimestamp {
        self.clock.current()
    }

    pub fn bloom_filter(&self) -> &BloomFilter {
        &self.filter
    }

    pub fn is_pending_outgoing(&self, id: &MessageId) -> bool {
        self.outgoing_buffer.iter().any(|m| &m.message_id == id)
    }

    pub fn outgoing_len(&self) -> usize {
        self.outgoing_buffer.len()
    }

    pub fn is_lost(&self, id: &MessageId) -> bool {
        self.lost_ids.contains(id)
    }

    pub fn incoming_len(&self) -> usize {
        self.incoming_buffer.len()
    }

    pub fn repair(&self) -> Option<&RepairManager> {
        self.repair.as_ref()
    }

    pub fn repair_mut(&mut self) -> Option<&mut RepairManager> {
        self.repair.as_mut()
    }

    pub fn repair_stats(&self) -> Option<RepairStats> {
        self.repair.as_ref().map(RepairManager::stats)
    }
}
