//! The reliable channel: SDS driven over a live pub/sub network.
//!
//! A [`ReliableChannel`] owns one [`MessageChannel`] and runs the tasks
//! around it: pumping the subscription, resending unacknowledged messages,
//! retrieving missing dependencies from a store, sweeping the incoming
//! buffer, sending sync messages and answering repair requests.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use waku_sds_channel::{ChannelEvent, MessageChannel, MessageChannelConfig};
use waku_sds_core::{ChannelId, Clock, ContentMessage, Message, MessageId, SenderId, SystemClock};
use waku_sds_history::LocalHistory;

use crate::encryption::{Encryption, PassThrough};
use crate::error::{ReliableChannelError, Result};
use crate::events::ReliableChannelEvent;
use crate::missing::{MissingMessageConfig, MissingMessageTracker};
use crate::retry::{AttemptResult, RetryManager, RetryOutcome};
use crate::sync_status::{SyncStatusEvent, SyncStatusTracker};
use crate::transport::{IncomingPayload, Publisher, Retriever, Subscriber};

const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Configuration for a reliable channel.
///
/// A zero interval disables the corresponding background task.
#[derive(Debug, Clone)]
pub struct ReliableChannelConfig {
    /// Base interval for sync messages.
    pub sync_min_interval: Duration,
    /// Time between resends of an unacknowledged message.
    pub retry_interval: Duration,
    pub max_retry_attempts: u32,
    /// How often missing dependencies are queried from the store.
    pub retrieve_frequency: Duration,
    pub sweep_in_buf_interval: Duration,
    /// How often due repair responses are rebroadcast.
    pub repair_sweep_interval: Duration,
    /// Capacity of the consumer event channel.
    pub event_capacity: usize,
    /// Protocol configuration.
    pub channel: MessageChannelConfig,
    /// Store retrieval configuration.
    pub missing: MissingMessageConfig,
}

impl Default for ReliableChannelConfig {
    fn default() -> Self {
        Self {
            sync_min_interval: Duration::from_secs(30),
            retry_interval: Duration::from_secs(30),
            max_retry_attempts: 10,
            retrieve_frequency: Duration::from_secs(10),
            sweep_in_buf_interval: Duration::from_secs(5),
            repair_sweep_interval: Duration::from_secs(5),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            channel: MessageChannelConfig::default(),
            missing: MissingMessageConfig::default(),
        }
    }
}

impl ReliableChannelConfig {
    pub fn with_sync_min_interval(mut self, interval: Duration) -> Self {
        self.sync_min_interval = interval;
        self
    }

    pub fn with_retry(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.retry_interval = interval;
        self.max_retry_attempts = max_attempts;
        self
    }

    pub fn with_retrieve_frequency(mut self, frequency: Duration) -> Self {
        self.retrieve_frequency = frequency;
        self
    }

    pub fn with_sweep_in_buf_interval(mut self, interval: Duration) -> Self {
        self.sweep_in_buf_interval = interval;
        self
    }

    pub fn with_repair_sweep_interval(mut self, interval: Duration) -> Self {
        self.repair_sweep_interval = interval;
        self
    }

    pub fn with_channel(mut self, channel: MessageChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_missing(mut self, missing: MissingMessageConfig) -> Self {
        self.missing = missing;
        self
    }
}

/// The network-facing pieces a reliable channel runs on.
#[derive(Clone)]
pub struct Collaborators {
    pub publisher: Arc<dyn Publisher>,
    pub subscriber: Arc<dyn Subscriber>,
    /// Without a retriever, missing dependencies can only arrive by
    /// rebroadcast.
    pub retriever: Option<Arc<dyn Retriever>>,
    pub encryption: Arc<dyn Encryption>,
}

impl Collaborators {
    pub fn new(publisher: Arc<dyn Publisher>, subscriber: Arc<dyn Subscriber>) -> Self {
        Self {
            publisher,
            subscriber,
            retriever: None,
            encryption: Arc::new(PassThrough),
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_encryption(mut self, encryption: Arc<dyn Encryption>) -> Self {
        self.encryption = encryption;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Stopped,
    Starting,
    Running,
}

struct RunningTasks {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    runtime: Handle,
}

struct Inner<H: LocalHistory, C: Clock> {
    channel_id: ChannelId,
    sender_id: SenderId,
    config: ReliableChannelConfig,
    collaborators: Collaborators,
    channel: Mutex<MessageChannel<H, C>>,
    state: Mutex<ChannelState>,
    /// Serializes start and stop.
    lifecycle: tokio::sync::Mutex<()>,
    tasks: Mutex<Option<RunningTasks>>,
    events: broadcast::Sender<ReliableChannelEvent>,
    sync_status: SyncStatusTracker,
    missing: Option<Arc<MissingMessageTracker>>,
    retries: RetryManager,
    sync_multiplier: Mutex<f64>,
    sync_restart: Notify,
}

/// A channel with retries, store retrieval and sync status on top of SDS.
///
/// Cheap to clone; clones drive the same channel.
pub struct ReliableChannel<H: LocalHistory + 'static, C: Clock + 'static = SystemClock> {
    inner: Arc<Inner<H, C>>,
}

impl<H: LocalHistory + 'static, C: Clock + 'static> Clone for ReliableChannel<H, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: LocalHistory + 'static> ReliableChannel<H, SystemClock> {
    pub fn new(
        channel_id: ChannelId,
        sender_id: SenderId,
        history: H,
        collaborators: Collaborators,
        config: ReliableChannelConfig,
    ) -> Result<Self> {
        Self::with_clock(
            channel_id,
            sender_id,
            history,
            collaborators,
            config,
            SystemClock,
        )
    }

    /// Create and start a channel.
    pub async fn create(
        channel_id: ChannelId,
        sender_id: SenderId,
        history: H,
        collaborators: Collaborators,
        config: ReliableChannelConfig,
    ) -> Result<Self> {
        let channel = Self::new(channel_id, sender_id, history, collaborators, config)?;
        channel.start().await?;
        Ok(channel)
    }
}

impl<H: LocalHistory + 'static, C: Clock + Clone + 'static> ReliableChannel<H, C> {
    pub fn with_clock(
        channel_id: ChannelId,
        sender_id: SenderId,
        history: H,
        collaborators: Collaborators,
        config: ReliableChannelConfig,
        clock: C,
    ) -> Result<Self> {
        let channel = MessageChannel::with_clock(
            channel_id.clone(),
            sender_id.clone(),
            history,
            config.channel.clone(),
            clock.clone(),
        )?;
        let missing = collaborators.retriever.clone().map(|retriever| {
            Arc::new(MissingMessageTracker::with_clock(
                sender_id.clone(),
                retriever,
                config.missing.clone(),
                Arc::new(clock),
            ))
        });
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let sync_status = SyncStatusTracker::with_capacity(config.channel.seen_ids_capacity);

        Ok(Self {
            inner: Arc::new(Inner {
                channel_id,
                sender_id,
                retries: RetryManager::new(config.retry_interval, config.max_retry_attempts),
                config,
                collaborators,
                channel: Mutex::new(channel),
                state: Mutex::new(ChannelState::Stopped),
                lifecycle: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(None),
                events,
                sync_status,
                missing,
                sync_multiplier: Mutex::new(1.0),
                sync_restart: Notify::new(),
            }),
        })
    }
}

impl<H: LocalHistory + 'static, C: Clock + 'static> ReliableChannel<H, C> {
    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Subscribe and spawn the background tasks. No-op if already running.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        {
            let mut state = self.inner.state.lock();
            if *state != ChannelState::Stopped {
                return Ok(());
            }
            *state = ChannelState::Starting;
        }

        let subscription = match self.inner.collaborators.subscriber.subscribe().await {
            Ok(rx) => rx,
            Err(e) => {
                *self.inner.state.lock() = ChannelState::Stopped;
                return Err(e.into());
            }
        };

        let token = CancellationToken::new();
        let inner = &self.inner;
        let config = &inner.config;
        let mut handles = vec![tokio::spawn(
            Arc::clone(inner).pump(subscription, token.clone()),
        )];

        if let Some(tracker) = &inner.missing {
            if !config.retrieve_frequency.is_zero() {
                handles.push(tokio::spawn(Arc::clone(inner).retrieval_loop(
                    Arc::clone(tracker),
                    token.clone(),
                )));
            }
        }
        if !config.sweep_in_buf_interval.is_zero() {
            handles.push(tokio::spawn(Arc::clone(inner).sweep_loop(token.clone())));
        }
        if !config.sync_min_interval.is_zero() {
            handles.push(tokio::spawn(Arc::clone(inner).sync_loop(token.clone())));
        }
        if config.channel.repair.is_some() && !config.repair_sweep_interval.is_zero() {
            handles.push(tokio::spawn(Arc::clone(inner).repair_loop(token.clone())));
        }

        *inner.tasks.lock() = Some(RunningTasks {
            token,
            handles,
            runtime: Handle::current(),
        });
        *inner.state.lock() = ChannelState::Running;
        tracing::info!(
            "Reliable channel {} started for {}",
            inner.channel_id,
            inner.sender_id
        );
        Ok(())
    }

    /// Cancel every task and pending retry, wait for them to wind down and
    /// clear sync status. No-op if not running.
    pub async fn stop(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let tasks = {
            let mut state = self.inner.state.lock();
            if *state != ChannelState::Running {
                return;
            }
            *state = ChannelState::Stopped;
            self.inner.tasks.lock().take()
        };

        if let Some(tasks) = tasks {
            tasks.token.cancel();
            self.inner.retries.stop_all();
            if let Some(tracker) = &self.inner.missing {
                tracker.stop().await;
            }
            for result in futures::future::join_all(tasks.handles).await {
                if let Err(e) = result {
                    if e.is_panic() {
                        tracing::error!("Channel task panicked: {}", e);
                    }
                }
            }
        }
        self.inner.sync_status.clean_up();
        tracing::info!("Reliable channel {} stopped", self.inner.channel_id);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sending
    // ─────────────────────────────────────────────────────────────────────────

    /// Queue `payload` for reliable delivery and return its id.
    ///
    /// Publishing happens in the background; watch [`Self::subscribe`] for
    /// `OutMessageSent`, `OutMessageAcknowledged` or an error event.
    pub fn send(&self, payload: impl Into<Bytes>) -> Result<MessageId> {
        let payload = payload.into();
        if payload.is_empty() {
            self.inner.emit(ReliableChannelEvent::OutMessageIrrecoverableError {
                message_id: None,
                error: ReliableChannelError::EmptyPayload.to_string(),
            });
            return Err(ReliableChannelError::EmptyPayload);
        }
        let Some((runtime, token)) = self.inner.running() else {
            self.inner.emit(ReliableChannelEvent::OutMessageIrrecoverableError {
                message_id: Some(MessageId::from_payload(&payload)),
                error: ReliableChannelError::NotRunning.to_string(),
            });
            return Err(ReliableChannelError::NotRunning);
        };

        let message = self.inner.channel.lock().prepare_message(payload)?;
        let message_id = message.message_id.clone();
        let retry_token = self.inner.retries.register(message_id.clone(), &token);
        runtime.spawn(Arc::clone(&self.inner).send_with_retries(message, retry_token));
        Ok(message_id)
    }

    /// Publish `payload` once, outside the causal order. Nothing is
    /// retried or acknowledged.
    pub async fn send_ephemeral(&self, payload: impl Into<Bytes>) -> Result<MessageId> {
        if self.inner.running().is_none() {
            return Err(ReliableChannelError::NotRunning);
        }
        let message = {
            let channel = self.inner.channel.lock();
            channel.build_ephemeral_message(payload)?
        };
        let message_id = message.message_id.clone();
        let bytes = self.inner.wrap(&Message::Ephemeral(message))?;
        self.inner.collaborators.publisher.publish(bytes).await?;
        Ok(message_id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Observation
    // ─────────────────────────────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<ReliableChannelEvent> {
        self.inner.events.subscribe()
    }

    pub fn subscribe_sync_status(&self) -> broadcast::Receiver<SyncStatusEvent> {
        self.inner.sync_status.subscribe()
    }

    pub fn sync_status(&self) -> &SyncStatusTracker {
        &self.inner.sync_status
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.inner.channel_id
    }

    pub fn sender_id(&self) -> &SenderId {
        &self.inner.sender_id
    }

    pub fn state(&self) -> ChannelState {
        *self.inner.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ChannelState::Running
    }

    pub fn is_retrying(&self, message_id: &MessageId) -> bool {
        self.inner.retries.is_retrying(message_id)
    }

    pub fn missing_tracker(&self) -> Option<&MissingMessageTracker> {
        self.inner.missing.as_deref()
    }

    /// Inspect the protocol state.
    ///
    /// The channel is locked for the duration of `f`.
    pub fn with_message_channel<R>(&self, f: impl FnOnce(&MessageChannel<H, C>) -> R) -> R {
        f(&self.inner.channel.lock())
    }
}

impl<H: LocalHistory + 'static, C: Clock + 'static> Inner<H, C> {
    fn running(&self) -> Option<(Handle, CancellationToken)> {
        if *self.state.lock() != ChannelState::Running {
            return None;
        }
        self.tasks
            .lock()
            .as_ref()
            .map(|tasks| (tasks.runtime.clone(), tasks.token.clone()))
    }

    fn emit(&self, event: ReliableChannelEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("No reliable channel subscribers");
        }
    }

    fn wrap(&self, message: &Message) -> Result<Bytes> {
        let encrypted = self.collaborators.encryption.encrypt(&message.encode())?;
        Ok(Bytes::from(encrypted))
    }

    fn restart_sync(&self, multiplier: f64) {
        *self.sync_multiplier.lock() = multiplier;
        self.sync_restart.notify_one();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Outgoing
    // ─────────────────────────────────────────────────────────────────────────

    async fn send_with_retries(self: Arc<Self>, message: ContentMessage, token: CancellationToken) {
        let message_id = message.message_id.clone();
        let bytes = match self.wrap(&Message::Content(message.clone())) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Cannot wrap {}: {}", message_id, e);
                self.emit(ReliableChannelEvent::OutMessageIrrecoverableError {
                    message_id: Some(message_id.clone()),
                    error: e.to_string(),
                });
                self.retries.finish(&message_id);
                return;
            }
        };

        let outcome = self
            .retries
            .run(token, |attempt| {
                let inner = Arc::clone(&self);
                let message = message.clone();
                let bytes = bytes.clone();
                async move { inner.publish_attempt(&message, bytes, attempt).await }
            })
            .await;

        match outcome {
            RetryOutcome::Done => self.retries.finish(&message_id),
            RetryOutcome::Cancelled => {}
            RetryOutcome::Exhausted => {
                self.retries.finish(&message_id);
                if self.channel.lock().is_pending_outgoing(&message_id) {
                    tracing::warn!(
                        "{} unacknowledged after {} attempts",
                        message_id,
                        self.retries.max_attempts()
                    );
                    self.emit(ReliableChannelEvent::OutMessageRetriesError { message_id });
                }
            }
        }
    }

    async fn publish_attempt(
        &self,
        message: &ContentMessage,
        bytes: Bytes,
        attempt: u32,
    ) -> AttemptResult {
        let message_id = &message.message_id;
        if !self.channel.lock().is_pending_outgoing(message_id) {
            return AttemptResult::Done;
        }

        self.emit(ReliableChannelEvent::OutMessageSending {
            message_id: message_id.clone(),
        });
        match self.collaborators.publisher.publish(bytes).await {
            Ok(ack) => {
                let mut channel = self.channel.lock();
                if let Err(e) = channel.mark_sent(message, ack.retrieval_hint) {
                    tracing::error!("Failed to record {} as sent: {}", message_id, e);
                }
                let events = channel.take_events();
                self.handle_events(events);
                AttemptResult::Continue
            }
            Err(e) if e.is_irrecoverable() => {
                tracing::error!("Cannot send {}: {}", message_id, e);
                self.emit(ReliableChannelEvent::OutMessageIrrecoverableError {
                    message_id: Some(message_id.clone()),
                    error: e.to_string(),
                });
                AttemptResult::Done
            }
            Err(e) => {
                tracing::warn!("Attempt {} to send {} failed: {}", attempt + 1, message_id, e);
                AttemptResult::Continue
            }
        }
    }

    async fn send_sync(&self) {
        let message = {
            let mut channel = self.channel.lock();
            channel.build_sync_message()
        };
        let Some(message) = message else {
            tracing::debug!("Nothing to sync yet");
            return;
        };
        let message_id = message.message_id.clone();
        let bytes = match self.wrap(&Message::Sync(message)) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Cannot wrap sync message: {}", e);
                return;
            }
        };
        match self.collaborators.publisher.publish(bytes).await {
            Ok(_) => tracing::debug!("Sent sync {}", message_id),
            Err(e) => tracing::warn!("Failed to send sync message: {}", e),
        }
    }

    async fn rebroadcast_repairs(&self) {
        let responses = {
            let mut channel = self.channel.lock();
            channel.sweep_repair_responses()
        };
        for message in responses {
            let message_id = message.message_id.clone();
            let bytes = match self.wrap(&Message::Content(message)) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!("Cannot wrap repair {}: {}", message_id, e);
                    continue;
                }
            };
            match self.collaborators.publisher.publish(bytes).await {
                Ok(_) => tracing::debug!("Rebroadcast {} for repair", message_id),
                Err(e) => tracing::warn!("Repair rebroadcast of {} failed: {}", message_id, e),
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Incoming
    // ─────────────────────────────────────────────────────────────────────────

    /// Decrypt, decode and apply one payload. Malformed input is dropped.
    fn process_incoming(&self, payload: &[u8], retrieval_hint: Option<Bytes>) {
        let plaintext = match self.collaborators.encryption.decrypt(payload) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::warn!("Dropping payload: {}", e);
                return;
            }
        };
        let message = match Message::decode(&plaintext) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Dropping undecodable payload: {}", e);
                return;
            }
        };
        if message.channel_id() != &self.channel_id {
            tracing::warn!(
                "Ignoring {} for channel {}",
                message.message_id(),
                message.channel_id()
            );
            return;
        }

        let _batch = self.sync_status.batch();
        let mut channel = self.channel.lock();
        match channel.receive(message, retrieval_hint) {
            Ok(outcome) => tracing::trace!("Receive outcome: {:?}", outcome),
            Err(e) => tracing::error!("Failed to process incoming message: {}", e),
        }
        let events = channel.take_events();
        self.handle_events(events);
    }

    fn sweep_incoming(&self) {
        let _batch = self.sync_status.batch();
        let mut channel = self.channel.lock();
        if let Err(e) = channel.sweep_incoming_buffer() {
            tracing::error!("Incoming buffer sweep failed: {}", e);
        }
        let events = channel.take_events();
        self.handle_events(events);
    }

    /// Map protocol events onto sync status, retrieval, retries and the
    /// consumer event stream. Must not lock the message channel.
    fn handle_events(&self, events: Vec<ChannelEvent>) {
        for event in events {
            match event {
                ChannelEvent::OutMessageSent { message_id } => {
                    self.emit(ReliableChannelEvent::OutMessageSent { message_id });
                    self.restart_sync(1.0);
                }
                ChannelEvent::OutMessagePossiblyAcknowledged { message_id, count } => {
                    self.emit(ReliableChannelEvent::OutMessagePossiblyAcknowledged {
                        message_id,
                        count,
                    });
                }
                ChannelEvent::OutMessageAcknowledged { message_id } => {
                    self.retries.stop(&message_id);
                    self.emit(ReliableChannelEvent::OutMessageAcknowledged { message_id });
                }
                ChannelEvent::InMessageReceived { message_id, .. } => {
                    self.sync_status.on_messages_received([&message_id]);
                    if let Some(tracker) = &self.missing {
                        tracker.remove_missing_message(&message_id);
                    }
                    self.restart_sync(0.5);
                }
                ChannelEvent::InSyncReceived { .. } => self.restart_sync(1.0),
                ChannelEvent::InMessageDelivered {
                    message_id,
                    sender_id,
                    content,
                } => {
                    self.emit(ReliableChannelEvent::InMessageReceived {
                        message_id,
                        sender_id,
                        payload: content,
                        ephemeral: false,
                    });
                }
                ChannelEvent::InEphemeralDelivered(message) => {
                    self.emit(ReliableChannelEvent::InMessageReceived {
                        message_id: message.message_id,
                        sender_id: message.sender_id,
                        payload: message.content,
                        ephemeral: true,
                    });
                }
                ChannelEvent::InMessageMissing { entries } => {
                    let entries: Vec<_> = entries
                        .into_iter()
                        .filter(|entry| !self.sync_status.is_lost(&entry.message_id))
                        .collect();
                    // Rejections are logged by the tracker.
                    let _ = self
                        .sync_status
                        .on_messages_missing(entries.iter().map(|entry| &entry.message_id));
                    if let Some(tracker) = &self.missing {
                        for entry in entries {
                            if let Some(hint) = entry.retrieval_hint {
                                tracker.add_missing_message(entry.message_id, hint);
                            }
                        }
                    }
                }
                ChannelEvent::InMessageLost { entries } => {
                    // Store retrieval may already have given up on some.
                    let entries: Vec<_> = entries
                        .into_iter()
                        .filter(|entry| !self.sync_status.is_lost(&entry.message_id))
                        .collect();
                    self.sync_status
                        .on_messages_lost(entries.iter().map(|entry| &entry.message_id));
                    for entry in entries {
                        if let Some(tracker) = &self.missing {
                            tracker.remove_missing_message(&entry.message_id);
                        }
                        self.emit(ReliableChannelEvent::InIrretrievableMessage {
                            message_id: entry.message_id,
                            retrieval_hint: entry.retrieval_hint,
                        });
                    }
                }
                ChannelEvent::RepairRequestQueued { message_id, t_req } => {
                    tracing::debug!("Repair request for {} due at {}", message_id, t_req);
                }
                ChannelEvent::RepairResponseQueued { message_id, t_resp } => {
                    tracing::debug!("Repair response for {} due at {}", message_id, t_resp);
                }
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Background tasks
    // ─────────────────────────────────────────────────────────────────────────

    async fn pump(
        self: Arc<Self>,
        mut subscription: mpsc::Receiver<IncomingPayload>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                incoming = subscription.recv() => match incoming {
                    Some(incoming) => {
                        self.process_incoming(&incoming.payload, incoming.retrieval_hint);
                    }
                    None => {
                        tracing::warn!("Subscription for {} closed", self.channel_id);
                        break;
                    }
                },
            }
        }
    }

    async fn retrieval_loop(
        self: Arc<Self>,
        tracker: Arc<MissingMessageTracker>,
        token: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.config.retrieve_frequency);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if tracker.is_empty() {
                continue;
            }

            let report = tracker.retrieve_missing_messages().await;
            let settled = !report.retrieved.is_empty() || !report.exhausted.is_empty();
            for message in report.retrieved {
                self.process_incoming(&message.payload, Some(message.retrieval_hint));
            }
            if !report.exhausted.is_empty() {
                // Dependents stop waiting; the sweep below delivers them.
                self.channel
                    .lock()
                    .mark_lost(report.exhausted.iter().map(|(id, _)| id.clone()));
                let _batch = self.sync_status.batch();
                self.sync_status
                    .on_messages_lost(report.exhausted.iter().map(|(id, _)| id));
                for (message_id, hint) in report.exhausted {
                    self.emit(ReliableChannelEvent::InIrretrievableMessage {
                        message_id,
                        retrieval_hint: Some(hint),
                    });
                }
            }
            if settled {
                self.sweep_incoming();
            }
        }
    }

    async fn sweep_loop(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.sweep_in_buf_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.sweep_incoming(),
            }
        }
    }

    /// Send a sync message after a random delay in
    /// `[0, sync_min_interval * multiplier)`. Activity on the channel
    /// restarts the timer with a new multiplier.
    async fn sync_loop(self: Arc<Self>, token: CancellationToken) {
        loop {
            let multiplier = *self.sync_multiplier.lock();
            let delay = self
                .config
                .sync_min_interval
                .mul_f64(rand::random::<f64>() * multiplier);
            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.sync_restart.notified() => {}
                _ = tokio::time::sleep(delay) => {
                    self.send_sync().await;
                    *self.sync_multiplier.lock() = 2.0;
                }
            }
        }
    }

    async fn repair_loop(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.repair_sweep_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.rebroadcast_repairs().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublishError;
    use crate::transport::memory::{MemoryNetwork, MemoryNode};
    use waku_sds_history::MemLocalHistory;

    fn quiet_config() -> ReliableChannelConfig {
        ReliableChannelConfig::default()
            .with_sync_min_interval(Duration::ZERO)
            .with_retry(Duration::from_secs(60), 3)
    }

    fn channel_on(
        network: &Arc<MemoryNetwork>,
        name: &str,
        config: ReliableChannelConfig,
    ) -> ReliableChannel<MemLocalHistory> {
        let node = Arc::new(network.create_node(name));
        let collaborators = Collaborators::new(node.clone(), node.clone()).with_retriever(node);
        ReliableChannel::new(
            ChannelId::from("test-channel"),
            SenderId::from(name),
            MemLocalHistory::new(),
            collaborators,
            config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_send_requires_running() {
        let network = MemoryNetwork::new();
        let channel = channel_on(&network, "alice", quiet_config());
        let mut events = channel.subscribe();

        assert!(matches!(
            channel.send(Bytes::from_static(b"hello")),
            Err(ReliableChannelError::NotRunning)
        ));
        match events.try_recv().unwrap() {
            ReliableChannelEvent::OutMessageIrrecoverableError { message_id, .. } => {
                assert_eq!(message_id, Some(MessageId::from_payload(b"hello")));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_payload_rejected() {
        let network = MemoryNetwork::new();
        let channel = channel_on(&network, "alice", quiet_config());
        channel.start().await.unwrap();
        let mut events = channel.subscribe();

        assert!(matches!(
            channel.send(Bytes::new()),
            Err(ReliableChannelError::EmptyPayload)
        ));
        assert!(matches!(
            events.try_recv().unwrap(),
            ReliableChannelEvent::OutMessageIrrecoverableError {
                message_id: None,
                ..
            }
        ));
        channel.stop().await;
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let network = MemoryNetwork::new();
        let channel = channel_on(&network, "alice", quiet_config());
        assert_eq!(channel.state(), ChannelState::Stopped);

        channel.start().await.unwrap();
        channel.start().await.unwrap();
        assert!(channel.is_running());

        channel.stop().await;
        channel.stop().await;
        assert_eq!(channel.state(), ChannelState::Stopped);

        channel.start().await.unwrap();
        assert!(channel.is_running());
        channel.stop().await;
    }

    #[tokio::test]
    async fn test_sent_message_lands_in_history() {
        let network = MemoryNetwork::new();
        let channel = channel_on(&network, "alice", quiet_config());
        channel.start().await.unwrap();
        let mut events = channel.subscribe();

        let id = channel.send(Bytes::from_static(b"hello")).unwrap();
        loop {
            match events.recv().await.unwrap() {
                ReliableChannelEvent::OutMessageSent { message_id } => {
                    assert_eq!(message_id, id);
                    break;
                }
                ReliableChannelEvent::OutMessageSending { message_id } => {
                    assert_eq!(message_id, id);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }

        assert!(channel.with_message_channel(|c| c.history().contains(&id)));
        assert!(channel.is_retrying(&id));
        channel.stop().await;
        assert!(!channel.is_retrying(&id));
    }

    #[tokio::test]
    async fn test_irrecoverable_publish_error() {
        let network = MemoryNetwork::new();
        let node: Arc<MemoryNode> = Arc::new(network.create_node("alice"));
        node.fail_next_publishes([PublishError::SizeTooBig { size: 1 << 20 }]);
        let channel = ReliableChannel::new(
            ChannelId::from("test-channel"),
            SenderId::from("alice"),
            MemLocalHistory::new(),
            Collaborators::new(node.clone(), node.clone()),
            quiet_config(),
        )
        .unwrap();
        channel.start().await.unwrap();
        let mut events = channel.subscribe();

        let id = channel.send(Bytes::from_static(b"too big")).unwrap();
        loop {
            match events.recv().await.unwrap() {
                ReliableChannelEvent::OutMessageSending { .. } => {}
                ReliableChannelEvent::OutMessageIrrecoverableError { message_id, error } => {
                    assert_eq!(message_id, Some(id.clone()));
                    assert!(error.contains("size"));
                    break;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(node.published(), 0);
        channel.stop().await;
    }
}
