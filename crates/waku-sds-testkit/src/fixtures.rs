//! Test fixtures and helpers.
//!
//! Common setup code for protocol-level and end-to-end tests.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;

use waku_sds::transport::memory::{MemoryNetwork, MemoryNode};
use waku_sds::{Collaborators, Encryption, ReliableChannel, ReliableChannelConfig, ReliableChannelEvent};
use waku_sds_channel::{MessageChannel, MessageChannelConfig};
use waku_sds_core::{ChannelId, ContentMessage, ManualClock, Message, SenderId};
use waku_sds_history::MemLocalHistory;

/// Wall-clock start for manual clocks.
pub const START_MS: u64 = 1_700_000_000_000;

/// One participant's protocol state over a shared manual clock.
pub struct ChannelFixture {
    pub channel: MessageChannel<MemLocalHistory, ManualClock>,
    pub clock: ManualClock,
}

impl ChannelFixture {
    pub fn new(channel_id: &str, sender: &str, clock: ManualClock) -> Self {
        Self::with_config(channel_id, sender, clock, MessageChannelConfig::default())
    }

    pub fn with_config(
        channel_id: &str,
        sender: &str,
        clock: ManualClock,
        config: MessageChannelConfig,
    ) -> Self {
        let channel = MessageChannel::with_clock(
            ChannelId::from(channel_id),
            SenderId::from(sender),
            MemLocalHistory::new(),
            config,
            clock.clone(),
        )
        .expect("default bloom options are valid");
        Self { channel, clock }
    }

    /// Prepare and mark sent; returns the message as a peer would decode it.
    pub fn send(&mut self, payload: &[u8]) -> Message {
        let message = self
            .channel
            .prepare_message(payload.to_vec())
            .expect("payload is not empty");
        self.channel
            .mark_sent(&message, None)
            .expect("history accepts prepared messages");
        Message::decode(&Message::Content(message).encode()).expect("own encoding decodes")
    }

    /// Like [`Self::send`], keeping the prepared content message.
    pub fn send_content(&mut self, payload: &[u8]) -> ContentMessage {
        match self.send(payload) {
            Message::Content(message) => message,
            other => panic!("expected a content message, got {:?}", other),
        }
    }
}

/// Participants of one channel sharing a manual clock.
pub fn multi_party_fixtures(channel_id: &str, senders: &[&str]) -> Vec<ChannelFixture> {
    let clock = ManualClock::new(START_MS);
    senders
        .iter()
        .map(|sender| ChannelFixture::new(channel_id, sender, clock.clone()))
        .collect()
}

/// Timings short enough for end-to-end tests, with sync messages off.
pub fn fast_config() -> ReliableChannelConfig {
    ReliableChannelConfig::default()
        .with_sync_min_interval(Duration::ZERO)
        .with_retry(Duration::from_millis(100), 5)
        .with_retrieve_frequency(Duration::from_millis(50))
        .with_sweep_in_buf_interval(Duration::from_millis(50))
        .with_repair_sweep_interval(Duration::from_millis(50))
        .with_missing(waku_sds::MissingMessageConfig {
            retrieval_timeout: Duration::from_secs(1),
            max_attempts: 3,
            delay_window: Duration::ZERO,
        })
}

/// An in-memory network hosting one channel.
pub struct TestNetwork {
    pub network: Arc<MemoryNetwork>,
    pub channel_id: ChannelId,
}

impl TestNetwork {
    pub fn new(channel_id: &str) -> Self {
        Self {
            network: MemoryNetwork::new(),
            channel_id: ChannelId::from(channel_id),
        }
    }

    /// A started participant using [`fast_config`].
    pub async fn participant(&self, name: &str) -> Participant {
        self.participant_with(name, fast_config(), None).await
    }

    pub async fn participant_with(
        &self,
        name: &str,
        config: ReliableChannelConfig,
        encryption: Option<Arc<dyn Encryption>>,
    ) -> Participant {
        let node = Arc::new(self.network.create_node(name));
        let mut collaborators =
            Collaborators::new(node.clone(), node.clone()).with_retriever(node.clone());
        if let Some(encryption) = encryption {
            collaborators = collaborators.with_encryption(encryption);
        }
        let channel = ReliableChannel::create(
            self.channel_id.clone(),
            SenderId::from(name),
            MemLocalHistory::new(),
            collaborators,
            config,
        )
        .await
        .expect("memory subscription succeeds");
        let events = channel.subscribe();
        Participant {
            node,
            channel,
            events,
        }
    }
}

/// A running reliable channel on a memory node.
pub struct Participant {
    pub node: Arc<MemoryNode>,
    pub channel: ReliableChannel<MemLocalHistory>,
    pub events: broadcast::Receiver<ReliableChannelEvent>,
}

impl Participant {
    /// Wait up to `timeout` for an event matching `pred`, skipping others.
    pub async fn wait_for(
        &mut self,
        timeout: Duration,
        mut pred: impl FnMut(&ReliableChannelEvent) -> bool,
    ) -> Option<ReliableChannelEvent> {
        let events = &mut self.events;
        tokio::time::timeout(timeout, async move {
            loop {
                match events.recv().await {
                    Ok(event) if pred(&event) => return Some(event),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    /// Payloads of every message delivered to the consumer within `timeout`,
    /// stopping early once `count` have arrived.
    pub async fn collect_received(&mut self, count: usize, timeout: Duration) -> Vec<Bytes> {
        let mut received = Vec::new();
        let deadline = tokio::time::Instant::now() + timeout;
        while received.len() < count {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = self
                .wait_for(remaining, |e| {
                    matches!(e, ReliableChannelEvent::InMessageReceived { ephemeral: false, .. })
                })
                .await;
            match event {
                Some(ReliableChannelEvent::InMessageReceived { payload, .. }) => {
                    received.push(payload)
                }
                _ => break,
            }
        }
        received
    }
}
