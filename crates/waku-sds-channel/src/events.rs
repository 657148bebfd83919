//! Events produced by the protocol state machine.
//!
//! The [`crate::MessageChannel`] queues events as it processes sends and
//! receives; the owner drains them with
//! [`crate::MessageChannel::take_events`] and maps them onto its own
//! notification surface.

use bytes::Bytes;
use waku_sds_core::{EphemeralMessage, HistoryEntry, MessageId, SenderId};

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// One of our messages was accepted by the transport.
    OutMessageSent { message_id: MessageId },

    /// One of our messages hit in a peer's bloom filter `count` times.
    OutMessagePossiblyAcknowledged { message_id: MessageId, count: u32 },

    /// One of our messages was referenced by a peer, or its bloom hits
    /// reached the promotion threshold.
    OutMessageAcknowledged { message_id: MessageId },

    /// A content message arrived, before its dependencies are checked.
    InMessageReceived {
        message_id: MessageId,
        sender_id: SenderId,
        content: Bytes,
    },

    /// A sync message arrived.
    InSyncReceived {
        message_id: MessageId,
        sender_id: SenderId,
    },

    /// A received content message entered local history, in causal order.
    InMessageDelivered {
        message_id: MessageId,
        sender_id: SenderId,
        content: Bytes,
    },

    /// An ephemeral message arrived; it bypasses ordering and history.
    InEphemeralDelivered(EphemeralMessage),

    /// Dependencies referenced by received messages that we do not hold.
    InMessageMissing { entries: Vec<HistoryEntry> },

    /// Dependencies given up on: the messages waiting for them timed out.
    InMessageLost { entries: Vec<HistoryEntry> },

    /// SDS-R: a repair request was scheduled.
    RepairRequestQueued { message_id: MessageId, t_req: u64 },

    /// SDS-R: a repair response was scheduled.
    RepairResponseQueued { message_id: MessageId, t_resp: u64 },
}
