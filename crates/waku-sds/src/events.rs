//! Events surfaced to consumers of a reliable channel.

use bytes::Bytes;

use waku_sds_core::{MessageId, SenderId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReliableChannelEvent {
    /// A publish attempt is about to start. Emitted once per attempt.
    OutMessageSending { message_id: MessageId },

    /// The network accepted the message for the first time.
    OutMessageSent { message_id: MessageId },

    /// Seen in the bloom filter of `count` distinct incoming messages.
    OutMessagePossiblyAcknowledged { message_id: MessageId, count: u32 },

    OutMessageAcknowledged { message_id: MessageId },

    /// Every retry was used without an acknowledgement.
    OutMessageRetriesError { message_id: MessageId },

    /// Sending failed in a way retries cannot fix.
    OutMessageIrrecoverableError {
        message_id: Option<MessageId>,
        error: String,
    },

    /// A remote message is ready for the application.
    ///
    /// Content messages arrive in causal order; ephemeral ones immediately.
    InMessageReceived {
        message_id: MessageId,
        sender_id: SenderId,
        payload: Bytes,
        ephemeral: bool,
    },

    /// A dependency could not be retrieved and is now considered lost.
    InIrretrievableMessage {
        message_id: MessageId,
        retrieval_hint: Option<Bytes>,
    },
}

impl ReliableChannelEvent {
    /// The message this event is about, if any.
    pub fn message_id(&self) -> Option<&MessageId> {
        match self {
            Self::OutMessageSending { message_id }
            | Self::OutMessageSent { message_id }
            | Self::OutMessagePossiblyAcknowledged { message_id, .. }
            | Self::OutMessageAcknowledged { message_id }
            | Self::OutMessageRetriesError { message_id }
            | Self::InMessageReceived { message_id, .. }
            | Self::InIrretrievableMessage { message_id, .. } => Some(message_id),
            Self::OutMessageIrrecoverableError { message_id, .. } => message_id.as_ref(),
        }
    }
}
