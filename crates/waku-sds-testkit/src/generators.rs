//! Proptest generators for property-based testing.

use bytes::Bytes;
use proptest::prelude::*;

use waku_sds_core::{
    ChannelId, ContentMessage, EphemeralMessage, HistoryEntry, Message, MessageId, SenderId,
    SyncMessage,
};

/// A random message id: hex, like the ids derived from payloads.
pub fn message_id() -> impl Strategy<Value = MessageId> {
    "[0-9a-f]{8,64}".prop_map(MessageId::from)
}

pub fn channel_id() -> impl Strategy<Value = ChannelId> {
    "[a-z][a-z0-9/-]{0,31}".prop_map(ChannelId::from)
}

pub fn sender_id() -> impl Strategy<Value = SenderId> {
    "[a-z][a-z0-9-]{0,15}".prop_map(SenderId::from)
}

/// Non-empty payload bytes.
pub fn payload(max_len: usize) -> impl Strategy<Value = Bytes> {
    prop::collection::vec(any::<u8>(), 1..=max_len.max(1)).prop_map(Bytes::from)
}

pub fn history_entry() -> impl Strategy<Value = HistoryEntry> {
    (
        message_id(),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..32)),
        prop::option::of(sender_id()),
    )
        .prop_map(|(id, hint, sender)| HistoryEntry {
            message_id: id,
            retrieval_hint: hint.map(Bytes::from),
            sender_id: sender,
        })
}

/// Parameters for generating a content message.
#[derive(Debug, Clone)]
pub struct ContentParams {
    pub channel_id: ChannelId,
    pub sender_id: SenderId,
    pub lamport_timestamp: u64,
    pub causal_history: Vec<HistoryEntry>,
    pub bloom_filter: Option<Bytes>,
    pub repair_request: Vec<HistoryEntry>,
    pub content: Bytes,
}

impl Arbitrary for ContentParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            channel_id(),
            sender_id(),
            0u64..=1_800_000_000_000u64,
            prop::collection::vec(history_entry(), 0..8),
            prop::option::of(prop::collection::vec(any::<u8>(), 0..64)),
            prop::collection::vec(history_entry(), 0..3),
            payload(256),
        )
            .prop_map(
                |(channel_id, sender_id, lamport, history, bloom, repair, content)| {
                    ContentParams {
                        channel_id,
                        sender_id,
                        lamport_timestamp: lamport,
                        causal_history: history,
                        bloom_filter: bloom.map(Bytes::from),
                        repair_request: repair,
                        content,
                    }
                },
            )
            .boxed()
    }
}

/// Build a content message; its id is derived from the payload.
pub fn content_from_params(params: &ContentParams) -> ContentMessage {
    ContentMessage {
        message_id: MessageId::from_payload(&params.content),
        channel_id: params.channel_id.clone(),
        sender_id: params.sender_id.clone(),
        lamport_timestamp: params.lamport_timestamp,
        causal_history: params.causal_history.clone(),
        bloom_filter: params.bloom_filter.clone(),
        repair_request: params.repair_request.clone(),
        content: params.content.clone(),
        retrieval_hint: None,
    }
}

/// Any of the three message kinds.
pub fn message() -> impl Strategy<Value = Message> {
    prop_oneof![
        any::<ContentParams>().prop_map(|p| Message::Content(content_from_params(&p))),
        any::<ContentParams>().prop_map(|p| {
            Message::Sync(SyncMessage {
                message_id: MessageId::from_payload(&p.content),
                channel_id: p.channel_id,
                sender_id: p.sender_id,
                lamport_timestamp: p.lamport_timestamp,
                causal_history: p.causal_history,
                bloom_filter: p.bloom_filter,
                repair_request: p.repair_request,
            })
        }),
        any::<ContentParams>().prop_map(|p| {
            Message::Ephemeral(EphemeralMessage {
                message_id: MessageId::from_payload(&p.content),
                channel_id: p.channel_id,
                sender_id: p.sender_id,
                content: p.content,
            })
        }),
    ]
}

/// Messages of one channel with distinct payloads, in arbitrary order.
pub fn channel_messages(max: usize) -> impl Strategy<Value = Vec<ContentMessage>> {
    prop::collection::hash_set(prop::collection::vec(any::<u8>(), 1..16), 1..=max.max(1))
        .prop_flat_map(|payloads| {
            let n = payloads.len();
            (
                Just(payloads.into_iter().collect::<Vec<_>>()),
                prop::collection::vec(0u64..32, n),
            )
        })
        .prop_map(|(payloads, lamports)| {
            payloads
                .into_iter()
                .zip(lamports)
                .map(|(payload, lamport)| {
                    ContentMessage::new(
                        MessageId::from_payload(&payload),
                        ChannelId::from("prop-channel"),
                        SenderId::from("prop-sender"),
                        lamport,
                        payload,
                    )
                })
                .collect()
        })
        .prop_shuffle()
}

#[cfg(test)]
mod tests {
    use super::*;
    use waku_sds_history::{HistoryConfig, LocalHistory, MemLocalHistory};

    proptest! {
        #[test]
        fn test_wire_decoding_recovers_message(message in message()) {
            let decoded = Message::decode(&message.encode()).unwrap();
            prop_assert_eq!(decoded, message);
        }

        #[test]
        fn test_bounded_history_keeps_newest(messages in channel_messages(24), cap in 1usize..8) {
            let mut history = MemLocalHistory::with_config(HistoryConfig::default().with_max_size(cap));
            history.push(messages.clone()).unwrap();

            let mut sorted = messages;
            sorted.sort_by(|a, b| a.compare(b));
            let expected: Vec<_> = sorted.iter().rev().take(cap).rev().map(|m| &m.message_id).collect();
            let actual: Vec<_> = history.messages().iter().map(|m| &m.message_id).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}
