//! The SDS message model.
//!
//! A message on the wire is one protobuf record. Its variant is determined
//! by which optional fields are present:
//!
//! | lamport timestamp | content     | variant     |
//! |-------------------|-------------|-------------|
//! | present           | non-empty   | `Content`   |
//! | present           | absent/empty| `Sync`      |
//! | absent            | non-empty   | `Ephemeral` |
//! | absent            | absent/empty| rejected    |
//!
//! Classification happens once, at decode. Everything downstream works
//! with the typed variants.

use std::cmp::Ordering;

use bytes::Bytes;
use prost::Message as _;

use crate::error::{CoreError, Result};
use crate::proto;
use crate::types::{ChannelId, HistoryEntry, LamportTimestamp, MessageId, SenderId};

/// A message carrying application payload, stored in local history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentMessage {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub sender_id: SenderId,
    pub lamport_timestamp: LamportTimestamp,
    pub causal_history: Vec<HistoryEntry>,
    pub bloom_filter: Option<Bytes>,
    pub repair_request: Vec<HistoryEntry>,
    pub content: Bytes,
    /// Local-only store hint, filled in once the message was published or
    /// received. Never encoded.
    pub retrieval_hint: Option<Bytes>,
}

impl ContentMessage {
    /// A bare content message with no dependencies or digest.
    pub fn new(
        message_id: MessageId,
        channel_id: ChannelId,
        sender_id: SenderId,
        lamport_timestamp: LamportTimestamp,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            message_id,
            channel_id,
            sender_id,
            lamport_timestamp,
            causal_history: Vec::new(),
            bloom_filter: None,
            repair_request: Vec::new(),
            content: content.into(),
            retrieval_hint: None,
        }
    }

    /// History order: by lamport timestamp, ties broken by message id.
    pub fn compare(&self, other: &Self) -> Ordering {
        self.lamport_timestamp
            .cmp(&other.lamport_timestamp)
            .then_with(|| self.message_id.cmp(&other.message_id))
    }

    /// The entry other participants use to reference this message.
    pub fn history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            message_id: self.message_id.clone(),
            retrieval_hint: self.retrieval_hint.clone(),
            sender_id: Some(self.sender_id.clone()),
        }
    }
}

/// A heartbeat carrying causal history and digest but no payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncMessage {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub sender_id: SenderId,
    pub lamport_timestamp: LamportTimestamp,
    pub causal_history: Vec<HistoryEntry>,
    pub bloom_filter: Option<Bytes>,
    pub repair_request: Vec<HistoryEntry>,
}

/// Best-effort payload outside the causal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralMessage {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub sender_id: SenderId,
    pub content: Bytes,
}

/// A validated SDS message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Content(ContentMessage),
    Sync(SyncMessage),
    Ephemeral(EphemeralMessage),
}

impl Message {
    pub fn message_id(&self) -> &MessageId {
        match self {
            Message::Content(m) => &m.message_id,
            Message::Sync(m) => &m.message_id,
            Message::Ephemeral(m) => &m.message_id,
        }
    }

    pub fn channel_id(&self) -> &ChannelId {
        match self {
            Message::Content(m) => &m.channel_id,
            Message::Sync(m) => &m.channel_id,
            Message::Ephemeral(m) => &m.channel_id,
        }
    }

    pub fn sender_id(&self) -> &SenderId {
        match self {
            Message::Content(m) => &m.sender_id,
            Message::Sync(m) => &m.sender_id,
            Message::Ephemeral(m) => &m.sender_id,
        }
    }

    pub fn lamport_timestamp(&self) -> Option<LamportTimestamp> {
        match self {
            Message::Content(m) => Some(m.lamport_timestamp),
            Message::Sync(m) => Some(m.lamport_timestamp),
            Message::Ephemeral(_) => None,
        }
    }

    pub fn causal_history(&self) -> &[HistoryEntry] {
        match self {
            Message::Content(m) => &m.causal_history,
            Message::Sync(m) => &m.causal_history,
            Message::Ephemeral(_) => &[],
        }
    }

    pub fn bloom_filter(&self) -> Option<&Bytes> {
        match self {
            Message::Content(m) => m.bloom_filter.as_ref(),
            Message::Sync(m) => m.bloom_filter.as_ref(),
            Message::Ephemeral(_) => None,
        }
    }

    pub fn repair_request(&self) -> &[HistoryEntry] {
        match self {
            Message::Content(m) => &m.repair_request,
            Message::Sync(m) => &m.repair_request,
            Message::Ephemeral(_) => &[],
        }
    }

    /// Encode to protobuf bytes.
    pub fn encode(&self) -> Vec<u8> {
        self.to_proto().encode_to_vec()
    }

    /// Decode and classify protobuf bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let raw = proto::SdsMessage::decode(bytes)?;
        Self::from_proto(raw)
    }

    fn to_proto(&self) -> proto::SdsMessage {
        match self {
            Message::Content(m) => proto::SdsMessage {
                sender_id: m.sender_id.as_str().to_owned(),
                message_id: m.message_id.as_str().to_owned(),
                channel_id: m.channel_id.as_str().to_owned(),
                lamport_timestamp: Some(m.lamport_timestamp),
                causal_history: m.causal_history.iter().map(entry_to_proto).collect(),
                bloom_filter: m.bloom_filter.clone(),
                repair_request: m.repair_request.iter().map(entry_to_proto).collect(),
                content: Some(m.content.clone()),
            },
            Message::Sync(m) => proto::SdsMessage {
                sender_id: m.sender_id.as_str().to_owned(),
                message_id: m.message_id.as_str().to_owned(),
                channel_id: m.channel_id.as_str().to_owned(),
                lamport_timestamp: Some(m.lamport_timestamp),
                causal_history: m.causal_history.iter().map(entry_to_proto).collect(),
                bloom_filter: m.bloom_filter.clone(),
                repair_request: m.repair_request.iter().map(entry_to_proto).collect(),
                content: None,
            },
            Message::Ephemeral(m) => proto::SdsMessage {
                sender_id: m.sender_id.as_str().to_owned(),
                message_id: m.message_id.as_str().to_owned(),
                channel_id: m.channel_id.as_str().to_owned(),
                lamport_timestamp: None,
                causal_history: Vec::new(),
                bloom_filter: None,
                repair_request: Vec::new(),
                content: Some(m.content.clone()),
            },
        }
    }

    fn from_proto(raw: proto::SdsMessage) -> Result<Self> {
        if raw.message_id.is_empty() {
            return Err(CoreError::MalformedMessage("empty message id".into()));
        }
        if raw.channel_id.is_empty() {
            return Err(CoreError::MalformedMessage(format!(
                "message {} has an empty channel id",
                raw.message_id
            )));
        }

        let message_id = MessageId::from(raw.message_id);
        let channel_id = ChannelId::from(raw.channel_id);
        let sender_id = SenderId::from(raw.sender_id);
        let content = raw.content.filter(|c| !c.is_empty());

        match (raw.lamport_timestamp, content) {
            (Some(lamport_timestamp), Some(content)) => Ok(Message::Content(ContentMessage {
                message_id,
                channel_id,
                sender_id,
                lamport_timestamp,
                causal_history: raw.causal_history.into_iter().map(entry_from_proto).collect(),
                bloom_filter: raw.bloom_filter,
                repair_request: raw.repair_request.into_iter().map(entry_from_proto).collect(),
                content,
                retrieval_hint: None,
            })),
            (Some(lamport_timestamp), None) => Ok(Message::Sync(SyncMessage {
                message_id,
                channel_id,
                sender_id,
                lamport_timestamp,
                causal_history: raw.causal_history.into_iter().map(entry_from_proto).collect(),
                bloom_filter: raw.bloom_filter,
                repair_request: raw.repair_request.into_iter().map(entry_from_proto).collect(),
            })),
            (None, Some(content)) => Ok(Message::Ephemeral(EphemeralMessage {
                message_id,
                channel_id,
                sender_id,
                content,
            })),
            (None, None) => Err(CoreError::MalformedMessage(format!(
                "message {} has neither a lamport timestamp nor content",
                message_id
            ))),
        }
    }
}

impl From<ContentMessage> for Message {
    fn from(m: ContentMessage) -> Self {
        Message::Content(m)
    }
}

impl From<SyncMessage> for Message {
    fn from(m: SyncMessage) -> Self {
        Message::Sync(m)
    }
}

impl From<EphemeralMessage> for Message {
    fn from(m: EphemeralMessage) -> Self {
        Message::Ephemeral(m)
    }
}

fn entry_to_proto(entry: &HistoryEntry) -> proto::HistoryEntry {
    proto::HistoryEntry {
        message_id: entry.message_id.as_str().to_owned(),
        retrieval_hint: entry.retrieval_hint.clone(),
        sender_id: entry.sender_id.as_ref().map(|s| s.as_str().to_owned()),
    }
}

fn entry_from_proto(entry: proto::HistoryEntry) -> HistoryEntry {
    HistoryEntry {
        message_id: MessageId::from(entry.message_id),
        retrieval_hint: entry.retrieval_hint,
        sender_id: entry.sender_id.map(SenderId::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(ts: u64, id: &str) -> ContentMessage {
        ContentMessage::new(
            MessageId::from(id),
            ChannelId::from("channel"),
            SenderId::from("alice"),
            ts,
            vec![1u8, 2, 3],
        )
    }

    fn raw(lamport: Option<u64>, content: Option<&[u8]>) -> proto::SdsMessage {
        proto::SdsMessage {
            sender_id: "s".into(),
            message_id: "m".into(),
            channel_id: "c".into(),
            lamport_timestamp: lamport,
            content: content.map(Bytes::copy_from_slice),
            ..Default::default()
        }
    }

    #[test]
    fn test_compare_by_timestamp_then_id() {
        assert_eq!(content(1, "b").compare(&content(2, "a")), Ordering::Less);
        assert_eq!(content(2, "a").compare(&content(2, "b")), Ordering::Less);
        assert_eq!(content(2, "a").compare(&content(2, "a")), Ordering::Equal);
    }

    #[test]
    fn test_content_roundtrip_preserves_optionals() {
        let mut msg = content(42, "m1");
        msg.causal_history = vec![
            HistoryEntry::new(MessageId::from("dep1")),
            HistoryEntry::new(MessageId::from("dep2"))
                .with_retrieval_hint(vec![7u8])
                .with_sender(SenderId::from("bob")),
        ];
        msg.bloom_filter = Some(Bytes::from_static(&[0xff, 0x00]));
        let msg = Message::Content(msg);

        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
        let Message::Content(decoded) = decoded else {
            panic!("expected content");
        };
        assert_eq!(decoded.causal_history[0].retrieval_hint, None);
        assert_eq!(decoded.causal_history[0].sender_id, None);
    }

    #[test]
    fn test_classification() {
        let decode = |m: proto::SdsMessage| Message::from_proto(m);

        assert!(matches!(decode(raw(Some(1), Some(&[1]))), Ok(Message::Content(_))));
        assert!(matches!(decode(raw(Some(1), None)), Ok(Message::Sync(_))));
        assert!(matches!(decode(raw(Some(1), Some(&[]))), Ok(Message::Sync(_))));
        assert!(matches!(decode(raw(None, Some(&[1]))), Ok(Message::Ephemeral(_))));
        assert!(matches!(
            decode(raw(None, None)),
            Err(CoreError::MalformedMessage(_))
        ));
        assert!(matches!(
            decode(raw(None, Some(&[]))),
            Err(CoreError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_empty_ids_rejected() {
        let mut m = raw(Some(1), Some(&[1]));
        m.message_id.clear();
        assert!(Message::from_proto(m).is_err());

        let mut m = raw(Some(1), Some(&[1]));
        m.channel_id.clear();
        assert!(Message::from_proto(m).is_err());
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        assert!(matches!(
            Message::decode(&[0xff, 0xff, 0xff]),
            Err(CoreError::DecodingError(_))
        ));
    }

    #[test]
    fn test_ephemeral_has_no_history() {
        let msg = Message::Ephemeral(EphemeralMessage {
            message_id: MessageId::from("e"),
            channel_id: ChannelId::from("c"),
            sender_id: SenderId::from("s"),
            content: Bytes::from_static(b"typing"),
        });
        assert!(msg.causal_history().is_empty());
        assert!(msg.bloom_filter().is_none());
        assert_eq!(msg.lamport_timestamp(), None);
        assert_eq!(Message::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_retrieval_hint_not_encoded() {
        let mut msg = content(1, "m");
        msg.retrieval_hint = Some(Bytes::from_static(b"hint"));
        let decoded = Message::decode(&Message::Content(msg).encode()).unwrap();
        let Message::Content(decoded) = decoded else {
            panic!("expected content");
        };
        assert_eq!(decoded.retrieval_hint, None);
    }
}
