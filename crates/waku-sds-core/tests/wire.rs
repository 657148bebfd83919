//! Wire vectors for cross-implementation verification.
//!
//! Every SDS implementation must produce byte-identical encodings for
//! these messages, and must classify them identically on decode.

use bytes::Bytes;
use waku_sds_core::{
    ChannelId, ContentMessage, EphemeralMessage, HistoryEntry, Message, MessageId, SenderId,
    SyncMessage,
};

struct WireVector {
    name: &'static str,
    message: Message,
    hex: &'static str,
}

fn vectors() -> Vec<WireVector> {
    vec![
        WireVector {
            name: "minimal_content",
            message: Message::Content(ContentMessage::new(
                MessageId::from("m"),
                ChannelId::from("c"),
                SenderId::from("s"),
                1,
                vec![0x01],
            )),
            hex: "0a017312016d1a01635001a2010101",
        },
        WireVector {
            name: "sync_with_history_and_bloom",
            message: Message::Sync(SyncMessage {
                message_id: MessageId::from("sync-1"),
                channel_id: ChannelId::from("room"),
                sender_id: SenderId::from("alice"),
                lamport_timestamp: 1_700_000_000_000,
                causal_history: vec![
                    HistoryEntry::new(MessageId::from("a1"))
                        .with_retrieval_hint(vec![0x01, 0x02])
                        .with_sender(SenderId::from("bob")),
                    HistoryEntry::new(MessageId::from("a2")),
                ],
                bloom_filter: Some(Bytes::from_static(&[0x0f, 0xf0])),
                repair_request: Vec::new(),
            }),
            hex: "0a05616c696365120673796e632d311a04726f6f6d5080d095ffbc315a0d0a026131120201021a03626f625a040a02613262020ff0",
        },
        WireVector {
            name: "ephemeral",
            message: Message::Ephemeral(EphemeralMessage {
                message_id: MessageId::from("eph"),
                channel_id: ChannelId::from("room"),
                sender_id: SenderId::from("bob"),
                content: Bytes::from_static(b"hi"),
            }),
            hex: "0a03626f6212036570681a04726f6f6da201026869",
        },
        WireVector {
            name: "content_with_repair_request",
            message: Message::Content(ContentMessage {
                repair_request: vec![HistoryEntry::new(MessageId::from("lost"))
                    .with_retrieval_hint(vec![0xaa])
                    .with_sender(SenderId::from("dave"))],
                ..ContentMessage::new(
                    MessageId::from("m9"),
                    ChannelId::from("room"),
                    SenderId::from("carol"),
                    5,
                    vec![0x00],
                )
            }),
            hex: "0a056361726f6c12026d391a04726f6f6d50056a0f0a046c6f73741201aa1a0464617665a2010100",
        },
    ]
}

fn unhex(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap()
}

#[test]
fn test_wire_vectors_encode() {
    for v in vectors() {
        assert_eq!(
            hex::encode(v.message.encode()),
            hex::encode(unhex(v.hex)),
            "vector {} encoding mismatch",
            v.name
        );
    }
}

#[test]
fn test_wire_vectors_decode() {
    for v in vectors() {
        let decoded = Message::decode(&unhex(v.hex)).unwrap();
        assert_eq!(decoded, v.message, "vector {} decoding mismatch", v.name);
    }
}

#[test]
fn test_absent_optionals_decode_to_none() {
    // sender "s", id "m", channel "c", lamport 1, no history, no bloom, no content
    let bytes = unhex("0a017312016d1a01635001");
    let Message::Sync(sync) = Message::decode(&bytes).unwrap() else {
        panic!("expected a sync message");
    };
    assert_eq!(sync.bloom_filter, None);
    assert!(sync.causal_history.is_empty());
    assert!(sync.repair_request.is_empty());
}

#[test]
fn test_unknown_fields_are_skipped() {
    // minimal content plus an unknown varint field 30
    let mut bytes = unhex("0a017312016d1a01635001a2010101");
    bytes.extend_from_slice(&[0xf0, 0x01, 0x07]);
    assert!(matches!(Message::decode(&bytes), Ok(Message::Content(_))));
}
