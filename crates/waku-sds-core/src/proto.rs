//! Wire schema.
//!
//! Field numbers are fixed for interoperability with other SDS
//! implementations. These structs are the raw protobuf view; use
//! [`crate::message::Message`] for the validated model.

use bytes::Bytes;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HistoryEntry {
    #[prost(string, tag = "1")]
    pub message_id: String,
    #[prost(bytes = "bytes", optional, tag = "2")]
    pub retrieval_hint: Option<Bytes>,
    #[prost(string, optional, tag = "3")]
    pub sender_id: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SdsMessage {
    #[prost(string, tag = "1")]
    pub sender_id: String,
    #[prost(string, tag = "2")]
    pub message_id: String,
    #[prost(string, tag = "3")]
    pub channel_id: String,
    #[prost(uint64, optional, tag = "10")]
    pub lamport_timestamp: Option<u64>,
    #[prost(message, repeated, tag = "11")]
    pub causal_history: Vec<HistoryEntry>,
    #[prost(bytes = "bytes", optional, tag = "12")]
    pub bloom_filter: Option<Bytes>,
    #[prost(message, repeated, tag = "13")]
    pub repair_request: Vec<HistoryEntry>,
    #[prost(bytes = "bytes", optional, tag = "20")]
    pub content: Option<Bytes>,
}
