//! Strong type definitions for Scalable Data Sync.
//!
//! All identifiers are newtypes to prevent misuse at compile time: a
//! message id cannot be passed where a channel id is expected.

use bytes::Bytes;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Logical timestamp carried by content and sync messages.
pub type LamportTimestamp = u64;

/// Content-derived message identifier.
///
/// Computed as the lower-case hex SHA-256 of the payload, so two
/// participants publishing the same bytes produce the same id.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive the id of a payload.
    pub fn from_payload(payload: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(payload)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.0.get(..16).unwrap_or(&self.0);
        write!(f, "MessageId({})", short)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of a logical channel (a conversation).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a participant in a channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SenderId(String);

impl SenderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random 16-byte hex sender id.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SenderId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for SenderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// One entry of a message's causal history.
///
/// The retrieval hint is an opaque token the store understands (typically
/// the transport-level message hash). The sender id lets repair participants
/// compute response groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub message_id: MessageId,
    pub retrieval_hint: Option<Bytes>,
    pub sender_id: Option<SenderId>,
}

impl HistoryEntry {
    /// An entry that carries only an id.
    pub fn new(message_id: MessageId) -> Self {
        Self {
            message_id,
            retrieval_hint: None,
            sender_id: None,
        }
    }

    pub fn with_retrieval_hint(mut self, hint: impl Into<Bytes>) -> Self {
        self.retrieval_hint = Some(hint.into());
        self
    }

    pub fn with_sender(mut self, sender: SenderId) -> Self {
        self.sender_id = Some(sender);
        self
    }
}

impl From<MessageId> for HistoryEntry {
    fn from(id: MessageId) -> Self {
        Self::new(id)
    }
}
