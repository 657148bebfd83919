//! Error types for the reliable channel.

use thiserror::Error;

use waku_sds_channel::ChannelError;
use waku_sds_core::{CoreError, MessageId};
use waku_sds_history::HistoryError;

/// Errors that can occur during reliable channel operations.
#[derive(Debug, Error)]
pub enum ReliableChannelError {
    /// Protocol state machine error.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Local history error.
    #[error("history error: {0}")]
    History(#[from] HistoryError),

    /// Wire codec error.
    #[error("codec error: {0}")]
    Core(#[from] CoreError),

    /// Subscribe or query failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Publish failed.
    #[error("publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    /// The channel must be started first.
    #[error("channel is not running")]
    NotRunning,

    #[error("payload is empty")]
    EmptyPayload,
}

/// Errors from the subscribe and store-query collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("subscription closed")]
    Closed,

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("query failed: {0}")]
    Query(String),

    /// The query observed its cancellation token.
    #[error("query cancelled")]
    Cancelled,
}

/// Errors from the publish collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("failed to encode message: {0}")]
    EncodeFailed(String),

    #[error("payload is empty")]
    EmptyPayload,

    #[error("payload of {size} bytes exceeds the size limit")]
    SizeTooBig { size: usize },

    #[error("proof generation failed: {0}")]
    ProofGeneration(String),

    #[error("no peers available")]
    NoPeersAvailable,

    #[error("remote peer rejected the message: {0}")]
    RemotePeerRejected(String),

    #[error("publish timed out")]
    Timeout,
}

impl PublishError {
    /// Errors that no amount of retrying will fix.
    pub fn is_irrecoverable(&self) -> bool {
        matches!(
            self,
            PublishError::EncodeFailed(_)
                | PublishError::EmptyPayload
                | PublishError::SizeTooBig { .. }
                | PublishError::ProofGeneration(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncryptionError {
    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),
}

/// Errors from sync status bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncStatusError {
    /// Ids that were already received or lost cannot become missing again.
    #[error("{} message(s) already received or lost were marked missing", .0.len())]
    AlreadyResolved(Vec<MessageId>),
}

/// Result type for reliable channel operations.
pub type Result<T> = std::result::Result<T, ReliableChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irrecoverable_publish_errors() {
        assert!(PublishError::EncodeFailed("x".into()).is_irrecoverable());
        assert!(PublishError::EmptyPayload.is_irrecoverable());
        assert!(PublishError::SizeTooBig { size: 1 << 20 }.is_irrecoverable());
        assert!(PublishError::ProofGeneration("rln".into()).is_irrecoverable());

        assert!(!PublishError::NoPeersAvailable.is_irrecoverable());
        assert!(!PublishError::RemotePeerRejected("busy".into()).is_irrecoverable());
        assert!(!PublishError::Timeout.is_irrecoverable());
    }
}
