//! Error types for the protocol state machine.

use thiserror::Error;

use waku_sds_core::{ChannelId, MessageId};

/// Errors that can occur while sending or receiving on a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Local history rejected or failed to store a message.
    #[error("history error: {0}")]
    History(#[from] waku_sds_history::HistoryError),

    /// Bloom filter or codec failure.
    #[error("core error: {0}")]
    Core(#[from] waku_sds_core::CoreError),

    /// A message addressed to another channel reached this one.
    #[error("message {message_id} belongs to channel {actual}, expected {expected}")]
    ChannelMismatch {
        expected: ChannelId,
        actual: ChannelId,
        message_id: MessageId,
    },

    /// Content and ephemeral messages must carry a payload.
    #[error("payload is empty")]
    EmptyPayload,
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
