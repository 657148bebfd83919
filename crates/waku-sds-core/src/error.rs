//! Error types for the SDS core primitives.

use thiserror::Error;

/// Errors raised by the core primitives: bloom digests and the wire codec.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bloom filter options cannot reach the requested error rate.
    #[error("invalid bloom filter options: {0}")]
    InvalidBloomOptions(String),

    /// Serialized bloom filter does not match the configured size.
    #[error("bloom filter size mismatch: expected {expected} bytes, got {actual}")]
    BloomSizeMismatch { expected: usize, actual: usize },

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),

    /// The bytes decoded but do not form a valid message.
    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

impl From<prost::DecodeError> for CoreError {
    fn from(e: prost::DecodeError) -> Self {
        CoreError::DecodingError(e.to_string())
    }
}

impl From<prost::EncodeError> for CoreError {
    fn from(e: prost::EncodeError) -> Self {
        CoreError::EncodingError(e.to_string())
    }
}

/// Structural validation errors for content messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message id is empty")]
    EmptyMessageId,

    #[error("channel id is empty")]
    EmptyChannelId,

    #[error("content message {0} has no content")]
    EmptyContent(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
