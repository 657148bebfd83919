//! # Waku SDS Core
//!
//! Pure primitives for Scalable Data Sync: logical clock, bloom digest,
//! the message model and its wire codec.
//!
//! This crate contains no I/O, no storage, no networking. It is pure
//! computation over message data structures.
//!
//! ## Key Types
//!
//! - [`Message`] - A validated SDS message: content, sync or ephemeral
//! - [`ContentMessage`] - The unit stored in local history
//! - [`MessageId`] - Content-derived identifier (hex SHA-256 of the payload)
//! - [`HistoryEntry`] - A causal dependency with optional retrieval hint
//! - [`BloomFilter`] - Digest of seen message ids
//! - [`LamportClock`] - Wall-clock anchored logical clock
//!
//! ## Wire Format
//!
//! Messages are encoded as protobuf. See [`proto`] for the schema and
//! [`message`] for classification rules.

pub mod bloom;
pub mod clock;
pub mod error;
pub mod message;
pub mod proto;
pub mod types;
pub mod validation;

pub use bloom::{BloomFilter, BloomFilterOptions};
pub use clock::{next_lamport, Clock, LamportClock, ManualClock, SystemClock, MAX_FUTURE_DRIFT_MS};
pub use error::{CoreError, Result, ValidationError};
pub use message::{ContentMessage, EphemeralMessage, Message, SyncMessage};
pub use types::{ChannelId, HistoryEntry, LamportTimestamp, MessageId, SenderId};
pub use validation::validate_content_message;
