//! LocalHistory trait: the interface the protocol uses for its message log.
//!
//! Implementations include an in-memory log and a SQLite-backed log that
//! survives restarts.

use waku_sds_core::{ContentMessage, MessageId};

use crate::error::Result;

/// Default cap on the number of stored messages per channel.
pub const DEFAULT_MAX_HISTORY_SIZE: usize = 10_000;

/// Configuration for a local history.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Oldest messages are evicted beyond this many entries.
    pub max_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_HISTORY_SIZE,
        }
    }
}

impl HistoryConfig {
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }
}

/// An ordered, deduplicated, bounded log of content messages.
///
/// # Invariants
///
/// - **Sorted**: after every mutation, messages are ordered by
///   [`ContentMessage::compare`], index 0 being the oldest.
/// - **Unique**: no two entries share a message id. Re-adding a known id
///   is a no-op, not an error.
/// - **Valid**: every stored message passes
///   [`waku_sds_core::validate_content_message`]. A batch containing an
///   invalid message is rejected whole.
/// - **Bounded**: the oldest entries are evicted past the configured size.
pub trait LocalHistory: Send {
    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate and insert a batch of messages.
    ///
    /// # Returns
    /// The number of messages that were not already present.
    fn push(&mut self, messages: Vec<ContentMessage>) -> Result<usize>;

    /// Insert historical messages, e.g. a page retrieved from a store.
    ///
    /// Duplicates are skipped here exactly as in [`LocalHistory::push`], so
    /// a retrieval that overlaps what is already held cannot break the
    /// uniqueness invariant.
    fn backfill(&mut self, messages: Vec<ContentMessage>) -> Result<usize> {
        self.push(messages)
    }

    /// Remove every message.
    fn clear(&mut self) -> Result<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// All stored messages, oldest first.
    fn messages(&self) -> &[ContentMessage];

    fn len(&self) -> usize {
        self.messages().len()
    }

    fn is_empty(&self) -> bool {
        self.messages().is_empty()
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.find(id).is_some()
    }

    fn find(&self, id: &MessageId) -> Option<&ContentMessage> {
        self.messages().iter().find(|m| &m.message_id == id)
    }

    /// The `n` most recent messages, oldest first.
    fn recent(&self, n: usize) -> &[ContentMessage] {
        let messages = self.messages();
        &messages[messages.len().saturating_sub(n)..]
    }
}
