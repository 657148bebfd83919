//! In-memory implementation of the LocalHistory trait.
//!
//! Used directly for ephemeral channels and as the cache behind
//! [`crate::SqliteHistory`].

use std::collections::HashSet;

use waku_sds_core::{validate_content_message, ContentMessage, MessageId};

use crate::error::Result;
use crate::traits::{HistoryConfig, LocalHistory};

/// In-memory history.
///
/// All data is lost when the history is dropped.
#[derive(Debug, Clone)]
pub struct MemLocalHistory {
    messages: Vec<ContentMessage>,
    ids: HashSet<MessageId>,
    max_size: usize,
}

impl MemLocalHistory {
    /// Create an empty history with the default size cap.
    pub fn new() -> Self {
        Self::with_config(HistoryConfig::default())
    }

    pub fn with_config(config: HistoryConfig) -> Self {
        Self {
            messages: Vec::new(),
            ids: HashSet::new(),
            max_size: config.max_size,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Keep only messages not already stored, dropping repeats within the batch.
    pub(crate) fn fresh(&self, messages: Vec<ContentMessage>) -> Vec<ContentMessage> {
        let mut seen = HashSet::new();
        messages
            .into_iter()
            .filter(|m| !self.ids.contains(&m.message_id) && seen.insert(m.message_id.clone()))
            .collect()
    }

    /// Insert already validated, already deduplicated messages.
    ///
    /// Returns the messages evicted to respect the size cap.
    pub(crate) fn insert_fresh(&mut self, fresh: Vec<ContentMessage>) -> Vec<ContentMessage> {
        for message in fresh {
            self.ids.insert(message.message_id.clone());
            self.messages.push(message);
        }
        self.messages.sort_by(|a, b| a.compare(b));

        let excess = self.messages.len().saturating_sub(self.max_size);
        let evicted: Vec<ContentMessage> = self.messages.drain(..excess).collect();
        for message in &evicted {
            self.ids.remove(&message.message_id);
        }
        if !evicted.is_empty() {
            tracing::debug!("Evicted {} messages from local history", evicted.len());
        }
        evicted
    }
}

impl Default for MemLocalHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHistory for MemLocalHistory {
    fn push(&mut self, messages: Vec<ContentMessage>) -> Result<usize> {
        for message in &messages {
            validate_content_message(message)?;
        }
        let fresh = self.fresh(messages);
        let count = fresh.len();
        self.insert_fresh(fresh);
        Ok(count)
    }

    fn clear(&mut self) -> Result<()> {
        self.messages.clear();
        self.ids.clear();
        Ok(())
    }

    fn messages(&self) -> &[ContentMessage] {
        &self.messages
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }
}
