//! SQLite implementation of the LocalHistory trait.
//!
//! Write-through persistence: every accepted message is written to the
//! database before it enters the in-memory cache, so a restart restores
//! exactly what the protocol had seen.

use std::path::Path;

use bytes::Bytes;
use rusqlite::{params, Connection};

use waku_sds_core::{
    validate_content_message, ChannelId, Clock, ContentMessage, HistoryEntry, MessageId, SenderId,
    SystemClock,
};

use crate::error::{HistoryError, Result};
use crate::memory::MemLocalHistory;
use crate::migration;
use crate::traits::{HistoryConfig, LocalHistory};

/// SQLite-backed history for one channel.
///
/// The connection is exclusively owned: the protocol state machine holding
/// the history is itself serialized by its owner.
pub struct SqliteHistory {
    conn: Connection,
    channel_id: ChannelId,
    cache: MemLocalHistory,
}

impl SqliteHistory {
    /// Open a SQLite database at the given path and restore the channel's log.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(
        path: impl AsRef<Path>,
        channel_id: ChannelId,
        config: HistoryConfig,
    ) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Self::restore(conn, channel_id, config)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory(channel_id: ChannelId, config: HistoryConfig) -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Self::restore(conn, channel_id, config)
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.channel_id
    }

    fn restore(conn: Connection, channel_id: ChannelId, config: HistoryConfig) -> Result<Self> {
        let mut cache = MemLocalHistory::with_config(config);

        let rows = {
            let mut stmt = conn.prepare(
                "SELECT message_id, sender_id, lamport_timestamp, causal_history,
                        bloom_filter, content, retrieval_hint
                 FROM history_messages
                 WHERE channel_id = ?1
                 ORDER BY lamport_timestamp, message_id",
            )?;
            let rows = stmt.query_map(params![channel_id.as_str()], |row| {
                Ok(StoredRow {
                    message_id: row.get(0)?,
                    sender_id: row.get(1)?,
                    lamport_timestamp: decode_lamport(row.get(2)?),
                    causal_history: row.get(3)?,
                    bloom_filter: row.get(4)?,
                    content: row.get(5)?,
                    retrieval_hint: row.get(6)?,
                })
            })?;
            let collected = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            collected
        };

        let mut restored = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.message_id.clone();
            match row.into_message(&channel_id) {
                Ok(message) => restored.push(message),
                Err(e) => tracing::warn!("Skipping stored message {}: {}", id, e),
            }
        }

        let fresh = cache.fresh(restored);
        let evicted = cache.insert_fresh(fresh);

        let mut history = Self {
            conn,
            channel_id,
            cache,
        };
        history.delete_evicted(&evicted);
        tracing::debug!(
            "Restored {} messages for channel {}",
            history.cache.len(),
            history.channel_id
        );
        Ok(history)
    }

    fn insert_rows(&mut self, messages: &[ContentMessage]) -> Result<()> {
        let now = SystemClock.now_millis();
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO history_messages
                    (channel_id, message_id, sender_id, lamport_timestamp, causal_history,
                     bloom_filter, content, retrieval_hint, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for message in messages {
                stmt.execute(params![
                    self.channel_id.as_str(),
                    message.message_id.as_str(),
                    message.sender_id.as_str(),
                    encode_lamport(message.lamport_timestamp),
                    encode_history(&message.causal_history)?,
                    message.bloom_filter.as_deref(),
                    &message.content[..],
                    message.retrieval_hint.as_deref(),
                    now,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Evicted rows that fail to delete are only a space leak: the size cap
    /// is re-applied on the next restore.
    fn delete_evicted(&mut self, evicted: &[ContentMessage]) {
        if evicted.is_empty() {
            return;
        }
        let result = (|| -> Result<()> {
            let tx = self.conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "DELETE FROM history_messages WHERE channel_id = ?1 AND message_id = ?2",
                )?;
                for message in evicted {
                    stmt.execute(params![self.channel_id.as_str(), message.message_id.as_str()])?;
                }
            }
            tx.commit()?;
            Ok(())
        })();
        if let Err(e) = result {
            tracing::warn!("Failed to delete evicted history rows: {}", e);
        }
    }
}

impl LocalHistory for SqliteHistory {
    fn push(&mut self, messages: Vec<ContentMessage>) -> Result<usize> {
        for message in &messages {
            validate_content_message(message)?;
        }
        let fresh = self.cache.fresh(messages);
        if fresh.is_empty() {
            return Ok(0);
        }

        self.insert_rows(&fresh)?;
        let count = fresh.len();
        let evicted = self.cache.insert_fresh(fresh);
        self.delete_evicted(&evicted);
        Ok(count)
    }

    fn clear(&mut self) -> Result<()> {
        self.conn.execute(
            "DELETE FROM history_messages WHERE channel_id = ?1",
            params![self.channel_id.as_str()],
        )?;
        self.cache.clear()
    }

    fn messages(&self) -> &[ContentMessage] {
        self.cache.messages()
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.cache.contains(id)
    }
}

struct StoredRow {
    message_id: String,
    sender_id: String,
    lamport_timestamp: u64,
    causal_history: Vec<u8>,
    bloom_filter: Option<Vec<u8>>,
    content: Vec<u8>,
    retrieval_hint: Option<Vec<u8>>,
}

impl StoredRow {
    fn into_message(self, channel_id: &ChannelId) -> Result<ContentMessage> {
        let message = ContentMessage {
            message_id: MessageId::from(self.message_id),
            channel_id: channel_id.clone(),
            sender_id: SenderId::from(self.sender_id),
            lamport_timestamp: self.lamport_timestamp,
            causal_history: decode_history(&self.causal_history)?,
            bloom_filter: self.bloom_filter.map(Bytes::from),
            repair_request: Vec::new(),
            content: Bytes::from(self.content),
            retrieval_hint: self.retrieval_hint.map(Bytes::from),
        };
        validate_content_message(&message)?;
        Ok(message)
    }
}

/// Map a lamport timestamp onto `i64` keeping its order, so values above
/// `i64::MAX` still bind and `ORDER BY` stays correct.
fn encode_lamport(ts: u64) -> i64 {
    (ts ^ (1 << 63)) as i64
}

fn decode_lamport(stored: i64) -> u64 {
    (stored as u64) ^ (1 << 63)
}

fn encode_history(entries: &[HistoryEntry]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(entries, &mut buf)
        .map_err(|e| HistoryError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_history(bytes: &[u8]) -> Result<Vec<HistoryEntry>> {
    ciborium::from_reader(bytes).map_err(|e| HistoryError::Serialization(e.to_string()))
}
