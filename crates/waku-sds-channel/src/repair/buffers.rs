//! Time-ordered repair buffers.
//!
//! Both buffers are bounded. When full, the entry scheduled furthest in
//! the future is evicted so the most urgent repairs survive.

use waku_sds_core::{HistoryEntry, MessageId};

#[derive(Debug, Clone)]
struct OutgoingEntry {
    entry: HistoryEntry,
    t_req: u64,
    requested: bool,
}

/// Repairs we need from others, ordered by request time `T_req`.
#[derive(Debug, Clone)]
pub struct OutgoingRepairBuffer {
    items: Vec<OutgoingEntry>,
    max_size: usize,
}

impl OutgoingRepairBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: Vec::new(),
            max_size,
        }
    }

    /// Schedule a repair request.
    ///
    /// Returns `false` if the message is already scheduled; the original
    /// `T_req` is kept.
    pub fn add(&mut self, entry: HistoryEntry, t_req: u64) -> bool {
        if self.has(&entry.message_id) {
            return false;
        }
        if self.max_size == 0 {
            return false;
        }
        if self.items.len() >= self.max_size {
            if let Some(evicted) = self.items.pop() {
                tracing::warn!(
                    "Outgoing repair buffer full, evicted {} with T_req {}",
                    evicted.entry.message_id,
                    evicted.t_req
                );
            }
        }
        let at = self.items.partition_point(|item| item.t_req <= t_req);
        self.items.insert(
            at,
            OutgoingEntry {
                entry,
                t_req,
                requested: false,
            },
        );
        true
    }

    pub fn remove(&mut self, id: &MessageId) {
        self.items.retain(|item| &item.entry.message_id != id);
    }

    /// Up to `max` entries due at `now` that were not requested yet.
    ///
    /// Returned entries are marked as requested and stay in the buffer until
    /// the message arrives.
    pub fn eligible(&mut self, now: u64, max: usize) -> Vec<HistoryEntry> {
        let mut eligible = Vec::new();
        for item in self.items.iter_mut() {
            if item.t_req > now || eligible.len() >= max {
                break;
            }
            if !item.requested {
                item.requested = true;
                eligible.push(item.entry.clone());
            }
        }
        eligible
    }

    pub fn has(&self, id: &MessageId) -> bool {
        self.items.iter().any(|item| &item.entry.message_id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Earliest scheduled request time.
    pub fn next_time(&self) -> Option<u64> {
        self.items.first().map(|item| item.t_req)
    }
}

#[derive(Debug, Clone)]
struct IncomingEntry {
    entry: HistoryEntry,
    t_resp: u64,
}

/// Repairs we owe to others, ordered by response time `T_resp`.
#[derive(Debug, Clone)]
pub struct IncomingRepairBuffer {
    items: Vec<IncomingEntry>,
    max_size: usize,
}

impl IncomingRepairBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: Vec::new(),
            max_size,
        }
    }

    /// Schedule a repair response. Returns `false` if already scheduled.
    pub fn add(&mut self, entry: HistoryEntry, t_resp: u64) -> bool {
        if self.has(&entry.message_id) || self.max_size == 0 {
            return false;
        }
        if self.items.len() >= self.max_size {
            if let Some(evicted) = self.items.pop() {
                tracing::warn!(
                    "Incoming repair buffer full, evicted {} with T_resp {}",
                    evicted.entry.message_id,
                    evicted.t_resp
                );
            }
        }
        let at = self.items.partition_point(|item| item.t_resp <= t_resp);
        self.items.insert(at, IncomingEntry { entry, t_resp });
        true
    }

    pub fn remove(&mut self, id: &MessageId) {
        self.items.retain(|item| &item.entry.message_id != id);
    }

    /// Remove and return every entry due at `now`.
    pub fn ready(&mut self, now: u64) -> Vec<HistoryEntry> {
        let cutoff = self.items.partition_point(|item| item.t_resp <= now);
        self.items.drain(..cutoff).map(|item| item.entry).collect()
    }

    pub fn has(&self, id: &MessageId) -> bool {
        self.items.iter().any(|item| &item.entry.message_id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Earliest scheduled response time.
    pub fn next_time(&self) -> Option<u64> {
        self.items.first().map(|item| item.t_resp)
    }
}
