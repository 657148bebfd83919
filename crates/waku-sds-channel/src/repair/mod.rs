//! SDS-R: decentralized repair of missing messages.
//!
//! A participant that detects a missing dependency schedules a repair
//! request at `T_req`, staggered by a hash of its own id so that not every
//! participant asks at once. Requests ride on the next outgoing message.
//! Participants holding the requested message schedule a rebroadcast at
//! `T_resp`, staggered by their XOR distance to the original sender so the
//! closest responder usually answers first. Seeing the message, or someone
//! else's request for it, cancels pending work.

pub mod buffers;
pub mod scheduling;

use std::time::Duration;

use waku_sds_core::{ContentMessage, HistoryEntry, MessageId, SenderId};
use waku_sds_history::LocalHistory;

pub use buffers::{IncomingRepairBuffer, OutgoingRepairBuffer};
pub use scheduling::{
    combined_hash, hash_to_integer, to_safe_integer, to_scheduling_delay, xor_distance,
    MAX_SAFE_INTEGER,
};

/// One response group per this many participants.
pub const PARTICIPANTS_PER_RESPONSE_GROUP: usize = 128;

/// Repair requests attached to one outgoing message.
pub const MAX_REPAIR_REQUESTS_PER_MESSAGE: usize = 3;

/// Configuration for SDS-R.
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Minimum wait before requesting a repair.
    pub t_min: Duration,
    /// Upper bound of the repair window.
    pub t_max: Duration,
    /// Number of response groups sharing the load.
    pub num_response_groups: usize,
    /// Capacity of each repair buffer.
    pub buffer_size: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            t_min: Duration::from_secs(30),
            t_max: Duration::from_secs(120),
            num_response_groups: 1,
            buffer_size: 1000,
        }
    }
}

/// Snapshot of pending repair work.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairStats {
    pub pending_requests: usize,
    pub pending_responses: usize,
    pub next_request_time: Option<u64>,
    pub next_response_time: Option<u64>,
}

/// Repair timing and bookkeeping for one participant in one channel.
#[derive(Debug, Clone)]
pub struct RepairManager {
    participant_id: SenderId,
    config: RepairConfig,
    outgoing: OutgoingRepairBuffer,
    incoming: IncomingRepairBuffer,
}

impl RepairManager {
    pub fn new(participant_id: SenderId, config: RepairConfig) -> Self {
        tracing::info!("Repair manager initialized for participant {}", participant_id);
        Self {
            outgoing: OutgoingRepairBuffer::new(config.buffer_size),
            incoming: IncomingRepairBuffer::new(config.buffer_size),
            participant_id,
            config,
        }
    }

    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    /// `T_req = now + hash(participant, message) % (t_max - t_min) + t_min`.
    pub fn t_req(&self, message_id: &MessageId, now: u64) -> u64 {
        let t_min = millis(self.config.t_min);
        let range = millis(self.config.t_max).saturating_sub(t_min);
        let hash = combined_hash(self.participant_id.as_str(), message_id.as_str());
        let offset = if range == 0 { 0 } else { to_safe_integer(hash % range) };
        now.saturating_add(offset).saturating_add(t_min)
    }

    /// `T_resp = now + (distance(participant, sender) * hash(message)) % t_max`.
    pub fn t_resp(&self, sender_id: &SenderId, message_id: &MessageId, now: u64) -> u64 {
        let t_max = millis(self.config.t_max);
        if t_max == 0 {
            return now;
        }
        let distance = xor_distance(self.participant_id.as_str(), sender_id.as_str());
        let product = u128::from(distance) * u128::from(hash_to_integer(message_id.as_str()));
        let offset = (product % u128::from(t_max)) as u64;
        now.saturating_add(to_safe_integer(offset))
    }

    /// Whether this participant should answer repairs for `message_id` sent by `sender_id`.
    pub fn is_in_response_group(&self, sender_id: &SenderId, message_id: &MessageId) -> bool {
        if sender_id.as_str().is_empty() {
            return false;
        }
        let groups = self.config.num_response_groups as u64;
        if groups <= 1 {
            return true;
        }
        let ours = combined_hash(self.participant_id.as_str(), message_id.as_str()) % groups;
        let theirs = combined_hash(sender_id.as_str(), message_id.as_str()) % groups;
        ours == theirs
    }

    /// Schedule repair requests for dependencies we are missing.
    ///
    /// Returns the newly scheduled ids with their `T_req`.
    pub fn mark_dependencies_missing(
        &mut self,
        missing: &[HistoryEntry],
        now: u64,
    ) -> Vec<(MessageId, u64)> {
        let mut queued = Vec::new();
        for entry in missing {
            let t_req = self.t_req(&entry.message_id, now);
            if self.outgoing.add(entry.clone(), t_req) {
                tracing::debug!("Queued repair request for {} at T_req={}", entry.message_id, t_req);
                queued.push((entry.message_id.clone(), t_req));
            }
        }
        queued
    }

    /// The message arrived: nothing left to request or answer.
    pub fn mark_message_received(&mut self, message_id: &MessageId) {
        self.outgoing.remove(message_id);
        self.incoming.remove(message_id);
    }

    /// Requests due at `now`, to attach to the next outgoing message.
    pub fn repair_requests(&mut self, now: u64) -> Vec<HistoryEntry> {
        self.outgoing.eligible(now, MAX_REPAIR_REQUESTS_PER_MESSAGE)
    }

    /// Handle repair requests carried by a received message.
    ///
    /// Our own pending request for the same id is dropped since someone
    /// else asked. If we hold the message and are in its response group, a
    /// rebroadcast is scheduled. Returns the newly scheduled ids with their
    /// `T_resp`.
    pub fn process_incoming_requests<H: LocalHistory + ?Sized>(
        &mut self,
        requests: &[HistoryEntry],
        history: &H,
        now: u64,
    ) -> Vec<(MessageId, u64)> {
        let mut scheduled = Vec::new();
        for request in requests {
            self.outgoing.remove(&request.message_id);

            if !history.contains(&request.message_id) {
                tracing::debug!("Cannot repair {}: not in local history", request.message_id);
                continue;
            }
            let Some(sender_id) = request.sender_id.as_ref() else {
                tracing::warn!(
                    "Cannot determine response group for {}: no sender id",
                    request.message_id
                );
                continue;
            };
            if !self.is_in_response_group(sender_id, &request.message_id) {
                tracing::debug!("Not in response group for {}", request.message_id);
                continue;
            }

            let t_resp = self.t_resp(sender_id, &request.message_id, now);
            if self.incoming.add(request.clone(), t_resp) {
                tracing::debug!("Will repair {} at T_resp={}", request.message_id, t_resp);
                scheduled.push((request.message_id.clone(), t_resp));
            }
        }
        scheduled
    }

    /// Messages whose rebroadcast is due at `now`.
    pub fn sweep_incoming<H: LocalHistory + ?Sized>(
        &mut self,
        history: &H,
        now: u64,
    ) -> Vec<ContentMessage> {
        self.incoming
            .ready(now)
            .into_iter()
            .filter_map(|entry| {
                let found = history.find(&entry.message_id).cloned();
                if found.is_none() {
                    tracing::warn!("Message {} no longer in local history", entry.message_id);
                }
                found
            })
            .collect()
    }

    /// Resize response groups for the current number of participants.
    pub fn update_response_groups(&mut self, num_participants: usize) {
        self.config.num_response_groups =
            (num_participants / PARTICIPANTS_PER_RESPONSE_GROUP).max(1);
        tracing::info!(
            "Updated response groups to {} for {} participants",
            self.config.num_response_groups,
            num_participants
        );
    }

    pub fn is_pending_request(&self, message_id: &MessageId) -> bool {
        self.outgoing.has(message_id)
    }

    pub fn is_pending_response(&self, message_id: &MessageId) -> bool {
        self.incoming.has(message_id)
    }

    pub fn stats(&self) -> RepairStats {
        RepairStats {
            pending_requests: self.outgoing.len(),
            pending_responses: self.incoming.len(),
            next_request_time: self.outgoing.next_time(),
            next_response_time: self.incoming.next_time(),
        }
    }

    pub fn clear(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use waku_sds_core::ChannelId;
    use waku_sds_history::MemLocalHistory;

    fn manager(id: &str) -> RepairManager {
        RepairManager::new(SenderId::from(id), RepairConfig::default())
    }

    fn entry(id: &str, sender: &str) -> HistoryEntry {
        HistoryEntry::new(MessageId::from(id)).with_sender(SenderId::from(sender))
    }

    fn history_with(id: &str) -> MemLocalHistory {
        let mut history = MemLocalHistory::new();
        history
            .push(vec![ContentMessage::new(
                MessageId::from(id),
                ChannelId::from("c"),
                SenderId::from("origin"),
                1,
                vec![1u8],
            )])
            .unwrap();
        history
    }

    #[test]
    fn test_t_req_within_window() {
        let m = manager("alice");
        for i in 0..100 {
            let t = m.t_req(&MessageId::from(format!("m{}", i).as_str()), 1_000);
            assert!(t >= 1_000 + 30_000);
            assert!(t < 1_000 + 120_000);
        }
    }

    #[test]
    fn test_t_req_deterministic_per_participant() {
        let id = MessageId::from("m");
        assert_eq!(manager("alice").t_req(&id, 0), manager("alice").t_req(&id, 0));
        let spread: std::collections::HashSet<u64> = (0..20)
            .map(|i| manager(&format!("peer-{}", i)).t_req(&id, 0))
            .collect();
        assert!(spread.len() > 15);
    }

    #[test]
    fn test_t_resp_within_window() {
        let m = manager("alice");
        for i in 0..100 {
            let t = m.t_resp(&SenderId::from("bob"), &MessageId::from(format!("m{}", i).as_str()), 500);
            assert!((500..500 + 120_000).contains(&t));
        }
        // The original sender answers immediately.
        assert_eq!(m.t_resp(&SenderId::from("alice"), &MessageId::from("m"), 500), 500);
    }

    #[test]
    fn test_response_groups() {
        let mut m = manager("alice");
        assert!(m.is_in_response_group(&SenderId::from("bob"), &MessageId::from("m")));
        assert!(!m.is_in_response_group(&SenderId::from(""), &MessageId::from("m")));

        m.update_response_groups(1_000);
        assert_eq!(m.config().num_response_groups, 7);
        let members = (0..200)
            .filter(|i| {
                m.is_in_response_group(&SenderId::from("bob"), &MessageId::from(format!("m{}", i).as_str()))
            })
            .count();
        assert!(members > 0 && members < 200);

        m.update_response_groups(3);
        assert_eq!(m.config().num_response_groups, 1);
    }

    #[test]
    fn test_request_lifecycle() {
        let mut m = manager("alice");
        let queued = m.mark_dependencies_missing(&[entry("lost", "bob")], 0);
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].0, MessageId::from("lost"));
        assert_eq!(queued[0].1, m.t_req(&MessageId::from("lost"), 0));
        assert!(m.mark_dependencies_missing(&[entry("lost", "bob")], 0).is_empty());

        assert!(m.repair_requests(1_000).is_empty());
        let due = m.repair_requests(120_000);
        assert_eq!(due.len(), 1);
        assert!(m.repair_requests(120_000).is_empty());

        m.mark_message_received(&MessageId::from("lost"));
        assert!(!m.is_pending_request(&MessageId::from("lost")));
    }

    #[test]
    fn test_foreign_request_cancels_ours_and_schedules_response() {
        let mut m = manager("alice");
        m.mark_dependencies_missing(&[entry("x", "bob")], 0);

        let history = history_with("held");
        let scheduled = m.process_incoming_requests(
            &[entry("x", "bob"), entry("held", "origin"), entry("unknown", "bob")],
            &history,
            0,
        );
        assert!(!m.is_pending_request(&MessageId::from("x")));
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].0, MessageId::from("held"));

        let ready = m.sweep_incoming(&history, 120_000);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].message_id, MessageId::from("held"));
        assert_eq!(m.stats(), RepairStats::default());
    }

    #[test]
    fn test_request_without_sender_ignored() {
        let mut m = manager("alice");
        let history = history_with("held");
        let scheduled = m.process_incoming_requests(
            &[HistoryEntry::new(MessageId::from("held"))],
            &history,
            0,
        );
        assert!(scheduled.is_empty());
        assert!(!m.is_pending_response(&MessageId::from("held")));
    }
}
