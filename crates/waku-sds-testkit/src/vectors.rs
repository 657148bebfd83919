//! Known-answer vectors for the deterministic parts of SDS.
//!
//! Message ids and repair scheduling are derived from SHA-256, so every
//! implementation must agree on them exactly: participants that disagree
//! on a delay or a response group break the staggering that keeps repair
//! traffic low. Wire encodings are covered in `waku-sds-core`'s tests.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use waku_sds_channel::repair::{combined_hash, hash_to_integer, to_scheduling_delay, xor_distance};
use waku_sds_core::MessageId;

/// Payload to message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageIdVector {
    pub name: String,
    pub payload_hex: String,
    pub message_id: String,
}

/// Participant and message to delay within a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingVector {
    pub participant_id: String,
    pub message_id: String,
    pub combined_hash: u64,
    pub window_ms: u64,
    pub delay_ms: u64,
}

/// XOR distance between two participant ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistanceVector {
    pub a: String,
    pub b: String,
    pub distance: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorSet {
    pub hash_to_integer: Vec<(String, u64)>,
    pub message_ids: Vec<MessageIdVector>,
    pub scheduling: Vec<SchedulingVector>,
    pub distances: Vec<DistanceVector>,
}

pub fn message_id_vectors() -> Vec<MessageIdVector> {
    let v = |name: &str, payload_hex: &str, message_id: &str| MessageIdVector {
        name: name.to_string(),
        payload_hex: payload_hex.to_string(),
        message_id: message_id.to_string(),
    };
    vec![
        v(
            "ascii",
            "68656c6c6f",
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
        ),
        v(
            "binary",
            "000102",
            "ae4b3280e56e2faf83f414a6e3dabe9d5fbe18976544c05fed121accb85b53fc",
        ),
        v(
            "utf-8",
            "d0bfd180d0b8d0b2d0b5d182",
            "e58f1e8c55fa105bdd3f40e5037eb0b039b5998d52c05e6cd98878dd2da5cab2",
        ),
    ]
}

pub fn scheduling_vectors() -> Vec<SchedulingVector> {
    let v = |participant_id: &str, message_id: &str, combined_hash, window_ms, delay_ms| {
        SchedulingVector {
            participant_id: participant_id.to_string(),
            message_id: message_id.to_string(),
            combined_hash,
            window_ms,
            delay_ms,
        }
    };
    vec![
        v("alice", "msg-1", 13354995527649292896, 30_000, 24_234),
        v("alice", "msg-1", 13354995527649292896, 5_000, 4_234),
        v("bob", "msg-1", 5419079544470854483, 30_000, 8_892),
        v("bob", "msg-1", 5419079544470854483, 120_000, 38_892),
        v("carol", "0f1e2d", 13334733674572657768, 120_000, 71_088),
        v("carol", "0f1e2d", 13334733674572657768, 0, 0),
    ]
}

pub fn distance_vectors() -> Vec<DistanceVector> {
    let v = |a: &str, b: &str, distance| DistanceVector {
        a: a.to_string(),
        b: b.to_string(),
        distance,
    };
    vec![
        v("alice", "bob", 12280807185182410357),
        v("bob", "carol", 14812601818935533124),
        v("alice", "alice", 0),
    ]
}

pub fn all_vectors() -> VectorSet {
    VectorSet {
        hash_to_integer: vec![
            ("alice".to_string(), 3159282601090220207),
            (String::new(), 16406829232824261652),
        ],
        message_ids: message_id_vectors(),
        scheduling: scheduling_vectors(),
        distances: distance_vectors(),
    }
}

/// Check every vector against this implementation.
///
/// Returns a description of each mismatch; empty when all agree.
pub fn verify(set: &VectorSet) -> Vec<String> {
    let mut failures = Vec::new();

    for (input, expected) in &set.hash_to_integer {
        let actual = hash_to_integer(input);
        if actual != *expected {
            failures.push(format!("hash_to_integer({:?}): {} != {}", input, actual, expected));
        }
    }

    for v in &set.message_ids {
        match hex::decode(&v.payload_hex) {
            Ok(payload) => {
                let actual = MessageId::from_payload(&payload);
                if actual.as_str() != v.message_id {
                    failures.push(format!("message id {}: {} != {}", v.name, actual, v.message_id));
                }
            }
            Err(e) => failures.push(format!("message id {}: bad hex: {}", v.name, e)),
        }
    }

    for v in &set.scheduling {
        let hash = combined_hash(&v.participant_id, &v.message_id);
        if hash != v.combined_hash {
            failures.push(format!(
                "combined_hash({}, {}): {} != {}",
                v.participant_id, v.message_id, hash, v.combined_hash
            ));
        }
        let delay = to_scheduling_delay(hash, Duration::from_millis(v.window_ms));
        if delay != Duration::from_millis(v.delay_ms) {
            failures.push(format!(
                "delay({}, {}, {} ms): {:?} != {} ms",
                v.participant_id, v.message_id, v.window_ms, delay, v.delay_ms
            ));
        }
    }

    for v in &set.distances {
        let actual = xor_distance(&v.a, &v.b);
        if actual != v.distance {
            failures.push(format!("xor_distance({}, {}): {} != {}", v.a, v.b, actual, v.distance));
        }
    }

    failures
}

pub fn to_json(set: &VectorSet) -> serde_json::Result<String> {
    serde_json::to_string_pretty(set)
}

pub fn from_json(json: &str) -> serde_json::Result<VectorSet> {
    serde_json::from_str(json)
}
