//! Deterministic scheduling functions.
//!
//! Every participant derives its wait times from hashes of its own id and
//! the message id. The same participant always waits the same amount for
//! the same message, while different participants are spread across the
//! window without coordinating.

use std::time::Duration;

use sha2::{Digest, Sha256};

/// Largest integer exactly representable as an IEEE-754 double.
///
/// Delays are reduced below this bound so they agree with implementations
/// that schedule with floating point milliseconds.
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// First 8 bytes of SHA-256 of the UTF-8 input, big-endian.
pub fn hash_to_integer(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// Hash of a participant id concatenated with a message id.
pub fn combined_hash(participant_id: &str, message_id: &str) -> u64 {
    let mut joined = String::with_capacity(participant_id.len() + message_id.len());
    joined.push_str(participant_id);
    joined.push_str(message_id);
    hash_to_integer(&joined)
}

/// XOR distance between two participant ids.
pub fn xor_distance(a: &str, b: &str) -> u64 {
    hash_to_integer(a) ^ hash_to_integer(b)
}

pub fn to_safe_integer(value: u64) -> u64 {
    value % MAX_SAFE_INTEGER
}

/// Reduce a hash into a delay within `[0, window)`.
///
/// An empty window yields no delay.
pub fn to_scheduling_delay(value: u64, window: Duration) -> Duration {
    let window_ms = window.as_millis().min(u128::from(u64::MAX)) as u64;
    if window_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(to_safe_integer(value) % window_ms)
}
