//! Logical clock.
//!
//! Lamport timestamps are anchored to wall-clock milliseconds so that
//! participants joining late do not start at zero:
//! `next = max(previous + 1, now_ms)`. Repeated increments are strictly
//! increasing even if the wall clock stalls or goes backwards.
//!
//! Remote timestamps more than [`MAX_FUTURE_DRIFT_MS`] ahead of the local
//! wall clock are not adopted, so a single peer cannot push the clock to
//! `u64::MAX`, where it would saturate and stop increasing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::LamportTimestamp;

/// How far ahead of local wall time a remote timestamp may be and still be
/// adopted by [`LamportClock::observe`]. One day.
pub const MAX_FUTURE_DRIFT_MS: u64 = 24 * 60 * 60 * 1000;

/// Compute the next timestamp after `previous` given the current wall time.
pub fn next_lamport(previous: LamportTimestamp, now_ms: u64) -> LamportTimestamp {
    previous.saturating_add(1).max(now_ms)
}

/// Source of wall-clock milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// A manually driven clock for tests and simulations.
///
/// Clones share the same underlying time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A Lamport clock over some wall-clock source.
#[derive(Debug, Clone)]
pub struct LamportClock<C = SystemClock> {
    current: LamportTimestamp,
    clock: C,
}

impl LamportClock<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for LamportClock<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> LamportClock<C> {
    /// Start a clock at the current wall time of `clock`.
    pub fn with_clock(clock: C) -> Self {
        let current = clock.now_millis();
        Self { current, clock }
    }

    /// The last timestamp issued or observed.
    pub fn current(&self) -> LamportTimestamp {
        self.current
    }

    /// Advance for a local event and return the new timestamp.
    pub fn increment(&mut self) -> LamportTimestamp {
        self.current = next_lamport(self.current, self.clock.now_millis());
        self.current
    }

    /// Adopt a remote timestamp if it is ahead of ours.
    ///
    /// Returns `false` when `remote` lies beyond [`MAX_FUTURE_DRIFT_MS`] of
    /// local wall time; such values are logged and ignored.
    pub fn observe(&mut self, remote: LamportTimestamp) -> bool {
        let limit = self.clock.now_millis().saturating_add(MAX_FUTURE_DRIFT_MS);
        if remote > limit {
            tracing::warn!(
                "Ignoring lamport timestamp {} beyond drift limit {}",
                remote,
                limit
            );
            return false;
        }
        if remote > self.current {
            self.current = remote;
        }
        true
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn wall_clock(&self) -> &C {
        &self.clock
    }
}
