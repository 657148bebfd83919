//! Per-channel sync status: are we caught up, behind, or have we given up
//! on something?
//!
//! Every message id the channel hears about is in at most one of three
//! sets: received, missing, or lost. Status is `Synced` when nothing is
//! missing. Lost messages do not prevent `Synced`; the counts tell the
//! consumer about them.
//!
//! Received ids are remembered in a bounded LRU set; the `received` count
//! keeps growing past it. An evicted id that is reported again is counted
//! again.
//!
//! Status events are coalesced. Updates made within one synchronous unit of
//! work produce a single event: either inside an explicit
//! [`SyncStatusTracker::batch`], or via emission deferred to a spawned task
//! that runs once the caller yields.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use waku_sds_core::MessageId;

use crate::error::SyncStatusError;

const EVENT_CAPACITY: usize = 64;

/// Default number of received ids remembered.
pub const DEFAULT_RECEIVED_IDS_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Nothing known to be missing.
    Synced,
    /// Some messages are missing and may still be retrieved.
    Syncing,
}

/// Current counts. `missing` excludes messages given up on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStatusDetail {
    pub received: usize,
    pub missing: usize,
    pub lost: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatusEvent {
    pub status: SyncStatus,
    pub detail: SyncStatusDetail,
}

struct State {
    received: LruCache<MessageId, ()>,
    received_count: usize,
    missing: HashSet<MessageId>,
    lost: HashSet<MessageId>,
    batch_depth: usize,
    dirty: bool,
    emit_scheduled: bool,
}

impl State {
    fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            received: LruCache::new(capacity),
            received_count: 0,
            missing: HashSet::new(),
            lost: HashSet::new(),
            batch_depth: 0,
            dirty: false,
            emit_scheduled: false,
        }
    }

    fn detail(&self) -> SyncStatusDetail {
        SyncStatusDetail {
            received: self.received_count,
            missing: self.missing.len(),
            lost: self.lost.len(),
        }
    }
}

struct Shared {
    state: Mutex<State>,
    events: broadcast::Sender<SyncStatusEvent>,
}

impl Shared {
    fn emit(&self) {
        let event = {
            let mut state = self.state.lock();
            state.emit_scheduled = false;
            let detail = state.detail();
            SyncStatusEvent {
                status: status_of(&detail),
                detail,
            }
        };
        if self.events.send(event).is_err() {
            tracing::trace!("No sync status subscribers");
        }
    }
}

/// Tracks received, missing and lost message ids for one channel.
///
/// Clones share state.
#[derive(Clone)]
pub struct SyncStatusTracker {
    shared: Arc<Shared>,
}

impl Default for SyncStatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStatusTracker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RECEIVED_IDS_CAPACITY)
    }

    /// Remember at most `capacity` received ids.
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::new(capacity)),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncStatusEvent> {
        self.shared.events.subscribe()
    }

    /// Mark ids as received; they stop being missing or lost.
    pub fn on_messages_received<'a>(&self, ids: impl IntoIterator<Item = &'a MessageId>) {
        {
            let mut state = self.shared.state.lock();
            for id in ids {
                state.missing.remove(id);
                state.lost.remove(id);
                if state.received.put(id.clone(), ()).is_none() {
                    state.received_count += 1;
                }
            }
        }
        self.changed();
    }

    /// Mark ids as missing.
    ///
    /// Ids already received or lost are left alone and reported back as an
    /// error: something upstream lost track of them.
    pub fn on_messages_missing<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a MessageId>,
    ) -> Result<(), SyncStatusError> {
        let mut rejected = Vec::new();
        {
            let mut state = self.shared.state.lock();
            for id in ids {
                if state.received.contains(id) || state.lost.contains(id) {
                    rejected.push(id.clone());
                } else {
                    state.missing.insert(id.clone());
                }
            }
        }
        self.changed();

        if rejected.is_empty() {
            return Ok(());
        }
        tracing::error!(
            "Messages previously received or lost were marked missing: {:?}",
            rejected
        );
        Err(SyncStatusError::AlreadyResolved(rejected))
    }

    /// Mark ids as irretrievably lost.
    pub fn on_messages_lost<'a>(&self, ids: impl IntoIterator<Item = &'a MessageId>) {
        {
            let mut state = self.shared.state.lock();
            for id in ids {
                state.missing.remove(id);
                state.lost.insert(id.clone());
            }
        }
        self.changed();
    }

    pub fn is_lost(&self, id: &MessageId) -> bool {
        self.shared.state.lock().lost.contains(id)
    }

    pub fn is_missing(&self, id: &MessageId) -> bool {
        self.shared.state.lock().missing.contains(id)
    }

    pub fn status(&self) -> SyncStatus {
        status_of(&self.detail())
    }

    pub fn detail(&self) -> SyncStatusDetail {
        self.shared.state.lock().detail()
    }

    /// Forget every tracked id. Emits nothing.
    pub fn clean_up(&self) {
        let mut state = self.shared.state.lock();
        state.received.clear();
        state.received_count = 0;
        state.missing.clear();
        state.lost.clear();
        state.dirty = false;
    }

    /// Coalesce every update until the returned guard drops into one event.
    ///
    /// Batches nest; the event is emitted when the outermost one ends.
    pub fn batch(&self) -> SyncStatusBatch {
        self.shared.state.lock().batch_depth += 1;
        SyncStatusBatch {
            tracker: self.clone(),
        }
    }

    fn changed(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.batch_depth > 0 {
                state.dirty = true;
                return;
            }
            if state.emit_scheduled {
                return;
            }
            state.emit_scheduled = true;
        }
        self.schedule_emit();
    }

    fn schedule_emit(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let shared = Arc::clone(&self.shared);
                handle.spawn(async move {
                    tokio::task::yield_now().await;
                    shared.emit();
                });
            }
            Err(_) => self.shared.emit(),
        }
    }
}

/// Guard returned by [`SyncStatusTracker::batch`].
#[must_use = "the batch ends when the guard is dropped"]
pub struct SyncStatusBatch {
    tracker: SyncStatusTracker,
}

impl Drop for SyncStatusBatch {
    fn drop(&mut self) {
        let emit = {
            let mut state = self.tracker.shared.state.lock();
            state.batch_depth = state.batch_depth.saturating_sub(1);
            if state.batch_depth > 0 || !state.dirty {
                false
            } else {
                state.dirty = false;
                // A deferred emission already pending will carry our counts.
                !state.emit_scheduled
            }
        };
        if emit {
            self.tracker.shared.emit();
        }
    }
}

fn status_of(detail: &SyncStatusDetail) -> SyncStatus {
    if detail.missing == 0 {
        SyncStatus::Synced
    } else {
        SyncStatus::Syncing
    }
}
