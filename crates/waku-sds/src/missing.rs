//! Store retrieval of missing causal dependencies.
//!
//! When a received message references dependencies we do not hold, their
//! retrieval hints are tracked here. A periodic tick asks the store for
//! them. Each participant waits a deterministic per-message delay before
//! its first query, so that participants missing the same message do not
//! all query at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use waku_sds_channel::repair::{combined_hash, to_scheduling_delay};
use waku_sds_core::{Clock, MessageId, SenderId, SystemClock};

use crate::error::TransportError;
use crate::transport::{RetrievedMessage, Retriever};

/// Configuration for missing message retrieval.
#[derive(Debug, Clone)]
pub struct MissingMessageConfig {
    /// A query running longer than this counts as failed.
    pub retrieval_timeout: Duration,
    /// Queries per message before it is declared irretrievable.
    pub max_attempts: u32,
    /// Window for the per-participant delay before the first query.
    pub delay_window: Duration,
}

impl Default for MissingMessageConfig {
    fn default() -> Self {
        Self {
            retrieval_timeout: Duration::from_secs(30),
            max_attempts: 5,
            delay_window: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
struct MissingEntry {
    retrieval_hint: Bytes,
    not_before: u64,
    attempts: u32,
}

/// How a retrieval tick ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetrievalOutcome {
    /// Nothing was eligible.
    Idle,
    /// Another retrieval is in flight.
    Busy,
    Completed,
    Failed(String),
    TimedOut,
    /// Stopped through [`MissingMessageTracker::stop`].
    Cancelled,
}

/// Result of [`MissingMessageTracker::retrieve_missing_messages`].
#[derive(Debug, Clone)]
pub struct RetrievalReport {
    /// Payloads returned by the store, to feed into the receive path.
    pub retrieved: Vec<RetrievedMessage>,
    /// Messages that used up their attempts, with their hints.
    pub exhausted: Vec<(MessageId, Bytes)>,
    pub outcome: RetrievalOutcome,
}

impl RetrievalReport {
    fn empty(outcome: RetrievalOutcome) -> Self {
        Self {
            retrieved: Vec::new(),
            exhausted: Vec::new(),
            outcome,
        }
    }
}

/// Tracks missing messages and retrieves them from the store.
pub struct MissingMessageTracker {
    participant_id: SenderId,
    config: MissingMessageConfig,
    retriever: Arc<dyn Retriever>,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<MessageId, MissingEntry>>,
    /// Held for the duration of a retrieval.
    in_flight: tokio::sync::Mutex<()>,
    cancel: Mutex<CancellationToken>,
}

impl MissingMessageTracker {
    pub fn new(
        participant_id: SenderId,
        retriever: Arc<dyn Retriever>,
        config: MissingMessageConfig,
    ) -> Self {
        Self::with_clock(participant_id, retriever, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        participant_id: SenderId,
        retriever: Arc<dyn Retriever>,
        config: MissingMessageConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            participant_id,
            config,
            retriever,
            clock,
            entries: Mutex::new(HashMap::new()),
            in_flight: tokio::sync::Mutex::new(()),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Track a missing message. Tracking an id twice keeps the first entry.
    pub fn add_missing_message(&self, id: MessageId, retrieval_hint: Bytes) {
        let delay = to_scheduling_delay(
            combined_hash(self.participant_id.as_str(), id.as_str()),
            self.config.delay_window,
        );
        let not_before = self
            .clock
            .now_millis()
            .saturating_add(delay.as_millis() as u64);

        self.entries.lock().entry(id).or_insert_with_key(|id| {
            tracing::debug!("Tracking missing message {}, first query after {:?}", id, delay);
            MissingEntry {
                retrieval_hint,
                not_before,
                attempts: 0,
            }
        });
    }

    /// Stop tracking a message, typically because it arrived.
    pub fn remove_missing_message(&self, id: &MessageId) {
        if self.entries.lock().remove(id).is_some() {
            tracing::debug!("No longer missing {}", id);
        }
    }

    pub fn is_tracked(&self, id: &MessageId) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// One retrieval tick.
    ///
    /// Queries the store for every eligible entry unless a retrieval is
    /// already running. Entries whose payload came back are resolved.
    /// Every other queried entry uses up an attempt, unless the tick was
    /// cancelled; entries out of attempts are returned as exhausted.
    pub async fn retrieve_missing_messages(&self) -> RetrievalReport {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::debug!("Retrieval already in flight");
            return RetrievalReport::empty(RetrievalOutcome::Busy);
        };

        let now = self.clock.now_millis();
        let queried: Vec<(MessageId, Bytes)> = self
            .entries
            .lock()
            .iter()
            .filter(|(_, entry)| entry.not_before <= now)
            .map(|(id, entry)| (id.clone(), entry.retrieval_hint.clone()))
            .collect();
        if queried.is_empty() {
            return RetrievalReport::empty(RetrievalOutcome::Idle);
        }

        let cancel = self.cancel.lock().child_token();
        let hints = queried.iter().map(|(_, hint)| hint.clone()).collect();
        tracing::debug!("Querying store for {} missing messages", queried.len());

        let mut retrieved = Vec::new();
        let outcome = match tokio::time::timeout(
            self.config.retrieval_timeout,
            self.query(hints, cancel.clone(), &mut retrieved),
        )
        .await
        {
            Ok(Ok(())) => RetrievalOutcome::Completed,
            Ok(Err(TransportError::Cancelled)) => RetrievalOutcome::Cancelled,
            Ok(Err(e)) => RetrievalOutcome::Failed(e.to_string()),
            Err(_) => {
                cancel.cancel();
                RetrievalOutcome::TimedOut
            }
        };

        match &outcome {
            RetrievalOutcome::Cancelled => tracing::debug!("Retrieval cancelled"),
            RetrievalOutcome::Failed(e) => tracing::warn!("Retrieval failed: {}", e),
            RetrievalOutcome::TimedOut => tracing::warn!(
                "Retrieval timed out after {:?}",
                self.config.retrieval_timeout
            ),
            _ => {}
        }

        let mut exhausted = Vec::new();
        if outcome != RetrievalOutcome::Cancelled {
            let mut entries = self.entries.lock();
            for (id, hint) in queried {
                if retrieved.iter().any(|m| m.retrieval_hint == hint) {
                    entries.remove(&id);
                    continue;
                }
                let Some(entry) = entries.get_mut(&id) else {
                    continue;
                };
                entry.attempts += 1;
                if entry.attempts >= self.config.max_attempts {
                    tracing::warn!(
                        "Giving up on {} after {} retrieval attempts",
                        id,
                        entry.attempts
                    );
                    entries.remove(&id);
                    exhausted.push((id, hint));
                }
            }
        }

        RetrievalReport {
            retrieved,
            exhausted,
            outcome,
        }
    }

    async fn query(
        &self,
        hints: Vec<Bytes>,
        cancel: CancellationToken,
        retrieved: &mut Vec<RetrievedMessage>,
    ) -> Result<(), TransportError> {
        let mut stream = self.retriever.query(hints, cancel.clone()).await?;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                item = stream.next() => match item {
                    Some(Ok(message)) => retrieved.push(message),
                    Some(Err(e)) => tracing::warn!("Store returned an error item: {}", e),
                    None => return Ok(()),
                },
            }
        }
    }

    /// Cancel any in-flight retrieval, wait for it to settle, and forget
    /// every tracked entry.
    ///
    /// The tracker can be used again afterwards.
    pub async fn stop(&self) {
        self.cancel.lock().cancel();
        let _settled = self.in_flight.lock().await;
        self.entries.lock().clear();
        *self.cancel.lock() = CancellationToken::new();
        tracing::debug!("Missing message tracker stopped");
    }
}
