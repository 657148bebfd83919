//! Per-message resend loops.
//!
//! A message is republished on a fixed interval until it is acknowledged,
//! the attempt budget runs out, or the loop is cancelled.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use waku_sds_core::MessageId;

/// What an attempt decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptResult {
    /// Try again after the interval.
    Continue,
    /// Stop retrying.
    Done,
}

/// How a retry loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    Done,
    Cancelled,
    /// Every attempt was used and one more interval passed without the
    /// loop being cancelled.
    Exhausted,
}

/// Tracks the cancellation token of every active retry loop.
pub struct RetryManager {
    interval: Duration,
    max_attempts: u32,
    tasks: Mutex<HashMap<MessageId, CancellationToken>>,
}

impl RetryManager {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Register a retry loop for `id` and return its token.
    ///
    /// The token is a child of `parent`. A loop already registered for `id`
    /// is cancelled and replaced.
    pub fn register(&self, id: MessageId, parent: &CancellationToken) -> CancellationToken {
        let token = parent.child_token();
        if let Some(previous) = self.tasks.lock().insert(id, token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Cancel the retry loop for `id`, if any.
    pub fn stop(&self, id: &MessageId) {
        if let Some(token) = self.tasks.lock().remove(id) {
            tracing::debug!("Stopping retries for {}", id);
            token.cancel();
        }
    }

    /// Forget `id` once its loop has ended on its own.
    pub fn finish(&self, id: &MessageId) {
        self.tasks.lock().remove(id);
    }

    pub fn stop_all(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain().collect();
        for (_, token) in tasks {
            token.cancel();
        }
    }

    pub fn is_retrying(&self, id: &MessageId) -> bool {
        self.tasks.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Drive one retry loop.
    ///
    /// `attempt` is called with the attempt number, starting at 0, first
    /// right away and then once per interval, at most `max_attempts` times.
    pub async fn run<F, Fut>(&self, token: CancellationToken, mut attempt: F) -> RetryOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = AttemptResult>,
    {
        for n in 0..self.max_attempts {
            if n > 0 && !self.wait(&token).await {
                return RetryOutcome::Cancelled;
            }
            if token.is_cancelled() {
                return RetryOutcome::Cancelled;
            }
            if attempt(n).await == AttemptResult::Done {
                return RetryOutcome::Done;
            }
        }
        // Leave room for an acknowledgement of the last attempt.
        if !self.wait(&token).await {
            return RetryOutcome::Cancelled;
        }
        RetryOutcome::Exhausted
    }

    /// Sleep one interval. False if cancelled meanwhile.
    async fn wait(&self, token: &CancellationToken) -> bool {
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(self.interval) => true,
        }
    }
}
