//! # Retry Logic and Backoff
//!
//! Applies the failure half of the sync operation state machine and re-arms
//! operations for a later attempt.
//!
//! ## Backoff
//!
//! After a failed attempt `retry_count` is incremented and the next attempt
//! waits `2^retry_count * base`: with the default 1 s base the first retry
//! waits 2 s, the second 4 s, the third 8 s.
//!
//! ## Budget
//!
//! An operation is marked `failed` once `retry_count` reaches `max_retries`,
//! so `max_retries = 3` allows exactly three attempts. Permanent failures
//! skip the remaining budget.
//!
//! ## Re-arming
//!
//! The record returns to `pending` immediately with `next_eligible_at` set to
//! the end of the backoff window; drains skip it until then. A timer fires a
//! [`DrainTrigger::RetryDue`] when the window closes so the retry does not
//! wait for the periodic drain.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::client::offline::dispatch::HandlerError;
use crate::client::sync::scheduler::DrainTrigger;
use crate::shared::operation::{SyncOperation, SyncOperationStatus};

/// Exponential backoff configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max_delay: Option<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(1000))
    }
}

impl BackoffPolicy {
    pub fn exponential(base: Duration) -> Self {
        Self {
            base,
            max_delay: None,
        }
    }

    /// Cap every delay at `max_delay`
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    /// Delay before the attempt following failure number `retry_count`
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        let delay = self.base.checked_mul(factor).unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

/// What happened to an operation after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to `pending`, eligible again at `next_eligible_at`
    Retry {
        delay: Duration,
        next_eligible_at: DateTime<Utc>,
    },
    /// Budget used up; now `failed`
    Exhausted,
    /// Classified non-retryable; now `failed`
    Permanent,
}

/// Applies backoff decisions and owns the retry timers
#[derive(Debug)]
pub struct RetryScheduler {
    policy: BackoffPolicy,
    timers: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
    trigger_tx: Mutex<Option<mpsc::UnboundedSender<DrainTrigger>>>,
}

impl RetryScheduler {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            timers: Arc::new(Mutex::new(HashMap::new())),
            trigger_tx: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Route timer expiries into the drain trigger channel
    pub fn connect(&self, trigger_tx: mpsc::UnboundedSender<DrainTrigger>) {
        *self.trigger_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(trigger_tx);
    }

    /// Apply a failed attempt to `operation`
    pub fn record_failure(
        &self,
        operation: &mut SyncOperation,
        error: &HandlerError,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        operation.retry_count = operation.retry_count.saturating_add(1);
        operation.error_message = Some(error.to_string());

        if !error.is_retryable() {
            operation.status = SyncOperationStatus::Failed;
            operation.next_eligible_at = None;
            return RetryDecision::Permanent;
        }

        if operation.retry_count >= operation.max_retries {
            operation.status = SyncOperationStatus::Failed;
            operation.next_eligible_at = None;
            return RetryDecision::Exhausted;
        }

        let delay = self.policy.delay_for(operation.retry_count);
        let next_eligible_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        operation.status = SyncOperationStatus::Pending;
        operation.next_eligible_at = Some(next_eligible_at);

        RetryDecision::Retry {
            delay,
            next_eligible_at,
        }
    }

    /// Fire a drain trigger for `operation_id` after `delay`
    ///
    /// Re-arming an operation replaces its previous timer.
    pub fn arm(&self, operation_id: Uuid, delay: Duration) {
        let Some(trigger_tx) = self
            .trigger_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        else {
            tracing::debug!("[Retry] No trigger loop connected; {} waits for the next drain", operation_id);
            return;
        };

        let timers = Arc::clone(&self.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            timers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&operation_id);
            if trigger_tx.send(DrainTrigger::RetryDue(operation_id)).is_err() {
                tracing::debug!("[Retry] Trigger loop gone before retry of {}", operation_id);
            }
        });

        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        timers.retain(|_, h| !h.is_finished());
        if let Some(previous) = timers.insert(operation_id, handle) {
            previous.abort();
        }
    }

    pub fn cancel(&self, operation_id: &Uuid) -> bool {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        match timers.remove(operation_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every armed timer and disconnect from the trigger loop
    pub fn cancel_all(&self) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        self.trigger_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    /// Timers that have not fired yet
    pub fn armed_count(&self) -> usize {
        let timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        timers.values().filter(|h| !h.is_finished()).count()
    }
}
