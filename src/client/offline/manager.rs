//! # Sync Queue Manager
//!
//! Owns the sync operations namespace: enqueue, drain, and maintenance.
//!
//! ## Drain
//!
//! A drain loads every ready operation, orders it by priority (high first)
//! then age, and dispatches it in batches of `concurrency_limit`. Each batch
//! runs concurrently and settles completely before the next one starts.
//! Only one drain runs at a time; a second caller gets
//! [`DrainOutcome::Skipped`] instead of waiting, and the running drain makes
//! one more pass on its behalf.
//!
//! ```text
//! pending ──▶ syncing ──▶ completed
//!    ▲           │
//!    └─ retry ◀──┤
//!                └──────▶ failed
//! ```

use futures_util::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use uuid::Uuid;

use crate::client::local_db::DurableStore;
use crate::client::offline::dispatch::{HandlerError, HandlerRegistry};
use crate::client::offline::queue::{OperationCounts, OperationQueue};
use crate::client::offline::retry::{BackoffPolicy, RetryDecision, RetryScheduler};
use crate::client::offline::template::TemplateContext;
use crate::client::sync::event_bus::EventBus;
use crate::client::sync::metrics::DrainMetrics;
use crate::client::sync::network_monitor::NetworkMonitor;
use crate::shared::clock::SharedClock;
use crate::shared::config::QueueConfig;
use crate::shared::error::QueueError;
use crate::shared::event::{DrainPlan, DrainReport, QueueEvent};
use crate::shared::operation::{OperationSpec, SyncOperation, SyncOperationStatus, SyncPayload};

/// Why a drain did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another drain holds the busy flag
    InFlight,
    Offline,
}

/// Result of a drain request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Skipped(SkipReason),
    Completed(DrainReport),
}

impl DrainOutcome {
    pub fn report(&self) -> Option<&DrainReport> {
        match self {
            DrainOutcome::Completed(report) => Some(report),
            DrainOutcome::Skipped(_) => None,
        }
    }
}

/// Clears the busy flag when the drain ends, however it ends
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sync operation queue
#[derive(Debug)]
pub struct SyncQueueManager {
    operations: OperationQueue,
    registry: HandlerRegistry,
    retry: RetryScheduler,
    events: Arc<EventBus>,
    network: Arc<NetworkMonitor>,
    clock: SharedClock,
    config: QueueConfig,
    sequence: AtomicU64,
    draining: AtomicBool,
    rerun_requested: AtomicBool,
    metrics: Mutex<DrainMetrics>,
}

impl SyncQueueManager {
    pub fn new(
        config: QueueConfig,
        store: Arc<dyn DurableStore>,
        registry: HandlerRegistry,
        events: Arc<EventBus>,
        network: Arc<NetworkMonitor>,
        clock: SharedClock,
    ) -> Self {
        Self {
            operations: OperationQueue::new(store),
            registry,
            retry: RetryScheduler::new(BackoffPolicy::exponential(config.backoff_base())),
            events,
            network,
            clock,
            config,
            sequence: AtomicU64::new(0),
            draining: AtomicBool::new(false),
            rerun_requested: AtomicBool::new(false),
            metrics: Mutex::new(DrainMetrics::new()),
        }
    }

    pub fn operations(&self) -> &OperationQueue {
        &self.operations
    }

    pub fn retry_scheduler(&self) -> &RetryScheduler {
        &self.retry
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> DrainMetrics {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Continue sequence numbers after the highest one on record
    pub async fn seed_sequence(&self) -> Result<u64, QueueError> {
        let max = self.operations.max_sequence().await?;
        self.sequence.fetch_max(max, Ordering::SeqCst);
        Ok(max)
    }

    /// Persist a new pending operation and announce it
    ///
    /// Never touches the network; the operation goes out on the next drain.
    pub async fn queue_operation(&self, spec: OperationSpec) -> Result<Uuid, QueueError> {
        let now = self.clock.now();
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let mut operation = SyncOperation::from_spec(&spec, now, sequence);
        operation.max_retries = spec.max_retries.unwrap_or(self.config.max_retries);

        if spec.render_templates {
            let job_id = match &operation.payload {
                SyncPayload::Analysis(a) => Some(a.job_id),
                _ => None,
            };
            let context = TemplateContext {
                operation_id: operation.id,
                user_id: spec.user_id.clone(),
                timestamp: now,
                job_id,
                kind: operation.kind(),
            };
            operation.payload = context.render_payload(&operation.payload)?;
        }

        self.operations.save(&operation).await?;
        tracing::info!(
            "[SyncQueue] Queued {} {} operation {} ({:?})",
            operation.operation,
            operation.kind(),
            operation.id,
            operation.priority
        );

        let id = operation.id;
        self.events.emit(QueueEvent::SyncQueued(operation));
        Ok(id)
    }

    /// Dispatch every ready operation
    ///
    /// A caller that finds a drain in flight leaves a rerun request behind,
    /// and the running drain makes another pass before it lets go of the
    /// busy flag. Work that becomes ready mid-drain (a retry timer firing,
    /// a new enqueue with a skipped trigger) is therefore never stranded.
    pub async fn drain(&self) -> Result<DrainOutcome, QueueError> {
        if !self.network.is_online() {
            tracing::debug!("[SyncQueue] Offline, drain skipped");
            self.record_skip();
            return Ok(DrainOutcome::Skipped(SkipReason::Offline));
        }

        let Some(mut guard) = DrainGuard::acquire(&self.draining) else {
            self.rerun_requested.store(true, Ordering::Release);
            tracing::debug!("[SyncQueue] Drain already in flight, rerun requested");
            self.record_skip();
            return Ok(DrainOutcome::Skipped(SkipReason::InFlight));
        };

        let started = Instant::now();
        let swept = match self
            .operations
            .sweep_completed(self.config.completed_retention(), self.clock.now())
            .await
        {
            Ok(swept) => swept,
            Err(e) => {
                tracing::warn!("[SyncQueue] Retention sweep failed: {}", e);
                0
            }
        };

        let mut report = DrainReport {
            swept,
            ..Default::default()
        };
        let mut pass = 0usize;

        loop {
            self.rerun_requested.store(false, Ordering::Release);
            pass += 1;
            if !self.run_pass(pass, &mut report).await? {
                break;
            }
            if self.rerun_requested.load(Ordering::Acquire) {
                continue;
            }

            // A request can land between the check above and the release
            drop(guard);
            if !self.rerun_requested.load(Ordering::Acquire) {
                break;
            }
            match DrainGuard::acquire(&self.draining) {
                Some(next) => guard = next,
                // Whoever holds the flag now loads after the request
                None => break,
            }
        }

        self.metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record_drain(&report, started.elapsed());

        tracing::info!(
            "[SyncQueue] Drain finished after {} passes: {} completed, {} retrying, {} failed",
            pass,
            report.completed,
            report.retried,
            report.failed
        );
        self.events.emit(QueueEvent::SyncCompleted(report.clone()));
        Ok(DrainOutcome::Completed(report))
    }

    /// Load and dispatch one snapshot of ready operations
    ///
    /// Returns false when the network dropped and the drain should stop.
    async fn run_pass(&self, pass: usize, report: &mut DrainReport) -> Result<bool, QueueError> {
        let now = self.clock.now();
        let ready = self.operations.ready(now).await?;
        let batches: Vec<Vec<SyncOperation>> = ready
            .chunks(self.config.concurrency_limit.max(1))
            .map(<[SyncOperation]>::to_vec)
            .collect();

        tracing::info!(
            "[SyncQueue] Pass {}: draining {} operations in {} batches",
            pass,
            ready.len(),
            batches.len()
        );
        if pass == 1 {
            self.events.emit(QueueEvent::SyncStarted(DrainPlan {
                started_at: now,
                pending: ready.len(),
                batches: batches.len(),
            }));
        }

        for batch in batches {
            if !self.network.is_online() {
                tracing::info!("[SyncQueue] Went offline mid-drain, stopping at batch boundary");
                return Ok(false);
            }
            report.batches += 1;
            self.run_batch(batch, report).await;
        }
        Ok(self.network.is_online())
    }

    async fn run_batch(&self, batch: Vec<SyncOperation>, report: &mut DrainReport) {
        let mut in_flight = Vec::with_capacity(batch.len());
        for mut operation in batch {
            operation.status = SyncOperationStatus::Syncing;
            operation.last_attempt = Some(self.clock.now());
            match self.operations.save(&operation).await {
                Ok(()) => in_flight.push(operation),
                Err(e) => {
                    tracing::error!("[SyncQueue] Could not mark {} syncing: {}", operation.id, e);
                }
            }
        }

        let results = join_all(in_flight.iter().map(|op| self.execute_operation(op))).await;

        for (operation, result) in in_flight.into_iter().zip(results) {
            report.dispatched += 1;
            self.settle(operation, result, report).await;
        }
    }

    /// Run one operation through its handler
    pub async fn execute_operation(&self, operation: &SyncOperation) -> Result<(), HandlerError> {
        let dispatch = self.registry.dispatch(operation);
        match self.config.handler_timeout() {
            Some(limit) => tokio::time::timeout(limit, dispatch).await.unwrap_or_else(|_| {
                Err(HandlerError::transient(format!("handler timed out after {:?}", limit)))
            }),
            None => dispatch.await,
        }
    }

    async fn settle(
        &self,
        mut operation: SyncOperation,
        result: Result<(), HandlerError>,
        report: &mut DrainReport,
    ) {
        let now = self.clock.now();

        let error = match result {
            Ok(()) => {
                operation.status = SyncOperationStatus::Completed;
                operation.completed_at = Some(now);
                operation.next_eligible_at = None;
                operation.error_message = None;
                if self.persist(&mut operation, report).await {
                    report.completed += 1;
                    tracing::debug!("[SyncQueue] Operation {} completed", operation.id);
                    self.events.emit(QueueEvent::SyncOperationCompleted(operation));
                }
                return;
            }
            Err(e) => e,
        };

        match self.retry.record_failure(&mut operation, &error, now) {
            RetryDecision::Retry { delay, .. } => {
                self.persist(&mut operation, report).await;
                report.retried += 1;
                tracing::warn!(
                    "[SyncQueue] Operation {} failed (attempt {}/{}), retrying in {:?}: {}",
                    operation.id,
                    operation.retry_count,
                    operation.max_retries,
                    delay,
                    error
                );
                self.retry.arm(operation.id, delay);
            }
            RetryDecision::Exhausted | RetryDecision::Permanent => {
                if !self.persist(&mut operation, report).await {
                    return;
                }
                report.failed += 1;
                tracing::error!(
                    "[SyncQueue] Operation {} failed after {} attempts: {}",
                    operation.id,
                    operation.retry_count,
                    error
                );
                self.events.emit(QueueEvent::SyncOperationFailed(operation));
            }
        }
    }

    /// Record a settled outcome, falling back to `pending` if the store refuses it
    ///
    /// A record left `syncing` is skipped by every drain until the next
    /// restart. On a second failure startup recovery resets it. Returns
    /// whether the outcome itself was recorded.
    async fn persist(&self, operation: &mut SyncOperation, report: &mut DrainReport) -> bool {
        let error = match self.operations.save(operation).await {
            Ok(()) => return true,
            Err(e) => e,
        };
        report.persist_failures += 1;
        tracing::error!(
            "[SyncQueue] Failed to record {:?} for operation {}: {}",
            operation.status,
            operation.id,
            error
        );

        operation.status = SyncOperationStatus::Pending;
        operation.completed_at = None;
        operation.error_message = Some(format!("failed to record outcome: {}", error));
        if let Err(e) = self.operations.save(operation).await {
            tracing::error!(
                "[SyncQueue] Operation {} stays syncing until restart: {}",
                operation.id,
                e
            );
        }
        false
    }

    fn record_skip(&self) {
        self.metrics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record_skip();
    }

    pub async fn operation_counts(&self) -> Result<OperationCounts, QueueError> {
        Ok(self.operations.get_stats().await?)
    }

    /// Retention sweep on demand
    pub async fn cleanup_expired(&self) -> Result<usize, QueueError> {
        let now = self.clock.now();
        Ok(self
            .operations
            .sweep_completed(self.config.completed_retention(), now)
            .await?)
    }

    /// Remove completed and failed operations
    pub async fn clear_terminal(&self) -> Result<usize, QueueError> {
        let removed = self.operations.clear_terminal().await?;
        tracing::info!("[SyncQueue] Cleared {} finished operations", removed);
        Ok(removed)
    }

    pub async fn recover_interrupted(&self) -> Result<usize, QueueError> {
        Ok(self.operations.reset_interrupted().await?)
    }
}
