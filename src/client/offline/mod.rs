//! # Offline Queue
//!
//! Offline-first work queue: analysis jobs run locally, sync operations wait
//! for connectivity, and everything survives restarts through the durable
//! store.
//!
//! ## Architecture
//!
//! - **Sync Queue Manager** (`manager.rs`): enqueue, prioritized batched drains
//! - **Retry Scheduler** (`retry.rs`): backoff state machine and retry timers
//! - **Analysis Job Processor** (`analysis.rs`): local jobs and result handoff
//! - **Runners** (`runner.rs`): in-process or worker-thread analysis
//! - **Dispatch** (`dispatch.rs`): handler registry keyed by operation kind
//! - **Templates** (`template.rs`): `{{variable}}` payload substitution
//!
//! [`OfflineQueue`] ties these together with the event bus, the network
//! monitor and the trigger loop, and owns their lifecycle.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use syncq::client::api_client::HttpOperationHandler;
//! use syncq::client::local_db::SqliteStore;
//! use syncq::client::offline::{FileMetadataAnalyzer, HandlerRegistry, OfflineQueue};
//! use syncq::shared::{OperationSpec, PreferenceSync, QueueConfig, SyncPayload};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = QueueConfig::load(None)?;
//! let store = Arc::new(SqliteStore::open(config.resolved_database_path()).await?);
//! let registry = HandlerRegistry::new().with_all(Arc::new(HttpOperationHandler::from_config(&config)?));
//!
//! let queue = OfflineQueue::builder(config, store, registry, Arc::new(FileMetadataAnalyzer)).build()?;
//! queue.init().await?;
//!
//! queue
//!     .queue_operation(OperationSpec::update(SyncPayload::Preference(PreferenceSync {
//!         key: "theme".into(),
//!         value: "dark".into(),
//!     })))
//!     .await?;
//!
//! queue.set_online(true);
//! queue.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod dispatch;
pub mod manager;
pub mod queue;
pub mod retry;
pub mod runner;
pub mod template;

// Re-export main types
pub use analysis::{AnalysisJobProcessor, JobCounts};
pub use dispatch::{HandlerError, HandlerRegistry, OperationHandler};
pub use manager::{DrainOutcome, SkipReason, SyncQueueManager};
pub use queue::{OperationCounts, OperationQueue};
pub use retry::{BackoffPolicy, RetryDecision, RetryScheduler};
pub use runner::{
    select_runner, AnalysisError, Analyzer, FileMetadataAnalyzer, InProcessRunner, JobRunner,
    WorkerRunner,
};
pub use template::{TemplateContext, TemplateError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::client::local_db::DurableStore;
use crate::client::sync::event_bus::EventBus;
use crate::client::sync::metrics::DrainMetrics;
use crate::client::sync::network_monitor::{NetworkMonitor, NetworkStatus};
use crate::client::sync::scheduler::{DrainTarget, DrainTrigger, SyncScheduler};
use crate::shared::clock::{SharedClock, SystemClock};
use crate::shared::config::QueueConfig;
use crate::shared::error::QueueError;
use crate::shared::job::AnalysisJobSpec;
use crate::shared::operation::OperationSpec;

/// Snapshot of both namespaces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub analyses: JobCounts,
    pub sync_operations: OperationCounts,
}

/// Records removed by [`OfflineQueue::clear_completed_operations`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearedRecords {
    pub operations: usize,
    pub jobs: usize,
}

/// What [`OfflineQueue::init`] found on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Highest operation sequence number on record
    pub last_sequence: u64,
    pub operations_reset: usize,
    pub jobs_reset: usize,
    pub handoffs_resumed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

/// The part of the queue the trigger loop drives
#[derive(Debug)]
struct QueueCore {
    manager: Arc<SyncQueueManager>,
    processor: Arc<AnalysisJobProcessor>,
}

#[async_trait]
impl DrainTarget for QueueCore {
    async fn on_trigger(&self, trigger: DrainTrigger) {
        if trigger == DrainTrigger::ConnectivityRestored {
            self.processor.promote_queued();
        }
        match self.manager.drain().await {
            Ok(DrainOutcome::Completed(report)) => {
                tracing::debug!("[SyncQueue] {:?} drain dispatched {}", trigger, report.dispatched);
            }
            Ok(DrainOutcome::Skipped(reason)) => {
                tracing::debug!("[SyncQueue] {:?} drain skipped: {:?}", trigger, reason);
            }
            Err(e) => tracing::error!("[SyncQueue] {:?} drain failed: {}", trigger, e),
        }
    }
}

/// Builder for [`OfflineQueue`]
pub struct OfflineQueueBuilder {
    config: QueueConfig,
    store: Arc<dyn DurableStore>,
    registry: HandlerRegistry,
    analyzer: Arc<dyn Analyzer>,
    runner: Option<Arc<dyn JobRunner>>,
    clock: SharedClock,
    initial_status: NetworkStatus,
}

impl OfflineQueueBuilder {
    /// Override the wall clock (tests, simulations)
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Use this runner instead of picking one from the config
    pub fn runner(mut self, runner: Arc<dyn JobRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Connectivity before the platform reports anything
    pub fn online(mut self, online: bool) -> Self {
        self.initial_status = if online {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        };
        self
    }

    pub fn build(self) -> Result<OfflineQueue, QueueError> {
        self.config.validate()?;

        let events = Arc::new(EventBus::new());
        let network = Arc::new(NetworkMonitor::new(self.initial_status));
        let runner = self
            .runner
            .unwrap_or_else(|| select_runner(self.analyzer, self.config.use_background_worker));

        let manager = Arc::new(SyncQueueManager::new(
            self.config.clone(),
            Arc::clone(&self.store),
            self.registry,
            Arc::clone(&events),
            Arc::clone(&network),
            Arc::clone(&self.clock),
        ));
        let processor = Arc::new(AnalysisJobProcessor::new(
            self.store,
            runner,
            Arc::clone(&manager),
            Arc::clone(&events),
            Arc::clone(&network),
            self.clock,
        ));

        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();

        Ok(OfflineQueue {
            core: Arc::new(QueueCore { manager, processor }),
            scheduler: SyncScheduler::new(self.config.drain_interval()),
            events,
            network,
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            lifecycle: Mutex::new(Lifecycle::Created),
        })
    }
}

/// Offline-first queue context
#[derive(Debug)]
pub struct OfflineQueue {
    core: Arc<QueueCore>,
    scheduler: SyncScheduler,
    events: Arc<EventBus>,
    network: Arc<NetworkMonitor>,
    trigger_tx: mpsc::UnboundedSender<DrainTrigger>,
    trigger_rx: Mutex<Option<mpsc::UnboundedReceiver<DrainTrigger>>>,
    lifecycle: Mutex<Lifecycle>,
}

impl OfflineQueue {
    pub fn builder(
        config: QueueConfig,
        store: Arc<dyn DurableStore>,
        registry: HandlerRegistry,
        analyzer: Arc<dyn Analyzer>,
    ) -> OfflineQueueBuilder {
        OfflineQueueBuilder {
            config,
            store,
            registry,
            analyzer,
            runner: None,
            clock: Arc::new(SystemClock),
            initial_status: NetworkStatus::Online,
        }
    }

    /// Recover state left by a previous run and start the trigger loop
    pub async fn init(&self) -> Result<RecoveryReport, QueueError> {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
            match *lifecycle {
                Lifecycle::Created => *lifecycle = Lifecycle::Running,
                Lifecycle::Running => return Err(QueueError::invalid_state("queue already initialized")),
                Lifecycle::Stopped => return Err(QueueError::invalid_state("queue has been shut down")),
            }
        }

        let report = match self.recover().await {
            Ok(report) => report,
            Err(e) => {
                *self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()) = Lifecycle::Created;
                return Err(e);
            }
        };

        let trigger_rx = self
            .trigger_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| QueueError::invalid_state("trigger channel already consumed"))?;

        self.core
            .manager
            .retry_scheduler()
            .connect(self.trigger_tx.clone());
        let target: Arc<dyn DrainTarget> = Arc::clone(&self.core) as Arc<dyn DrainTarget>;
        self.scheduler.start(target, trigger_rx, self.network.watch());

        if self.network.is_online() {
            self.core.processor.promote_queued();
        }

        tracing::info!(
            "[SyncQueue] Initialized (sequence {}, {} operations and {} jobs recovered)",
            report.last_sequence,
            report.operations_reset,
            report.jobs_reset
        );
        Ok(report)
    }

    async fn recover(&self) -> Result<RecoveryReport, QueueError> {
        let last_sequence = self.core.manager.seed_sequence().await?;
        let operations_reset = self.core.manager.recover_interrupted().await?;
        let jobs_reset = self.core.processor.recover_interrupted().await?;
        let handoffs_resumed = self.core.processor.resume_handoffs().await?;
        Ok(RecoveryReport {
            last_sequence,
            operations_reset,
            jobs_reset,
            handoffs_resumed,
        })
    }

    /// Stop background work and release the worker
    ///
    /// Waits for the drain and analysis jobs already running. Safe to call
    /// more than once.
    pub async fn shutdown(&self) {
        {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
            if *lifecycle == Lifecycle::Stopped {
                return;
            }
            *lifecycle = Lifecycle::Stopped;
        }

        self.scheduler.stop().await;
        self.core.manager.retry_scheduler().cancel_all();
        self.core.processor.wait_idle().await;
        self.core.processor.runner().shutdown().await;
        self.events.clear();
        tracing::info!("[SyncQueue] Shut down");
    }

    pub fn is_running(&self) -> bool {
        *self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()) == Lifecycle::Running
    }

    /// Connectivity report from the platform
    ///
    /// Going online promotes queued analysis jobs and drains the sync queue.
    pub fn set_online(&self, online: bool) {
        self.network.set_online(online);
    }

    pub fn is_online(&self) -> bool {
        self.network.is_online()
    }

    /// The application came to the foreground
    pub fn on_foreground(&self) {
        if self.trigger_tx.send(DrainTrigger::Foreground).is_err() {
            tracing::debug!("[SyncQueue] Trigger loop not running; foreground ignored");
        }
    }

    /// Drain now and report the outcome
    pub async fn force_sync(&self) -> Result<DrainOutcome, QueueError> {
        tracing::info!("[SyncQueue] Forced sync requested");
        self.core.manager.drain().await
    }

    pub async fn queue_operation(&self, spec: OperationSpec) -> Result<Uuid, QueueError> {
        self.core.manager.queue_operation(spec).await
    }

    pub async fn queue_analysis(&self, spec: AnalysisJobSpec) -> Result<Uuid, QueueError> {
        self.core.processor.queue_analysis(spec).await
    }

    pub async fn get_queue_status(&self) -> Result<QueueStatus, QueueError> {
        Ok(QueueStatus {
            analyses: self.core.processor.job_counts().await?,
            sync_operations: self.core.manager.operation_counts().await?,
        })
    }

    /// Remove completed and failed records from both namespaces
    pub async fn clear_completed_operations(&self) -> Result<ClearedRecords, QueueError> {
        Ok(ClearedRecords {
            operations: self.core.manager.clear_terminal().await?,
            jobs: self.core.processor.clear_terminal().await?,
        })
    }

    /// Run the completed-operation retention sweep now
    pub async fn cleanup_expired(&self) -> Result<usize, QueueError> {
        self.core.manager.cleanup_expired().await
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn manager(&self) -> &Arc<SyncQueueManager> {
        &self.core.manager
    }

    pub fn processor(&self) -> &Arc<AnalysisJobProcessor> {
        &self.core.processor
    }

    pub fn metrics(&self) -> DrainMetrics {
        self.core.manager.metrics()
    }
}
