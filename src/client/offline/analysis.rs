//! # Analysis Job Processor
//!
//! Runs CPU-heavy analysis jobs locally and hands finished results to the
//! sync queue.
//!
//! ```text
//! queued ──▶ processing ──▶ completed ──▶ SyncOperation{analysis, create}
//!                      └──▶ failed
//! ```
//!
//! Jobs enqueued while online start right away on a tracked background task;
//! jobs enqueued offline wait for [`AnalysisJobProcessor::process_queued_jobs`].
//! Failed jobs are not retried automatically.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::client::local_db::{DurableStore, Namespace, Records};
use crate::client::offline::manager::SyncQueueManager;
use crate::client::offline::runner::JobRunner;
use crate::client::sync::event_bus::EventBus;
use crate::client::sync::network_monitor::NetworkMonitor;
use crate::shared::clock::SharedClock;
use crate::shared::error::QueueError;
use crate::shared::event::QueueEvent;
use crate::shared::job::{AnalysisJob, AnalysisJobSpec, JobStatus};
use crate::shared::operation::{AnalysisSync, OperationSpec, Priority, SyncPayload};

/// Job counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Drops a job id from the active set when processing ends
struct ActiveJob<'a> {
    active: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl<'a> ActiveJob<'a> {
    fn claim(active: &'a Mutex<HashSet<Uuid>>, id: Uuid) -> Option<Self> {
        let inserted = active.lock().unwrap_or_else(|e| e.into_inner()).insert(id);
        inserted.then_some(Self { active, id })
    }
}

impl Drop for ActiveJob<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

/// Local analysis job processor
#[derive(Debug)]
pub struct AnalysisJobProcessor {
    jobs: Records<AnalysisJob>,
    runner: Arc<dyn JobRunner>,
    manager: Arc<SyncQueueManager>,
    events: Arc<EventBus>,
    network: Arc<NetworkMonitor>,
    clock: SharedClock,
    active: Mutex<HashSet<Uuid>>,
    tasks: Mutex<JoinSet<()>>,
}

impl AnalysisJobProcessor {
    pub fn new(
        store: Arc<dyn DurableStore>,
        runner: Arc<dyn JobRunner>,
        manager: Arc<SyncQueueManager>,
        events: Arc<EventBus>,
        network: Arc<NetworkMonitor>,
        clock: SharedClock,
    ) -> Self {
        Self {
            jobs: Records::new(store, Namespace::Jobs),
            runner,
            manager,
            events,
            network,
            clock,
            active: Mutex::new(HashSet::new()),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn runner(&self) -> &Arc<dyn JobRunner> {
        &self.runner
    }

    pub async fn get_job(&self, id: &Uuid) -> Result<Option<AnalysisJob>, QueueError> {
        Ok(self.jobs.get(id).await?)
    }

    /// Persist a queued job; start it immediately when online
    pub async fn queue_analysis(self: &Arc<Self>, spec: AnalysisJobSpec) -> Result<Uuid, QueueError> {
        let job = AnalysisJob::from_spec(spec, self.clock.now());
        let id = job.id;
        self.jobs.put(&id, &job).await?;

        tracing::info!(
            "[Analysis] Queued job {} for {} ({} bytes)",
            id,
            job.file.file_name,
            job.file.file_size
        );
        self.events.emit(QueueEvent::AnalysisQueued(job));

        if self.network.is_online() {
            self.spawn_job(id);
        }
        Ok(id)
    }

    fn spawn_job(self: &Arc<Self>, id: Uuid) {
        let this = Arc::clone(self);
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.spawn(async move {
            if let Err(e) = this.process_job(id).await {
                tracing::error!("[Analysis] Job {} could not be processed: {}", id, e);
            }
        });
    }

    /// Start every queued job on a tracked background task
    pub fn promote_queued(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.spawn(async move {
            if let Err(e) = this.process_queued_jobs().await {
                tracing::error!("[Analysis] Failed to promote queued jobs: {}", e);
            }
        });
    }

    /// Process queued jobs, high priority first then oldest first
    ///
    /// Returns the number of jobs picked up. Does nothing while offline.
    pub async fn process_queued_jobs(&self) -> Result<usize, QueueError> {
        if !self.network.is_online() {
            return Ok(0);
        }

        let mut queued: Vec<AnalysisJob> = self
            .jobs
            .all()
            .await?
            .into_iter()
            .filter(|job| job.status == JobStatus::Queued)
            .collect();
        queued.sort_by_key(|job| (Reverse(job.options.priority), job.timestamp));

        let count = queued.len();
        if count > 0 {
            tracing::info!("[Analysis] Processing {} queued jobs", count);
        }
        for job in queued {
            if let Err(e) = self.process_job(job.id).await {
                tracing::error!("[Analysis] Job {} could not be processed: {}", job.id, e);
            }
        }
        Ok(count)
    }

    /// Run one queued job to a terminal state
    ///
    /// A job that is not `queued`, or is already being processed, is left
    /// untouched.
    pub async fn process_job(&self, id: Uuid) -> Result<(), QueueError> {
        let Some(_active) = ActiveJob::claim(&self.active, id) else {
            tracing::debug!("[Analysis] Job {} already being processed", id);
            return Ok(());
        };

        let mut job = self
            .jobs
            .get(&id)
            .await?
            .ok_or_else(|| QueueError::not_found("analysis job", id))?;
        if job.status != JobStatus::Queued {
            tracing::debug!("[Analysis] Job {} is {:?}, skipping", id, job.status);
            return Ok(());
        }

        job.status = JobStatus::Processing;
        job.started_at = Some(self.clock.now());
        job.progress = 0;
        self.jobs.put(&id, &job).await?;
        tracing::info!("[Analysis] Job {} started on {} runner", id, self.runner.name());
        self.events.emit(QueueEvent::AnalysisStarted(job.clone()));

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let run = self.runner.run(job.request(), progress_tx);
        tokio::pin!(run);

        let outcome = loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                Some(progress) = progress_rx.recv() => self.record_progress(&mut job, progress).await,
            }
        };
        while let Ok(progress) = progress_rx.try_recv() {
            self.record_progress(&mut job, progress).await;
        }

        job.completed_at = Some(self.clock.now());
        match outcome {
            Ok(result) => {
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.result = Some(result);
                job.error = None;
                self.jobs.put(&id, &job).await?;
                tracing::info!("[Analysis] Job {} completed", id);
                self.events.emit(QueueEvent::AnalysisCompleted(job.clone()));
                self.hand_off(&mut job).await?;
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.error = Some(e.to_string());
                self.jobs.put(&id, &job).await?;
                tracing::error!("[Analysis] Job {} failed: {}", id, e);
                self.events.emit(QueueEvent::AnalysisFailed(job));
            }
        }
        Ok(())
    }

    async fn record_progress(&self, job: &mut AnalysisJob, progress: u8) {
        let progress = progress.min(100);
        if progress <= job.progress {
            return;
        }
        job.progress = progress;
        if let Err(e) = self.jobs.put(&job.id, job).await {
            tracing::warn!("[Analysis] Failed to persist progress of {}: {}", job.id, e);
        }
        self.events.emit(QueueEvent::AnalysisProgress {
            job_id: job.id,
            progress,
        });
    }

    /// Queue the sync operation carrying a completed job's result
    ///
    /// `sync_operation_id` records the handoff so it happens once per job.
    async fn hand_off(&self, job: &mut AnalysisJob) -> Result<(), QueueError> {
        if job.status != JobStatus::Completed || job.sync_operation_id.is_some() {
            return Ok(());
        }

        let payload = SyncPayload::Analysis(AnalysisSync {
            job_id: job.id,
            user_id: job.user_id.clone(),
            result: job.result.clone().unwrap_or(serde_json::Value::Null),
        });
        let spec = OperationSpec::create(payload)
            .priority(Priority::Medium)
            .for_user(job.user_id.clone());

        let operation_id = self.manager.queue_operation(spec).await?;
        job.sync_operation_id = Some(operation_id);
        self.jobs.put(&job.id, job).await?;
        tracing::debug!("[Analysis] Job {} handed off as operation {}", job.id, operation_id);
        Ok(())
    }

    /// Finish handoffs interrupted between completion and enqueue
    pub async fn resume_handoffs(&self) -> Result<usize, QueueError> {
        let mut resumed = 0;
        for mut job in self.jobs.all().await? {
            if job.status == JobStatus::Completed && job.sync_operation_id.is_none() {
                self.hand_off(&mut job).await?;
                resumed += 1;
            }
        }
        Ok(resumed)
    }

    /// Return jobs stranded in `processing` by a crash to `queued`
    pub async fn recover_interrupted(&self) -> Result<usize, QueueError> {
        let mut reset = 0;
        for mut job in self.jobs.all().await? {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Queued;
                job.progress = 0;
                job.started_at = None;
                self.jobs.put(&job.id, &job).await?;
                reset += 1;
            }
        }
        if reset > 0 {
            tracing::warn!("[Analysis] Reset {} interrupted jobs to queued", reset);
        }
        Ok(reset)
    }

    pub async fn job_counts(&self) -> Result<JobCounts, QueueError> {
        let mut counts = JobCounts::default();
        for job in self.jobs.all().await? {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    /// Remove failed jobs and completed jobs whose result was handed off
    pub async fn clear_terminal(&self) -> Result<usize, QueueError> {
        let mut removed = 0;
        for job in self.jobs.all().await? {
            let finished = match job.status {
                JobStatus::Failed => true,
                JobStatus::Completed => job.sync_operation_id.is_some(),
                _ => false,
            };
            if finished && self.jobs.remove(&job.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Wait for every tracked background task to finish
    pub async fn wait_idle(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
            if tasks.is_empty() {
                return;
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    tracing::error!("[Analysis] Background task ended abnormally: {}", e);
                }
            }
        }
    }
}
