//! Queue Lifecycle Events
//!
//! Events published on the event bus as operations and jobs move through
//! their state machines. Every payload carries the affected record, or the
//! drain plan/report for the drain-level events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::shared::job::AnalysisJob;
use crate::shared::operation::SyncOperation;

/// Event name used for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SyncQueued,
    SyncStarted,
    SyncCompleted,
    SyncOperationCompleted,
    SyncOperationFailed,
    AnalysisQueued,
    AnalysisStarted,
    AnalysisProgress,
    AnalysisCompleted,
    AnalysisFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SyncQueued => "sync_queued",
            EventKind::SyncStarted => "sync_started",
            EventKind::SyncCompleted => "sync_completed",
            EventKind::SyncOperationCompleted => "sync_operation_completed",
            EventKind::SyncOperationFailed => "sync_operation_failed",
            EventKind::AnalysisQueued => "analysis_queued",
            EventKind::AnalysisStarted => "analysis_started",
            EventKind::AnalysisProgress => "analysis_progress",
            EventKind::AnalysisCompleted => "analysis_completed",
            EventKind::AnalysisFailed => "analysis_failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a drain is about to dispatch on its first pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainPlan {
    pub started_at: DateTime<Utc>,
    /// Ready operations loaded for this pass
    pub pending: usize,
    pub batches: usize,
}

/// Outcome counts of a finished drain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub dispatched: usize,
    pub completed: usize,
    /// Failed but re-armed for a later attempt
    pub retried: usize,
    /// Moved to `failed`
    pub failed: usize,
    pub batches: usize,
    /// Completed records removed by the retention sweep
    pub swept: usize,
    /// Outcomes the store refused; those operations were left `pending`
    #[serde(default)]
    pub persist_failures: usize,
}

/// Queue lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum QueueEvent {
    SyncQueued(SyncOperation),
    SyncStarted(DrainPlan),
    SyncCompleted(DrainReport),
    SyncOperationCompleted(SyncOperation),
    SyncOperationFailed(SyncOperation),
    AnalysisQueued(AnalysisJob),
    AnalysisStarted(AnalysisJob),
    AnalysisProgress { job_id: Uuid, progress: u8 },
    AnalysisCompleted(AnalysisJob),
    AnalysisFailed(AnalysisJob),
}

impl QueueEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            QueueEvent::SyncQueued(_) => EventKind::SyncQueued,
            QueueEvent::SyncStarted(_) => EventKind::SyncStarted,
            QueueEvent::SyncCompleted(_) => EventKind::SyncCompleted,
            QueueEvent::SyncOperationCompleted(_) => EventKind::SyncOperationCompleted,
            QueueEvent::SyncOperationFailed(_) => EventKind::SyncOperationFailed,
            QueueEvent::AnalysisQueued(_) => EventKind::AnalysisQueued,
            QueueEvent::AnalysisStarted(_) => EventKind::AnalysisStarted,
            QueueEvent::AnalysisProgress { .. } => EventKind::AnalysisProgress,
            QueueEvent::AnalysisCompleted(_) => EventKind::AnalysisCompleted,
            QueueEvent::AnalysisFailed(_) => EventKind::AnalysisFailed,
        }
    }

    /// Id of the affected operation or job, when there is one
    pub fn record_id(&self) -> Option<Uuid> {
        match self {
            QueueEvent::SyncQueued(op)
            | QueueEvent::SyncOperationCompleted(op)
            | QueueEvent::SyncOperationFailed(op) => Some(op.id),
            QueueEvent::AnalysisQueued(job)
            | QueueEvent::AnalysisStarted(job)
            | QueueEvent::AnalysisCompleted(job)
            | QueueEvent::AnalysisFailed(job) => Some(job.id),
            QueueEvent::AnalysisProgress { job_id, .. } => Some(*job_id),
            QueueEvent::SyncStarted(_) | QueueEvent::SyncCompleted(_) => None,
        }
    }
}
