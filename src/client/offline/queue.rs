//! # Operation Queue
//!
//! Durable view of the sync operations namespace. Everything here is a thin
//! query or bulk update over [`Records<SyncOperation>`]; the state machine
//! lives in the manager and the retry scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::client::local_db::{DurableStore, Namespace, Records, Result};
use crate::shared::operation::{SyncOperation, SyncOperationStatus};

/// Durable sync operation records
#[derive(Debug, Clone)]
pub struct OperationQueue {
    records: Records<SyncOperation>,
}

/// Operation counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationCounts {
    pub pending: usize,
    pub syncing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl OperationCounts {
    pub fn total(&self) -> usize {
        self.pending + self.syncing + self.completed + self.failed
    }
}

impl OperationQueue {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            records: Records::new(store, Namespace::Operations),
        }
    }

    pub async fn get(&self, id: &Uuid) -> Result<Option<SyncOperation>> {
        self.records.get(id).await
    }

    /// Insert or replace an operation
    pub async fn save(&self, operation: &SyncOperation) -> Result<()> {
        self.records.put(&operation.id, operation).await
    }

    pub async fn remove(&self, id: &Uuid) -> Result<bool> {
        self.records.remove(id).await
    }

    pub async fn all(&self) -> Result<Vec<SyncOperation>> {
        self.records.all().await
    }

    /// Pending operations outside their backoff window, in dispatch order
    pub async fn ready(&self, now: DateTime<Utc>) -> Result<Vec<SyncOperation>> {
        let mut ready: Vec<_> = self
            .all()
            .await?
            .into_iter()
            .filter(|op| op.is_ready(now))
            .collect();
        ready.sort_by(|a, b| a.dispatch_order(b));
        Ok(ready)
    }

    pub async fn by_status(&self, status: SyncOperationStatus) -> Result<Vec<SyncOperation>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|op| op.status == status)
            .collect())
    }

    pub async fn get_stats(&self) -> Result<OperationCounts> {
        let mut counts = OperationCounts::default();
        for op in self.all().await? {
            match op.status {
                SyncOperationStatus::Pending => counts.pending += 1,
                SyncOperationStatus::Syncing => counts.syncing += 1,
                SyncOperationStatus::Completed => counts.completed += 1,
                SyncOperationStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    /// Highest sequence number on record
    pub async fn max_sequence(&self) -> Result<u64> {
        Ok(self.all().await?.iter().map(|op| op.sequence).max().unwrap_or(0))
    }

    /// Remove completed operations older than `retention`
    pub async fn sweep_completed(&self, retention: Duration, now: DateTime<Utc>) -> Result<usize> {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(retention).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut removed = 0;
        for op in self.by_status(SyncOperationStatus::Completed).await? {
            let finished = op.completed_at.unwrap_or(op.timestamp);
            if finished <= cutoff && self.remove(&op.id).await? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!("[SyncQueue] Swept {} completed operations", removed);
        }
        Ok(removed)
    }

    /// Remove every completed or failed operation
    pub async fn clear_terminal(&self) -> Result<usize> {
        let mut removed = 0;
        for op in self.all().await? {
            if op.status.is_terminal() && self.remove(&op.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Return operations stranded in `syncing` by a crash to `pending`
    pub async fn reset_interrupted(&self) -> Result<usize> {
        let mut reset = 0;
        for mut op in self.by_status(SyncOperationStatus::Syncing).await? {
            op.status = SyncOperationStatus::Pending;
            self.save(&op).await?;
            reset += 1;
        }
        if reset > 0 {
            tracing::warn!("[SyncQueue] Reset {} interrupted operations to pending", reset);
        }
        Ok(reset)
    }
}
