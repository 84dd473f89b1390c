//! Analysis Job Types
//!
//! An [`AnalysisJob`] is a durable unit of local computation. The processor
//! owns it while it is `processing`; afterwards the record stays in the jobs
//! namespace as history and its result moves to the sync queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::shared::operation::Priority;

/// Analysis job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Where the raw input lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FileSource {
    /// Bytes captured at enqueue time
    Inline(Vec<u8>),
    /// Handle to a file on local disk
    Path(PathBuf),
}

/// Input file reference plus its metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFile {
    pub file_name: String,
    pub file_type: String,
    pub file_size: u64,
    pub source: FileSource,
}

impl JobFile {
    /// In-memory file; size is taken from the bytes
    pub fn inline(file_name: impl Into<String>, file_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            file_type: file_type.into(),
            file_size: bytes.len() as u64,
            source: FileSource::Inline(bytes),
        }
    }

    /// File on disk, referenced by path
    pub fn path(
        file_name: impl Into<String>,
        file_type: impl Into<String>,
        file_size: u64,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_type: file_type.into(),
            file_size,
            source: FileSource::Path(path.into()),
        }
    }
}

/// Analysis options chosen by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    pub analysis_type: String,
    pub deep_scan: bool,
    pub priority: Priority,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            analysis_type: "standard".to_string(),
            deep_scan: false,
            priority: Priority::Medium,
        }
    }
}

/// Caller-supplied description of a job to enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisJobSpec {
    pub user_id: String,
    pub file: JobFile,
    pub options: AnalysisOptions,
}

impl AnalysisJobSpec {
    pub fn new(user_id: impl Into<String>, file: JobFile) -> Self {
        Self {
            user_id: user_id.into(),
            file,
            options: AnalysisOptions::default(),
        }
    }

    pub fn options(mut self, options: AnalysisOptions) -> Self {
        self.options = options;
        self
    }
}

/// Durable analysis job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub file: JobFile,
    pub options: AnalysisOptions,
    pub status: JobStatus,
    /// 0..=100
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Sync operation that carries the result to the server
    #[serde(default)]
    pub sync_operation_id: Option<Uuid>,
}

impl AnalysisJob {
    /// Build a fresh queued job
    pub fn from_spec(spec: AnalysisJobSpec, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: now,
            user_id: spec.user_id,
            file: spec.file,
            options: spec.options,
            status: JobStatus::Queued,
            progress: 0,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            sync_operation_id: None,
        }
    }

    /// Message handed to a job runner
    pub fn request(&self) -> AnalysisRequest {
        AnalysisRequest {
            job_id: self.id,
            user_id: self.user_id.clone(),
            file: self.file.clone(),
            options: self.options.clone(),
        }
    }
}

/// Runner input: everything the analyzer may look at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub job_id: Uuid,
    pub user_id: String,
    pub file: JobFile,
    pub options: AnalysisOptions,
}
