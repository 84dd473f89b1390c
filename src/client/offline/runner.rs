//! # Analysis Runners
//!
//! The analysis algorithm itself is opaque: anything implementing
//! [`Analyzer`] turns an [`AnalysisRequest`] into a JSON result, reporting
//! progress as it goes. A [`JobRunner`] decides *where* that work happens:
//!
//! - [`InProcessRunner`] calls the analyzer on tokio's blocking pool.
//! - [`WorkerRunner`] owns a dedicated OS thread and talks to it only through
//!   channels: a request message in, progress messages and one reply out.
//!
//! [`select_runner`] prefers the worker and falls back to in-process when the
//! thread cannot be started. Both runners produce the same results and the
//! same progress sequence for the same analyzer.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::shared::job::{AnalysisRequest, FileSource};

const WORKER_THREAD_NAME: &str = "syncq-analysis";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("cannot read input {path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("analysis failed: {0}")]
    Failed(String),

    #[error("analysis worker unavailable: {0}")]
    WorkerUnavailable(String),
}

/// The analysis algorithm
///
/// Called from a blocking context; implementations may do heavy CPU work.
/// `progress` takes values in `0..=100`.
pub trait Analyzer: Send + Sync + Debug {
    fn analyze(
        &self,
        request: &AnalysisRequest,
        progress: &mut dyn FnMut(u8),
    ) -> Result<Value, AnalysisError>;
}

/// Default analyzer: file metadata plus a BLAKE3 content digest
#[derive(Debug, Default, Clone, Copy)]
pub struct FileMetadataAnalyzer;

impl FileMetadataAnalyzer {
    fn load(source: &FileSource) -> Result<std::borrow::Cow<'_, [u8]>, AnalysisError> {
        match source {
            FileSource::Inline(bytes) => Ok(std::borrow::Cow::Borrowed(bytes)),
            FileSource::Path(path) => std::fs::read(path)
                .map(std::borrow::Cow::Owned)
                .map_err(|source| AnalysisError::Input {
                    path: path.clone(),
                    source,
                }),
        }
    }
}

impl Analyzer for FileMetadataAnalyzer {
    fn analyze(
        &self,
        request: &AnalysisRequest,
        progress: &mut dyn FnMut(u8),
    ) -> Result<Value, AnalysisError> {
        let bytes = Self::load(&request.file.source)?;
        progress(25);

        let digest = blake3::hash(&bytes);
        progress(75);

        let mut result = json!({
            "file_name": request.file.file_name,
            "file_type": request.file.file_type,
            "declared_size": request.file.file_size,
            "actual_size": bytes.len(),
            "digest": digest.to_hex().to_string(),
            "analysis_type": request.options.analysis_type,
        });

        if request.options.deep_scan {
            let text = std::str::from_utf8(&bytes).ok();
            result["deep_scan"] = json!({
                "is_utf8": text.is_some(),
                "line_count": text.map(|t| t.lines().count()),
                "zero_bytes": bytes.iter().filter(|b| **b == 0).count(),
            });
        }

        Ok(result)
    }
}

/// Execution strategy for analysis jobs
#[async_trait]
pub trait JobRunner: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Run one request to completion, forwarding progress on `progress`
    async fn run(
        &self,
        request: AnalysisRequest,
        progress: mpsc::UnboundedSender<u8>,
    ) -> Result<Value, AnalysisError>;

    /// Release resources held by the runner
    async fn shutdown(&self) {}
}

fn analyze_guarded(
    analyzer: &dyn Analyzer,
    request: &AnalysisRequest,
    progress: &mpsc::UnboundedSender<u8>,
) -> Result<Value, AnalysisError> {
    let mut report = |value: u8| {
        // Receiver gone means nobody is watching; keep going
        let _ = progress.send(value.min(100));
    };
    catch_unwind(AssertUnwindSafe(|| analyzer.analyze(request, &mut report)))
        .unwrap_or_else(|_| Err(AnalysisError::Failed("analyzer panicked".to_string())))
}

/// Runs the analyzer on tokio's blocking pool
#[derive(Debug, Clone)]
pub struct InProcessRunner {
    analyzer: Arc<dyn Analyzer>,
}

impl InProcessRunner {
    pub fn new(analyzer: Arc<dyn Analyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl JobRunner for InProcessRunner {
    fn name(&self) -> &'static str {
        "in-process"
    }

    async fn run(
        &self,
        request: AnalysisRequest,
        progress: mpsc::UnboundedSender<u8>,
    ) -> Result<Value, AnalysisError> {
        let analyzer = Arc::clone(&self.analyzer);
        tokio::task::spawn_blocking(move || analyze_guarded(analyzer.as_ref(), &request, &progress))
            .await
            .map_err(|e| AnalysisError::Failed(format!("analysis task aborted: {}", e)))?
    }
}

struct WorkerRequest {
    request: AnalysisRequest,
    progress: mpsc::UnboundedSender<u8>,
    reply: oneshot::Sender<Result<Value, AnalysisError>>,
}

/// Runs the analyzer on a dedicated OS thread
#[derive(Debug)]
pub struct WorkerRunner {
    requests: Mutex<Option<mpsc::UnboundedSender<WorkerRequest>>>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl WorkerRunner {
    /// Start the worker thread
    pub fn spawn(analyzer: Arc<dyn Analyzer>) -> std::io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerRequest>();

        let thread = std::thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || {
                tracing::debug!("[Analysis] Worker thread started");
                while let Some(message) = rx.blocking_recv() {
                    let result = analyze_guarded(analyzer.as_ref(), &message.request, &message.progress);
                    if message.reply.send(result).is_err() {
                        tracing::warn!(
                            "[Analysis] Result for job {} dropped; caller went away",
                            message.request.job_id
                        );
                    }
                }
                tracing::debug!("[Analysis] Worker thread stopped");
            })?;

        Ok(Self {
            requests: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(thread)),
        })
    }
}

#[async_trait]
impl JobRunner for WorkerRunner {
    fn name(&self) -> &'static str {
        "worker"
    }

    async fn run(
        &self,
        request: AnalysisRequest,
        progress: mpsc::UnboundedSender<u8>,
    ) -> Result<Value, AnalysisError> {
        let sender = self
            .requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| AnalysisError::WorkerUnavailable("worker stopped".to_string()))?;

        let (reply, response) = oneshot::channel();
        sender
            .send(WorkerRequest {
                request,
                progress,
                reply,
            })
            .map_err(|_| AnalysisError::WorkerUnavailable("worker thread exited".to_string()))?;

        response
            .await
            .map_err(|_| AnalysisError::WorkerUnavailable("worker dropped the request".to_string()))?
    }

    async fn shutdown(&self) {
        // Closing the channel ends the worker loop after the current job
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).take();
        let thread = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(thread) = thread {
            match tokio::task::spawn_blocking(move || thread.join()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => tracing::error!("[Analysis] Worker thread panicked"),
                Err(e) => tracing::error!("[Analysis] Failed to join worker thread: {}", e),
            }
        }
    }
}

/// Pick the runner for this platform
pub fn select_runner(analyzer: Arc<dyn Analyzer>, prefer_worker: bool) -> Arc<dyn JobRunner> {
    if prefer_worker {
        match WorkerRunner::spawn(Arc::clone(&analyzer)) {
            Ok(worker) => {
                tracing::info!("[Analysis] Using background worker thread");
                return Arc::new(worker);
            }
            Err(e) => {
                tracing::warn!("[Analysis] Worker unavailable, running in-process: {}", e);
            }
        }
    }
    Arc::new(InProcessRunner::new(analyzer))
}
