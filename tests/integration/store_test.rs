//! Recovery from a SQLite store left behind by a previous run

use pretty_assertions::assert_eq;
use std::sync::Arc;

use syncq::client::local_db::{DurableStore, Namespace, Records, SqliteStore};
use syncq::shared::{AnalysisJob, JobStatus, SyncOperation, SyncOperationStatus};

use crate::common::*;

async fn open(dir: &tempfile::TempDir) -> Arc<dyn DurableStore> {
    Arc::new(
        SqliteStore::open(dir.path().join("queue.db"))
            .await
            .expect("sqlite store opens"),
    )
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let ids = {
        let fx = queue_fixture_on(open(&dir).await, false, ScriptedHandler::succeeding());
        fx.queue.init().await.unwrap();
        let a = fx.queue.queue_operation(preference("a")).await.unwrap();
        let b = fx.queue.queue_operation(notification("b")).await.unwrap();
        fx.queue.shutdown().await;
        vec![a, b]
    };

    let fx = queue_fixture_on(open(&dir).await, true, ScriptedHandler::succeeding());
    let report = fx.queue.init().await.unwrap();
    assert_eq!(report.last_sequence, 2);

    fx.queue.force_sync().await.unwrap();
    assert_eq!(fx.handler.call_ids(), ids);
    fx.queue.shutdown().await;
}

#[tokio::test]
async fn test_interrupted_records_are_recovered() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;
    let now = chrono::Utc::now();

    // Simulate a crash mid-drain and mid-analysis
    let operations: Records<SyncOperation> = Records::new(Arc::clone(&store), Namespace::Operations);
    let mut stranded = SyncOperation::from_spec(&preference("a"), now, 7);
    stranded.status = SyncOperationStatus::Syncing;
    operations.put(&stranded.id, &stranded).await.unwrap();

    let jobs: Records<AnalysisJob> = Records::new(Arc::clone(&store), Namespace::Jobs);
    let mut processing = AnalysisJob::from_spec(text_job("ana", "a.txt", "abc"), now);
    processing.status = JobStatus::Processing;
    processing.progress = 25;
    jobs.put(&processing.id, &processing).await.unwrap();

    let mut finished = AnalysisJob::from_spec(text_job("ana", "b.txt", "xyz"), now);
    finished.status = JobStatus::Completed;
    finished.progress = 100;
    finished.result = Some(serde_json::json!({"file_name": "b.txt"}));
    jobs.put(&finished.id, &finished).await.unwrap();
    drop((operations, jobs, store));

    let fx = queue_fixture_on(open(&dir).await, false, ScriptedHandler::succeeding());
    let report = fx.queue.init().await.unwrap();
    assert_eq!(report.last_sequence, 7);
    assert_eq!(report.operations_reset, 1);
    assert_eq!(report.jobs_reset, 1);
    assert_eq!(report.handoffs_resumed, 1);

    assert_op_status!(fx.queue.manager(), stranded.id, SyncOperationStatus::Pending);

    let job = fx.queue.processor().get_job(&processing.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.progress, 0);

    let job = fx.queue.processor().get_job(&finished.id).await.unwrap().unwrap();
    let handoff = job.sync_operation_id.expect("handoff resumed");
    let op = fx.queue.manager().operations().get(&handoff).await.unwrap().unwrap();
    assert_eq!(op.sequence, 8);

    fx.queue.shutdown().await;
}

#[tokio::test]
async fn test_namespaces_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir).await;

    store.set(Namespace::Operations, "shared-key", "1").await.unwrap();
    store.set(Namespace::Jobs, "shared-key", "2").await.unwrap();
    assert!(store.remove(Namespace::Operations, "shared-key").await.unwrap());

    assert_eq!(store.get(Namespace::Operations, "shared-key").await.unwrap(), None);
    assert_eq!(
        store.get(Namespace::Jobs, "shared-key").await.unwrap().as_deref(),
        Some("2")
    );
    assert_eq!(store.keys(Namespace::Jobs).await.unwrap(), vec!["shared-key".to_string()]);
}
