//! Analysis job completion and result handoff

use pretty_assertions::assert_eq;

use syncq::shared::{
    AnalysisJobSpec, EventKind, JobFile, JobStatus, OperationKind, OperationVerb, Priority,
    SyncOperationStatus, SyncPayload,
};

use crate::common::*;

#[tokio::test]
async fn test_completed_job_queues_one_analysis_operation() {
    let fx = queue_fixture(true, ScriptedHandler::succeeding());
    let job_id = fx
        .queue
        .queue_analysis(text_job("ana", "notes.txt", "one\ntwo\n"))
        .await
        .unwrap();
    fx.queue.processor().wait_idle().await;

    let job = fx.queue.processor().get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    let result = job.result.clone().unwrap();
    assert_eq!(result["file_name"], "notes.txt");
    assert_eq!(result["actual_size"], 8);

    let ops = fx.queue.manager().operations().all().await.unwrap();
    assert_eq!(ops.len(), 1);
    let op = &ops[0];
    assert_eq!(Some(op.id), job.sync_operation_id);
    assert_eq!(op.kind(), OperationKind::Analysis);
    assert_eq!(op.operation, OperationVerb::Create);
    assert_eq!(op.priority, Priority::Medium);
    assert_eq!(op.status, SyncOperationStatus::Pending);

    let SyncPayload::Analysis(data) = &op.payload else {
        panic!("unexpected payload {:?}", op.payload);
    };
    assert_eq!(data.job_id, job_id);
    assert_eq!(data.user_id, "ana");
    assert_eq!(data.result, result);
}

#[tokio::test]
async fn test_reprocessing_does_not_hand_off_twice() {
    let fx = queue_fixture(true, ScriptedHandler::succeeding());
    let job_id = fx
        .queue
        .queue_analysis(text_job("ana", "a.txt", "abc"))
        .await
        .unwrap();
    fx.queue.processor().wait_idle().await;

    fx.queue.processor().process_job(job_id).await.unwrap();
    assert_eq!(fx.queue.processor().resume_handoffs().await.unwrap(), 0);
    assert_eq!(fx.queue.manager().operations().all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_job_queues_nothing() {
    let fx = queue_fixture(true, ScriptedHandler::succeeding());
    let mut events = fx.queue.events().subscribe();
    let spec = AnalysisJobSpec::new(
        "ana",
        JobFile::path("gone.bin", "application/octet-stream", 10, "/nonexistent/syncq/gone.bin"),
    );
    let job_id = fx.queue.queue_analysis(spec).await.unwrap();
    fx.queue.processor().wait_idle().await;

    let job = fx.queue.processor().get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.is_some());
    assert!(job.sync_operation_id.is_none());
    assert!(fx.queue.manager().operations().all().await.unwrap().is_empty());

    let kinds: Vec<_> = drain_events(&mut events).iter().map(|e| e.kind()).collect();
    assert!(kinds.contains(&EventKind::AnalysisFailed));
    assert!(!kinds.contains(&EventKind::AnalysisCompleted));
}

#[tokio::test]
async fn test_offline_job_waits_for_connectivity() {
    let fx = queue_fixture(false, ScriptedHandler::succeeding());
    let job_id = fx
        .queue
        .queue_analysis(text_job("ana", "a.txt", "abc"))
        .await
        .unwrap();
    fx.queue.processor().wait_idle().await;

    let job = fx.queue.processor().get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(fx.queue.processor().process_queued_jobs().await.unwrap(), 0);

    fx.queue.set_online(true);
    assert_eq!(fx.queue.processor().process_queued_jobs().await.unwrap(), 1);
    let job = fx.queue.processor().get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_progress_events_are_monotonic() {
    let fx = queue_fixture(true, ScriptedHandler::succeeding());
    let mut events = fx.queue.events().subscribe();
    fx.queue
        .queue_analysis(text_job("ana", "a.txt", "abc"))
        .await
        .unwrap();
    fx.queue.processor().wait_idle().await;

    let progress: Vec<u8> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            syncq::shared::QueueEvent::AnalysisProgress { progress, .. } => Some(progress),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert!(progress.iter().all(|p| *p <= 100));
}

#[tokio::test]
async fn test_handed_off_result_syncs() {
    let fx = queue_fixture(true, ScriptedHandler::succeeding());
    let job_id = fx
        .queue
        .queue_analysis(text_job("ana", "a.txt", "abc"))
        .await
        .unwrap();
    fx.queue.processor().wait_idle().await;
    fx.queue.force_sync().await.unwrap();

    let calls = fx.handler.calls();
    assert_eq!(calls.len(), 1);
    let SyncPayload::Analysis(data) = &calls[0].payload else {
        panic!("unexpected payload {:?}", calls[0].payload);
    };
    assert_eq!(data.job_id, job_id);

    let status = fx.queue.get_queue_status().await.unwrap();
    assert_eq!(status.analyses.completed, 1);
    assert_eq!(status.sync_operations.completed, 1);
}
