//! Event delivery during drains and analysis

use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use syncq::client::offline::HandlerError;
use syncq::client::sync::EventHandlerError;
use syncq::shared::{EventKind, QueueEvent, SyncOperationStatus};

use crate::common::*;

#[tokio::test]
async fn test_drain_event_sequence() {
    let fx = manager_fixture(
        test_config().max_retries(1).build().unwrap(),
        ScriptedHandler::scripted(vec![Err(HandlerError::transient("down"))]),
    );
    let failing = fx.manager.queue_operation(preference("a")).await.unwrap();
    let succeeding = fx.manager.queue_operation(preference("b")).await.unwrap();

    let mut events = fx.events.subscribe();
    fx.manager.drain().await.unwrap();

    let events = drain_events(&mut events);
    let kinds: Vec<_> = events.iter().map(QueueEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::SyncStarted,
            EventKind::SyncOperationFailed,
            EventKind::SyncOperationCompleted,
            EventKind::SyncCompleted,
        ]
    );
    assert_eq!(events[1].record_id(), Some(failing));
    assert_eq!(events[2].record_id(), Some(succeeding));

    let QueueEvent::SyncStarted(plan) = &events[0] else {
        panic!("expected drain plan, got {:?}", events[0]);
    };
    assert_eq!(plan.pending, 2);
    assert_eq!(plan.batches, 1);

    let QueueEvent::SyncCompleted(report) = &events[3] else {
        panic!("expected drain report, got {:?}", events[3]);
    };
    assert_eq!((report.completed, report.failed), (1, 1));
}

#[tokio::test]
async fn test_panicking_subscriber_does_not_break_drain() {
    let fx = manager_fixture(test_config().build().unwrap(), ScriptedHandler::succeeding());
    let seen = Arc::new(AtomicUsize::new(0));

    fx.events.on(EventKind::SyncOperationCompleted, |_| panic!("subscriber bug"));
    fx.events.on(EventKind::SyncOperationCompleted, |_| {
        Err(EventHandlerError::new("refused"))
    });
    let counter = Arc::clone(&seen);
    fx.events.on(EventKind::SyncOperationCompleted, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let a = fx.manager.queue_operation(preference("a")).await.unwrap();
    let b = fx.manager.queue_operation(preference("b")).await.unwrap();
    let outcome = fx.manager.drain().await.unwrap();

    assert_eq!(outcome.report().unwrap().completed, 2);
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_op_status!(fx.manager, a, SyncOperationStatus::Completed);
    assert_op_status!(fx.manager, b, SyncOperationStatus::Completed);
}

#[tokio::test]
async fn test_callbacks_see_queued_operations() {
    let fx = manager_fixture(test_config().build().unwrap(), ScriptedHandler::succeeding());
    let queued = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&queued);
    let subscription = fx.events.on(EventKind::SyncQueued, move |event| {
        if let QueueEvent::SyncQueued(op) = event {
            sink.lock().unwrap().push((op.id, op.status));
        }
        Ok(())
    });

    let id = fx.manager.queue_operation(preference("a")).await.unwrap();
    assert_eq!(*queued.lock().unwrap(), vec![(id, SyncOperationStatus::Pending)]);

    assert!(fx.events.off(EventKind::SyncQueued, subscription));
    fx.manager.queue_operation(preference("b")).await.unwrap();
    assert_eq!(queued.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_analysis_event_sequence() {
    let fx = queue_fixture(true, ScriptedHandler::succeeding());
    let mut events = fx.queue.events().subscribe();

    let job_id = fx
        .queue
        .queue_analysis(text_job("ana", "a.txt", "hello"))
        .await
        .unwrap();
    fx.queue.processor().wait_idle().await;

    let events = drain_events(&mut events);
    let job_kinds: Vec<_> = events
        .iter()
        .filter(|e| e.record_id() == Some(job_id))
        .map(QueueEvent::kind)
        .filter(|k| *k != EventKind::AnalysisProgress)
        .collect();
    assert_eq!(
        job_kinds,
        vec![
            EventKind::AnalysisQueued,
            EventKind::AnalysisStarted,
            EventKind::AnalysisCompleted,
        ]
    );

    // The handoff is announced after the job completes
    let completed_at = events
        .iter()
        .position(|e| e.kind() == EventKind::AnalysisCompleted)
        .unwrap();
    let queued_at = events
        .iter()
        .position(|e| e.kind() == EventKind::SyncQueued)
        .unwrap();
    assert!(queued_at > completed_at);
}
