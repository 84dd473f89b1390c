//! Drain ordering, batching and mutual exclusion

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use syncq::client::offline::{DrainOutcome, SkipReason};
use syncq::shared::{EventKind, Priority, SyncOperationStatus};

use crate::common::*;

#[tokio::test]
async fn test_priority_then_fifo_order() {
    let fx = manager_fixture(
        test_config().concurrency_limit(1).build().unwrap(),
        ScriptedHandler::succeeding(),
    );

    let low = fx.manager.queue_operation(preference_with("low", Priority::Low)).await.unwrap();
    fx.clock.advance(Duration::from_secs(1));
    let medium_old = fx.manager.queue_operation(preference_with("m1", Priority::Medium)).await.unwrap();
    fx.clock.advance(Duration::from_secs(1));
    let high = fx.manager.queue_operation(preference_with("high", Priority::High)).await.unwrap();
    fx.clock.advance(Duration::from_secs(1));
    let medium_new = fx.manager.queue_operation(preference_with("m2", Priority::Medium)).await.unwrap();

    fx.manager.drain().await.unwrap();
    assert_eq!(fx.handler.call_ids(), vec![high, medium_old, medium_new, low]);
}

#[tokio::test]
async fn test_same_timestamp_uses_enqueue_order() {
    let fx = manager_fixture(
        test_config().concurrency_limit(1).build().unwrap(),
        ScriptedHandler::succeeding(),
    );

    // The mock clock does not move, so every timestamp is equal
    let mut ids = Vec::new();
    for key in ["a", "b", "c", "d"] {
        ids.push(fx.manager.queue_operation(preference(key)).await.unwrap());
    }

    fx.manager.drain().await.unwrap();
    assert_eq!(fx.handler.call_ids(), ids);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_bound() {
    let fx = manager_fixture(
        test_config().build().unwrap(),
        ScriptedHandler::succeeding().with_delay(Duration::from_millis(50)),
    );
    for i in 0..10 {
        fx.manager.queue_operation(preference(&format!("k{}", i))).await.unwrap();
    }

    let outcome = fx.manager.drain().await.unwrap();
    let report = outcome.report().expect("drain ran");

    assert_eq!(fx.handler.max_in_flight(), 3);
    assert_eq!(report.dispatched, 10);
    assert_eq!(report.completed, 10);
    assert_eq!(report.batches, 4);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_drain_is_skipped() {
    let fx = manager_fixture(
        test_config().build().unwrap(),
        ScriptedHandler::succeeding().with_delay(Duration::from_millis(100)),
    );
    for i in 0..5 {
        fx.manager.queue_operation(preference(&format!("k{}", i))).await.unwrap();
    }

    let (first, second) = tokio::join!(fx.manager.drain(), fx.manager.drain());
    let outcomes = [first.unwrap(), second.unwrap()];

    let skipped = outcomes
        .iter()
        .filter(|o| **o == DrainOutcome::Skipped(SkipReason::InFlight))
        .count();
    assert_eq!(skipped, 1);
    assert_eq!(fx.handler.call_count(), 5);
    assert_eq!(fx.manager.metrics().total_drains, 1);
    assert!(!fx.manager.is_draining());
}

#[tokio::test(start_paused = true)]
async fn test_skipped_drain_gets_an_extra_pass() {
    let fx = manager_fixture(
        test_config().build().unwrap(),
        ScriptedHandler::succeeding().with_delay(Duration::from_millis(100)),
    );
    let first = fx.manager.queue_operation(preference("a")).await.unwrap();

    // Enqueued after the running drain loaded its snapshot
    let late = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let id = fx.manager.queue_operation(preference("b")).await.unwrap();
        (id, fx.manager.drain().await.unwrap())
    };
    let (running, (late_id, skipped)) = tokio::join!(fx.manager.drain(), late);

    assert_eq!(skipped, DrainOutcome::Skipped(SkipReason::InFlight));
    let outcome = running.unwrap();
    let report = outcome.report().expect("drain ran");
    assert_eq!(report.completed, 2);
    assert_eq!(report.batches, 2);
    assert_eq!(fx.handler.call_ids(), vec![first, late_id]);
    assert_op_status!(fx.manager, late_id, SyncOperationStatus::Completed);
    assert_eq!(fx.manager.metrics().total_drains, 1);
    assert!(!fx.manager.is_draining());
}

#[tokio::test]
async fn test_unrecorded_completion_returns_to_pending() {
    let store = Arc::new(FlakyStore::failing_writes(r#""status":"completed""#, 1));
    let fx = manager_fixture_on(
        store.clone(),
        test_config().build().unwrap(),
        ScriptedHandler::succeeding(),
    );
    let id = fx.manager.queue_operation(preference("a")).await.unwrap();
    let mut events = fx.events.subscribe();

    let outcome = fx.manager.drain().await.unwrap();
    let report = outcome.report().expect("drain ran");
    assert_eq!(store.failures_left(), 0);
    assert_eq!(report.persist_failures, 1);
    assert_eq!(report.completed, 0);

    let op = assert_op_status!(fx.manager, id, SyncOperationStatus::Pending);
    assert!(op.error_message.unwrap().contains("disk full"));
    assert!(drain_events(&mut events)
        .iter()
        .all(|e| e.kind() != EventKind::SyncOperationCompleted));

    // Redelivered under the same id on the next drain
    let outcome = fx.manager.drain().await.unwrap();
    assert_eq!(outcome.report().unwrap().completed, 1);
    assert_op_status!(fx.manager, id, SyncOperationStatus::Completed);
    assert_eq!(fx.handler.call_ids(), vec![id, id]);
}

#[tokio::test]
async fn test_offline_drain_dispatches_nothing() {
    let fx = manager_fixture(test_config().build().unwrap(), ScriptedHandler::succeeding());
    fx.network.set_online(false);
    let id = fx.manager.queue_operation(preference("a")).await.unwrap();

    assert_eq!(
        fx.manager.drain().await.unwrap(),
        DrainOutcome::Skipped(SkipReason::Offline)
    );
    assert_eq!(fx.handler.call_count(), 0);
    assert_op_status!(fx.manager, id, SyncOperationStatus::Pending);
}

#[tokio::test]
async fn test_completed_operations_are_not_redispatched() {
    let fx = manager_fixture(test_config().build().unwrap(), ScriptedHandler::succeeding());
    let id = fx.manager.queue_operation(preference("a")).await.unwrap();

    fx.manager.drain().await.unwrap();
    let op = assert_op_status!(fx.manager, id, SyncOperationStatus::Completed);
    assert!(op.completed_at.is_some());
    assert!(op.last_attempt.is_some());

    let outcome = fx.manager.drain().await.unwrap();
    assert_eq!(outcome.report().unwrap().dispatched, 0);
    assert_eq!(fx.handler.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_handler_timeout_is_transient() {
    let fx = manager_fixture(
        test_config().handler_timeout(Duration::from_secs(1)).build().unwrap(),
        ScriptedHandler::succeeding().with_delay(Duration::from_secs(10)),
    );
    let id = fx.manager.queue_operation(preference("slow")).await.unwrap();

    let outcome = fx.manager.drain().await.unwrap();
    assert_eq!(outcome.report().unwrap().retried, 1);

    let op = assert_op_status!(fx.manager, id, SyncOperationStatus::Pending);
    assert_eq!(op.retry_count, 1);
    assert!(op.error_message.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_templated_payload_reaches_handler_rendered() {
    let fx = manager_fixture(test_config().build().unwrap(), ScriptedHandler::succeeding());
    let id = fx
        .manager
        .queue_operation(
            user_data(serde_json::json!({"note": "edited by {{user_id}}", "ref": "{{operation_id}}"}))
                .for_user("ana")
                .templated(),
        )
        .await
        .unwrap();

    fx.manager.drain().await.unwrap();
    let payloads = fx.handler.payloads();
    let syncq::shared::SyncPayload::UserData(data) = &payloads[0] else {
        panic!("unexpected payload {:?}", payloads[0]);
    };
    assert_eq!(
        data.fields,
        serde_json::json!({"note": "edited by ana", "ref": id.to_string()})
    );
}
