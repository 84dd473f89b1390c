//! HTTP dispatch against a mock server

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use syncq::client::api_client::{ApiClient, HttpOperationHandler, IDEMPOTENCY_HEADER};
use syncq::client::local_db::MemoryStore;
use syncq::client::offline::{HandlerError, HandlerRegistry, SyncQueueManager};
use syncq::client::sync::{EventBus, NetworkMonitor, NetworkStatus};
use syncq::shared::{
    MockClock, NotificationSync, OperationSpec, QueueConfig, SyncOperation, SyncOperationStatus,
    SyncPayload, UserDataSync,
};

use crate::common::*;

fn config_for(server: &MockServer) -> QueueConfig {
    test_config()
        .api_url(server.uri())
        .api_token("test-token")
        .build()
        .unwrap()
}

fn operation(spec: OperationSpec) -> SyncOperation {
    SyncOperation::from_spec(&spec, chrono::Utc::now(), 1)
}

#[tokio::test]
async fn test_create_posts_to_collection() {
    let server = MockServer::start().await;
    let op = operation(notification("Welcome"));

    Mock::given(method("POST"))
        .and(path("/api/notifications"))
        .and(header(IDEMPOTENCY_HEADER, op.id.to_string().as_str()))
        .and(header("Authorization", "Bearer test-token"))
        .and(body_json(serde_json::json!({
            "notification_id": null,
            "title": "Welcome",
            "body": "",
            "read": false
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(&config_for(&server)).unwrap();
    assert_eq!(client.send(&op).await, Ok(()));
}

#[tokio::test]
async fn test_update_and_delete_target_resource() {
    let server = MockServer::start().await;
    let payload = SyncPayload::UserData(UserDataSync {
        record_id: Some("rec-42".into()),
        fields: serde_json::json!({"name": "Ana"}),
    });
    let update = operation(OperationSpec::update(payload.clone()));
    let delete = operation(OperationSpec::delete(payload));

    Mock::given(method("PUT"))
        .and(path("/api/user-data/rec-42"))
        .and(header(IDEMPOTENCY_HEADER, update.id.to_string().as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/user-data/rec-42"))
        .and(header(IDEMPOTENCY_HEADER, delete.id.to_string().as_str()))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(&config_for(&server)).unwrap();
    assert_eq!(client.send(&update).await, Ok(()));
    assert_eq!(client.send(&delete).await, Ok(()));
}

#[tokio::test]
async fn test_status_codes_are_classified() {
    let server = MockServer::start().await;
    let cases: [(u16, bool); 4] = [(503, true), (429, true), (422, false), (404, false)];

    for (status, _) in cases {
        Mock::given(method("PUT"))
            .and(path(format!("/api/preferences/k{}", status)))
            .respond_with(ResponseTemplate::new(status).set_body_string("server says no"))
            .mount(&server)
            .await;
    }

    let client = ApiClient::new(&config_for(&server)).unwrap();
    for (status, retryable) in cases {
        let op = operation(preference(&format!("k{}", status)));
        let err = client.send(&op).await.unwrap_err();
        assert_eq!(err.is_retryable(), retryable, "status {}", status);
        assert!(err.to_string().contains("server says no"));
    }
}

#[tokio::test]
async fn test_connection_refused_is_transient() {
    let config = test_config().api_url("http://127.0.0.1:1").build().unwrap();
    let client = ApiClient::new(&config).unwrap();

    let err = client.send(&operation(preference("theme"))).await.unwrap_err();
    assert!(matches!(err, HandlerError::Transient(_)), "{:?}", err);
}

#[tokio::test]
async fn test_drain_retries_through_http() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/preferences/theme"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/preferences/theme"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let handler = Arc::new(HttpOperationHandler::from_config(&config).unwrap());
    let clock = Arc::new(MockClock::starting_now());
    let manager = SyncQueueManager::new(
        config,
        Arc::new(MemoryStore::new()),
        HandlerRegistry::new().with_all(handler),
        Arc::new(EventBus::new()),
        Arc::new(NetworkMonitor::new(NetworkStatus::Online)),
        clock.clone(),
    );

    let id = manager.queue_operation(preference("theme")).await.unwrap();
    let first = manager.drain().await.unwrap();
    assert_eq!(first.report().unwrap().retried, 1);
    let op = assert_op_status!(manager, id, SyncOperationStatus::Pending);
    assert!(op.error_message.unwrap().contains("503"));

    clock.advance(Duration::from_secs(2));
    manager.drain().await.unwrap();
    let op = assert_op_status!(manager, id, SyncOperationStatus::Completed);
    assert_eq!(op.retry_count, 1);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    // Both attempts carry the same idempotency key
    for request in &requests {
        assert_eq!(
            request.headers.get(IDEMPOTENCY_HEADER).unwrap().to_str().unwrap(),
            id.to_string()
        );
    }
}

#[tokio::test]
async fn test_permanent_http_failure_marks_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/notifications"))
        .respond_with(ResponseTemplate::new(400).set_body_string("title required"))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let handler = Arc::new(HttpOperationHandler::from_config(&config).unwrap());
    let manager = SyncQueueManager::new(
        config,
        Arc::new(MemoryStore::new()),
        HandlerRegistry::new().with_all(handler),
        Arc::new(EventBus::new()),
        Arc::new(NetworkMonitor::new(NetworkStatus::Online)),
        Arc::new(MockClock::starting_now()),
    );

    let id = manager
        .queue_operation(OperationSpec::create(SyncPayload::Notification(NotificationSync {
            notification_id: None,
            title: String::new(),
            body: String::new(),
            read: false,
        })))
        .await
        .unwrap();
    manager.drain().await.unwrap();

    let op = assert_op_status!(manager, id, SyncOperationStatus::Failed);
    assert!(op.error_message.unwrap().contains("title required"));
}
