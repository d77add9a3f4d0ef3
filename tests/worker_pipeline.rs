//! End-to-end: relay → parse → execute → deliver, over a mock relay.

mod common;

use codap_relay_worker::batch::BatchConfig;
use codap_relay_worker::response::ResponseHandlerConfig;
use codap_relay_worker::worker::ToolExecutionKind;
use codap_relay_worker::{BrowserWorker, BrowserWorkerConfig, ConnectionState};
use common::{fast_backoff, registry, request, RelayFixture, SESSION};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::assert_ok;

fn worker_config(base_url: &str) -> BrowserWorkerConfig {
    BrowserWorkerConfig::new(base_url, SESSION)
        .with_prefer_sse(false)
        .with_polling_interval(Duration::from_millis(20))
        .with_retry_delay(Duration::from_millis(5))
        .with_response(
            ResponseHandlerConfig::new()
                .with_retry_backoff(fast_backoff())
                .with_batch(BatchConfig::new().with_max_batch_size(1)),
        )
}

#[tokio::test]
async fn requests_are_executed_once_and_answered() {
    let mut relay = RelayFixture::new().await;
    let _poll = relay
        .mock_poll(vec![
            request("r1", "echo", json!({"text": "hello"})),
            request("r2", "create_graph", json!({})),
            request("r3", "fail", json!({})),
        ])
        .await;
    let echoed = relay
        .mock_delivery_containing(r#""result":{"text":"hello"}"#, 200)
        .await;
    let not_found = relay
        .mock_delivery_containing(r#""type":"tool_not_found""#, 200)
        .await;
    let host_error = relay
        .mock_delivery_containing(r#""type":"codap_error""#, 200)
        .await;

    let worker = BrowserWorker::builder()
        .config(worker_config(&relay.base_url))
        .registry(registry())
        .build()
        .unwrap();
    let executions = Arc::new(Mutex::new(Vec::new()));
    let e = executions.clone();
    worker.on_tool_execution(move |ex| {
        e.lock().unwrap().push((ex.request_id.clone(), ex.kind));
    });

    let status = assert_ok!(worker.start().await);
    assert_eq!(status.state, ConnectionState::Connected);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_ok!(worker.stop().await);

    assert_eq!(
        *executions.lock().unwrap(),
        vec![
            ("r1".to_string(), ToolExecutionKind::Executed),
            ("r2".to_string(), ToolExecutionKind::Rejected),
            ("r3".to_string(), ToolExecutionKind::Executed),
        ]
    );
    echoed.assert_async().await;
    not_found.assert_async().await;
    host_error.assert_async().await;

    let stats = worker.statistics().await;
    assert_eq!(stats.requests_received, 3);
    assert_eq!(stats.requests_executed, 2);
    assert_eq!(stats.requests_rejected, 1);
    assert_eq!(stats.delivery.successful_deliveries, 3);
    assert_eq!(stats.delivery.failed_deliveries, 0);
}

#[tokio::test]
async fn invalid_arguments_are_reported_with_the_offending_path() {
    let mut relay = RelayFixture::new().await;
    let _poll = relay
        .mock_poll(vec![request("r1", "echo", json!({"text": ""}))])
        .await;
    let rejected = relay
        .mock_delivery_containing(r#""path":"text""#, 200)
        .await;

    let worker = BrowserWorker::builder()
        .config(worker_config(&relay.base_url))
        .registry(registry())
        .build()
        .unwrap();
    assert_ok!(worker.start().await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_ok!(worker.stop().await);

    rejected.assert_async().await;
}

#[tokio::test]
async fn start_fails_when_the_relay_refuses_the_session() {
    let mut relay = RelayFixture::new().await;
    let _poll = relay
        .server
        .mock("GET", mockito::Matcher::Regex(r"^/api/request".into()))
        .with_status(403)
        .with_body(r#"{"error":"session expired"}"#)
        .create_async()
        .await;

    let worker = BrowserWorker::builder()
        .config(worker_config(&relay.base_url))
        .registry(registry())
        .build()
        .unwrap();
    let err = worker.start().await.unwrap_err();

    assert!(matches!(err, codap_relay_worker::Error::Connection(_)));
    assert_eq!(worker.status().state, ConnectionState::Error);
    assert!(!worker.is_running().await);
}
