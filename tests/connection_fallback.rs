//! Connection manager over real transports against a mock relay.

mod common;

use codap_relay_worker::connection::{
    ConnectionConfig, ConnectionEvent, ConnectionEventKind, ConnectionManager,
};
use codap_relay_worker::transport::RelayEvent;
use codap_relay_worker::types::{ConnectionErrorKind, ConnectionState, TransportKind};
use common::{fast_backoff, request, RelayFixture, SESSION};
use mockito::Matcher;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn config() -> ConnectionConfig {
    ConnectionConfig::new(SESSION)
        .with_backoff(fast_backoff())
        .with_polling_interval(Duration::from_millis(20))
        .with_connect_timeout(Duration::from_secs(2))
}

fn collect_requests(manager: &ConnectionManager) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    manager.add_event_listener(ConnectionEventKind::Message, move |ev| {
        if let ConnectionEvent::Message(RelayEvent::ToolRequest(raw)) = ev {
            if let Some(id) = raw.get("id").and_then(|v| v.as_str()) {
                s.lock().unwrap().push(id.to_string());
            }
        }
    });
    seen
}

#[tokio::test]
async fn unavailable_stream_falls_back_to_polling() {
    let mut relay = RelayFixture::new().await;
    let stream = relay.mock_stream_status(404, "no stream here").await;
    let _poll = relay
        .mock_poll(vec![request("r1", "echo", json!({"text": "hi"}))])
        .await;

    let manager = ConnectionManager::new(relay.client(), config());
    let seen = collect_requests(&manager);

    let status = manager.connect().await.unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.transport, TransportKind::Polling);

    // The same request comes back on every poll; it is emitted once.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(*seen.lock().unwrap(), vec!["r1"]);
    stream.assert_async().await;

    manager.disconnect().await;
    assert_eq!(manager.status().state, ConnectionState::Disconnected);
}

#[tokio::test]
async fn stream_requests_are_not_replayed_after_switching_to_polling() {
    let mut relay = RelayFixture::new().await;
    let _stream = relay
        .mock_stream(&[
            ("connected", json!({"code": SESSION, "message": "connected"})),
            ("tool-request", request("r1", "echo", json!({"text": "a"}))),
            ("heartbeat", json!({})),
        ])
        .await;
    // After the stream ends, polling redelivers r1 alongside a new request.
    let _poll = relay
        .mock_poll(vec![
            request("r1", "echo", json!({"text": "a"})),
            request("r2", "echo", json!({"text": "b"})),
        ])
        .await;

    let manager = ConnectionManager::new(relay.client(), config());
    let seen = collect_requests(&manager);

    manager.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(*seen.lock().unwrap(), vec!["r1", "r2"]);
    assert_eq!(manager.status().transport, TransportKind::Polling);
    assert!(manager.is_connected());
    manager.disconnect().await;
}

#[tokio::test]
async fn rejected_session_code_is_terminal() {
    let mut relay = RelayFixture::new().await;
    let _stream = relay
        .mock_stream_status(401, r#"{"error":"invalid session code"}"#)
        .await;
    let poll = relay
        .server
        .mock("GET", Matcher::Regex(r"^/api/request".into()))
        .expect(0)
        .create_async()
        .await;

    let manager = ConnectionManager::new(relay.client(), config());
    let err = manager.connect().await.unwrap_err();

    assert_eq!(err.kind, ConnectionErrorKind::Authentication);
    assert_eq!(manager.status().state, ConnectionState::Error);
    poll.assert_async().await;
}

#[tokio::test]
async fn polling_resumes_from_the_last_request_id() {
    let mut relay = RelayFixture::new().await;
    let _first = relay
        .server
        .mock("GET", Matcher::Regex(r"^/api/request".into()))
        .with_status(200)
        .with_body(
            json!({
                "requests": [request("r5", "echo", json!({"text": "x"}))],
                "lastRequestId": "r5"
            })
            .to_string(),
        )
        .create_async()
        .await;
    let resumed = relay
        .server
        .mock("GET", Matcher::Regex(r"^/api/request\?.*since=r5".into()))
        .with_status(204)
        .expect_at_least(1)
        .create_async()
        .await;

    let manager = ConnectionManager::new(relay.client(), config().with_prefer_sse(false));
    let status = manager.connect().await.unwrap();
    assert_eq!(status.transport, TransportKind::Polling);

    tokio::time::sleep(Duration::from_millis(150)).await;
    resumed.assert_async().await;
    assert_eq!(manager.tracker().last_processed_id().as_deref(), Some("r5"));
    manager.disconnect().await;
}
