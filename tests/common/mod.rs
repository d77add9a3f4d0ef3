//! Mock relay server shared by the integration tests.

#![allow(dead_code)]

use codap_relay_worker::resilience::BackoffPolicy;
use codap_relay_worker::tools::{handler_fn, ToolFailure, ToolRegistry};
use codap_relay_worker::transport::RelayHttpClient;
use codap_relay_worker::types::{ParameterSchema, ToolSchema};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const SESSION: &str = "TEST01";

/// Test fixture that owns a mock relay.
pub struct RelayFixture {
    pub server: ServerGuard,
    pub base_url: String,
}

impl RelayFixture {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let base_url = server.url();
        Self { server, base_url }
    }

    pub fn client(&self) -> RelayHttpClient {
        RelayHttpClient::new(&self.base_url).expect("mock server url is valid")
    }

    /// Push stream answering 200 with the given `(event, data)` frames.
    pub async fn mock_stream(&mut self, frames: &[(&str, Value)]) -> Mock {
        let body = frames
            .iter()
            .map(|(event, data)| format!("event: {}\ndata: {}\n\n", event, data))
            .collect::<String>();
        self.server
            .mock("GET", Matcher::Regex(r"^/api/stream".into()))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await
    }

    pub async fn mock_stream_status(&mut self, status: usize, body: &str) -> Mock {
        self.server
            .mock("GET", Matcher::Regex(r"^/api/stream".into()))
            .with_status(status)
            .with_body(body)
            .create_async()
            .await
    }

    /// Polling endpoint returning the same requests on every poll.
    pub async fn mock_poll(&mut self, requests: Vec<Value>) -> Mock {
        let body = json!({ "requests": requests }).to_string();
        self.server
            .mock("GET", Matcher::Regex(r"^/api/request".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }

    pub async fn mock_delivery(&mut self, status: usize) -> Mock {
        self.server
            .mock("POST", "/api/response")
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await
    }

    /// Delivery mock that only matches bodies containing `fragment`.
    pub async fn mock_delivery_containing(&mut self, fragment: &str, status: usize) -> Mock {
        self.server
            .mock("POST", "/api/response")
            .match_body(Matcher::Regex(regex::escape(fragment)))
            .with_status(status)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await
    }
}

pub fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy::new(Duration::from_millis(5), Duration::from_millis(20))
}

/// `echo` returns its arguments; `fail` always reports a host error.
pub fn registry() -> Arc<ToolRegistry> {
    Arc::new(
        ToolRegistry::builder()
            .tool(
                ToolSchema::new("echo", "Echo the arguments").with_param(
                    "text",
                    ParameterSchema::string().with_length(Some(1), None),
                    true,
                ),
                handler_fn(|args| async move { Ok(Value::Object(args)) }),
            )
            .tool(
                ToolSchema::new("fail", "Always fails"),
                handler_fn(|_args| async move {
                    Err::<Value, _>(ToolFailure::host("dataContext not found"))
                }),
            )
            .build()
            .expect("registry builds"),
    )
}

pub fn request(id: &str, tool: &str, args: Value) -> Value {
    json!({ "id": id, "tool": tool, "args": args })
}
