//! 传输层模块：与中继服务器之间的推送流、轮询与 HTTP 交付。
//!
//! # Transport Module
//!
//! Two implementations of one [`Transport`] interface carry relay events to
//! the connection manager:
//!
//! | Transport | Description |
//! |-----------|-------------|
//! | [`SseTransport`] | Long-lived server-sent event stream with an inactivity timeout |
//! | [`PollingTransport`] | Periodic "requests since last seen id" |
//!
//! Both are driven by [`crate::connection::ConnectionManager`], which owns
//! reconnection and fallback. [`RelayHttpClient`] is shared by the
//! transports, the response handler and the metadata client.

mod http;
mod polling;
mod sse;
mod tracker;

pub use http::{DeliveryReply, PollReply, RelayEndpoints, RelayHttpClient, TransportError};
pub use polling::{PollingTransport, DEFAULT_MAX_POLL_FAILURES, DEFAULT_POLLING_INTERVAL};
pub(crate) use sse::pump_frames;
pub use sse::{SseFrame, SseFrameDecoder, SseTransport};
pub use tracker::{RequestTracker, DEFAULT_MAX_TRACKED_IDS};

use crate::types::{ConnectionError, TransportKind};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Event received from the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Connected {
        code: Option<String>,
        message: Option<String>,
    },
    /// Raw tool-request payload; validation happens in the parser.
    ToolRequest(Value),
    Heartbeat,
    /// `error` event sent by the relay. The stream stays open.
    ServerError { error: String, message: String },
    Timeout,
}

impl RelayEvent {
    /// Interpret a stream frame. The event name comes from `event:` or,
    /// failing that, from a `type` field in the data. Unknown names are
    /// ignored.
    pub fn from_frame(frame: &SseFrame) -> Result<Option<RelayEvent>, ConnectionError> {
        let data: Option<Value> = if frame.data.trim().is_empty() {
            None
        } else {
            match serde_json::from_str(&frame.data) {
                Ok(v) => Some(v),
                Err(e) if frame.event.as_deref() == Some("tool-request") => {
                    return Err(ConnectionError::parsing(format!(
                        "tool-request data is not JSON: {}",
                        e
                    )))
                }
                Err(_) => None,
            }
        };
        let name = frame
            .event
            .clone()
            .or_else(|| {
                data.as_ref()
                    .and_then(|d| d.get("type"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "message".to_string());
        let field = |key: &str| {
            data.as_ref()
                .and_then(|d| d.get(key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        Ok(match name.as_str() {
            "connected" => Some(RelayEvent::Connected {
                code: field("code"),
                message: field("message"),
            }),
            "tool-request" => match data {
                // Some relays wrap the request: {"type": "tool-request", "request": {...}}
                Some(Value::Object(mut obj)) => match obj.remove("request") {
                    Some(inner @ Value::Object(_)) if frame.event.is_none() => {
                        Some(RelayEvent::ToolRequest(inner))
                    }
                    Some(other) => {
                        obj.insert("request".into(), other);
                        Some(RelayEvent::ToolRequest(Value::Object(obj)))
                    }
                    None => Some(RelayEvent::ToolRequest(Value::Object(obj))),
                },
                Some(other) => Some(RelayEvent::ToolRequest(other)),
                None => return Err(ConnectionError::parsing("tool-request without data")),
            },
            "heartbeat" => Some(RelayEvent::Heartbeat),
            "error" => Some(RelayEvent::ServerError {
                error: field("error").unwrap_or_else(|| "error".to_string()),
                message: field("message").unwrap_or_default(),
            }),
            "timeout" => Some(RelayEvent::Timeout),
            other => {
                tracing::debug!(event = other, "ignoring unknown stream event");
                None
            }
        })
    }
}

/// What a transport reports while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The channel is established (stream opened or first poll succeeded).
    Opened,
    Event(RelayEvent),
    /// A non-fatal problem; the channel is still up.
    Warning(ConnectionError),
}

/// A channel to the relay.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Run until the channel drops (`Err`) or `cancel` fires (`Ok`).
    /// Failing before [`TransportEvent::Opened`] is sent means the channel
    /// could not be established.
    async fn run(
        &self,
        events: UnboundedSender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ConnectionError>;
}
