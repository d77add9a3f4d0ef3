//! Connection status and errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        }
    }

    /// States in which no further transition happens without `connect()`.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Disconnected | ConnectionState::Error
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which transport carries the relay channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Sse,
    Polling,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Sse => f.write_str("sse"),
            TransportKind::Polling => f.write_str("polling"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionErrorKind {
    Network,
    Authentication,
    Parsing,
    Timeout,
    ServerError,
}

impl fmt::Display for ConnectionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionErrorKind::Network => "network",
            ConnectionErrorKind::Authentication => "authentication",
            ConnectionErrorKind::Parsing => "parsing",
            ConnectionErrorKind::Timeout => "timeout",
            ConnectionErrorKind::ServerError => "server_error",
        };
        f.write_str(s)
    }
}

/// Typed failure of the relay channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct ConnectionError {
    #[serde(rename = "type")]
    pub kind: ConnectionErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ConnectionError {
    pub fn new(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ConnectionErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ConnectionErrorKind::Timeout, message)
    }

    pub fn parsing(message: impl Into<String>) -> Self {
        Self::new(ConnectionErrorKind::Parsing, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ConnectionErrorKind::ServerError, message)
    }

    /// Classify a non-success HTTP status from the relay.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 | 403 => ConnectionErrorKind::Authentication,
            408 | 504 => ConnectionErrorKind::Timeout,
            500..=599 => ConnectionErrorKind::ServerError,
            _ => ConnectionErrorKind::Network,
        };
        let message = if body.trim().is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body.trim())
        };
        Self {
            kind,
            message,
            status: Some(status),
        }
    }

    /// Classify a client-side HTTP failure.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            ConnectionErrorKind::Timeout
        } else if err.is_decode() {
            ConnectionErrorKind::Parsing
        } else {
            ConnectionErrorKind::Network
        };
        Self {
            kind,
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
        }
    }
}

/// Snapshot of the connection state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    #[serde(rename = "type")]
    pub transport: TransportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ConnectionError>,
    pub retry_count: u32,
}

impl ConnectionStatus {
    pub fn disconnected(transport: TransportKind) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            transport,
            last_connected: None,
            error: None,
            retry_count: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(
            ConnectionError::from_status(401, "").kind,
            ConnectionErrorKind::Authentication
        );
        assert_eq!(
            ConnectionError::from_status(503, "busy").kind,
            ConnectionErrorKind::ServerError
        );
        assert_eq!(
            ConnectionError::from_status(404, "").kind,
            ConnectionErrorKind::Network
        );
        assert_eq!(ConnectionError::from_status(503, "busy").message, "HTTP 503: busy");
    }

    #[test]
    fn status_serializes_wire_names() {
        let mut status = ConnectionStatus::disconnected(TransportKind::Sse);
        status.error = Some(ConnectionError::timeout("no heartbeat"));
        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["state"], "disconnected");
        assert_eq!(v["type"], "sse");
        assert_eq!(v["retryCount"], 0);
        assert_eq!(v["error"]["type"], "timeout");
    }

    #[test]
    fn settled_states() {
        assert!(ConnectionState::Connected.is_settled());
        assert!(ConnectionState::Error.is_settled());
        assert!(!ConnectionState::Reconnecting.is_settled());
    }
}
