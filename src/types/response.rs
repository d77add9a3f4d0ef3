//! Outbound tool responses.

use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Discriminates why a tool call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorType {
    /// Unexpected failure, including timeouts and handler panics.
    ExecutionError,
    /// The named tool is not registered.
    ToolNotFound,
    /// Arguments were rejected by the parser or by the handler.
    InvalidArgs,
    /// The host plugin API call itself failed.
    CodapError,
}

impl ToolErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorType::ExecutionError => "execution_error",
            ToolErrorType::ToolNotFound => "tool_not_found",
            ToolErrorType::InvalidArgs => "invalid_args",
            ToolErrorType::CodapError => "codap_error",
        }
    }
}

impl fmt::Display for ToolErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure payload of a [`ToolResponse`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolError {
    #[serde(rename = "type")]
    pub kind: ToolErrorType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolError {
    pub fn new(kind: ToolErrorType, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Outcome {
    Success(Value),
    Failure(ToolError),
}

/// The result of executing one [`ToolRequest`](super::ToolRequest).
///
/// Built only through [`ToolResponse::success`] or [`ToolResponse::failure`], so
/// exactly one of `result`/`error` is ever present on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    request_id: String,
    outcome: Outcome,
    timestamp: String,
    duration_ms: u64,
}

impl ToolResponse {
    pub fn success(request_id: impl Into<String>, result: Value, duration_ms: u64) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: Outcome::Success(result),
            timestamp: super::now_iso(),
            duration_ms,
        }
    }

    pub fn failure(request_id: impl Into<String>, error: ToolError, duration_ms: u64) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: Outcome::Failure(error),
            timestamp: super::now_iso(),
            duration_ms,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Success(v) => Some(v),
            Outcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ToolError> {
        match &self.outcome {
            Outcome::Failure(e) => Some(e),
            Outcome::Success(_) => None,
        }
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}

impl Serialize for ToolResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire<'a> {
            request_id: &'a str,
            success: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            result: Option<&'a Value>,
            #[serde(skip_serializing_if = "Option::is_none")]
            error: Option<&'a ToolError>,
            timestamp: &'a str,
            duration: u64,
        }

        Wire {
            request_id: &self.request_id,
            success: self.is_success(),
            result: self.result(),
            error: self.error(),
            timestamp: &self.timestamp,
            duration: self.duration_ms,
        }
        .serialize(serializer)
    }
}

/// A group of responses delivered to the relay as one payload.
pub type ResponseBatch = crate::batch::Batch<ToolResponse>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_serializes_without_error() {
        let resp = ToolResponse::success("r1", json!({"echoed": "hi"}), 12);
        let wire = serde_json::to_value(&resp).unwrap();
        assert_eq!(wire["requestId"], "r1");
        assert_eq!(wire["success"], true);
        assert_eq!(wire["result"], json!({"echoed": "hi"}));
        assert!(wire.get("error").is_none());
        assert_eq!(wire["duration"], 12);
    }

    #[test]
    fn failure_serializes_without_result() {
        let err = ToolError::new(ToolErrorType::ToolNotFound, "Unknown tool: delete_universe")
            .with_details(json!({"tool": "delete_universe"}));
        let resp = ToolResponse::failure("r2", err, 0);
        let wire = serde_json::to_value(&resp).unwrap();
        assert_eq!(wire["success"], false);
        assert!(wire.get("result").is_none());
        assert_eq!(wire["error"]["type"], "tool_not_found");
        assert_eq!(wire["error"]["details"]["tool"], "delete_universe");
    }

    #[test]
    fn accessors_follow_outcome() {
        let ok = ToolResponse::success("a", json!(1), 0);
        assert!(ok.is_success());
        assert!(ok.result().is_some() && ok.error().is_none());

        let bad = ToolResponse::failure("b", ToolError::new(ToolErrorType::CodapError, "x"), 0);
        assert!(!bad.is_success());
        assert!(bad.result().is_none() && bad.error().is_some());
    }
}
