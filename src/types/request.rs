//! Inbound tool requests.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A unit of work requested by the remote agent.
///
/// Requests are created by the relay and consumed exactly once by the executor.
/// Instances handed to the executor have already passed validation (and
/// sanitization, if enabled).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequest {
    pub id: String,
    pub tool: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub session_code: String,
}

impl ToolRequest {
    pub fn new(id: impl Into<String>, tool: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            args,
            timestamp: super::now_iso(),
            session_code: String::new(),
        }
    }

    pub fn with_session_code(mut self, code: impl Into<String>) -> Self {
        self.session_code = code.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = timestamp.into();
        self
    }

    /// Best-effort extraction of the request id from an untrusted payload.
    pub fn peek_id(raw: &Value) -> Option<&str> {
        raw.get("id").and_then(Value::as_str).filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_wire_format() {
        let raw = json!({
            "id": "r1",
            "tool": "echo",
            "args": {"text": "hi"},
            "timestamp": "2024-01-01T00:00:00.000Z",
            "sessionCode": "ABC123"
        });
        let req: ToolRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(req.id, "r1");
        assert_eq!(req.session_code, "ABC123");
        assert_eq!(req.args.get("text"), Some(&json!("hi")));
    }

    #[test]
    fn peek_id_ignores_non_strings() {
        assert_eq!(ToolRequest::peek_id(&json!({"id": "x"})), Some("x"));
        assert_eq!(ToolRequest::peek_id(&json!({"id": 7})), None);
        assert_eq!(ToolRequest::peek_id(&json!({"id": ""})), None);
        assert_eq!(ToolRequest::peek_id(&json!("nope")), None);
    }
}
