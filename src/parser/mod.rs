//! 请求解析模块：将不可信的线上负载转换为经过校验的工具调用。
//!
//! # Request Parser Module
//!
//! Turns untrusted relay payloads into validated [`ToolRequest`]s. Parsing is
//! total: every input yields either a request or a typed [`ParseError`], and
//! no I/O is performed, so malicious payloads can be unit-tested directly.
//!
//! Stages, in order, stopping at the first failure:
//!
//! 1. structure (`MALFORMED`)
//! 2. serialized size (`TOO_LARGE`)
//! 3. tool existence (`UNKNOWN_TOOL`, unless unknown tools are allowed)
//! 4. nesting depth and parameter schema (`INVALID_PARAM`, with details)
//! 5. optional sanitization of string values
//!
//! ```rust
//! use codap_relay_worker::parser::{ParseErrorCode, ParserConfig, ToolRequestParser};
//! use codap_relay_worker::tools::{handler_fn, ToolRegistry};
//! use codap_relay_worker::types::{ParameterSchema, ToolSchema};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let registry = ToolRegistry::builder()
//!     .tool(
//!         ToolSchema::new("echo", "").with_param("text", ParameterSchema::string(), true),
//!         handler_fn(|args| async move { Ok(json!({ "echoed": args["text"] })) }),
//!     )
//!     .build()
//!     .unwrap();
//! let parser = ToolRequestParser::new(Arc::new(registry), ParserConfig::default());
//!
//! let ok = parser.parse_request(&json!({"id": "r1", "tool": "echo", "args": {"text": "hi"}}));
//! assert!(ok.is_ok());
//!
//! let err = parser.parse_request(&json!({"id": "r2", "tool": "delete_universe", "args": {}}));
//! assert_eq!(err.unwrap_err().code, ParseErrorCode::UnknownTool);
//! ```

mod sanitize;
mod validator;

pub use validator::ParamViolation;

use crate::tools::ToolRegistry;
use crate::types::{ToolError, ToolErrorType, ToolRequest, ToolResponse};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;
use validator::{nesting_depth, ParameterValidator, PatternCache};

const PATTERN_CACHE_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParseErrorCode {
    Malformed,
    TooLarge,
    UnknownTool,
    InvalidParam,
}

impl ParseErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseErrorCode::Malformed => "MALFORMED",
            ParseErrorCode::TooLarge => "TOO_LARGE",
            ParseErrorCode::UnknownTool => "UNKNOWN_TOOL",
            ParseErrorCode::InvalidParam => "INVALID_PARAM",
        }
    }

    /// Error type reported to the relay when the request is rejected.
    pub fn response_error_type(&self) -> ToolErrorType {
        match self {
            ParseErrorCode::UnknownTool => ToolErrorType::ToolNotFound,
            _ => ToolErrorType::InvalidArgs,
        }
    }
}

impl fmt::Display for ParseErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a raw payload was rejected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ParseError {
    pub code: ParseErrorCode,
    pub message: String,
    pub details: Option<Value>,
    /// Request id, when the payload carried a usable one.
    pub request_id: Option<String>,
    pub tool: Option<String>,
}

impl ParseError {
    pub fn new(code: ParseErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            request_id: None,
            tool: None,
        }
    }

    fn malformed(message: impl Into<String>) -> Self {
        Self::new(ParseErrorCode::Malformed, message)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn for_request(mut self, id: Option<&str>, tool: Option<&str>) -> Self {
        self.request_id = id.map(str::to_string);
        self.tool = tool.map(str::to_string);
        self
    }

    /// Error payload posted back to the relay for this rejection.
    pub fn to_tool_error(&self) -> ToolError {
        let mut details = Map::new();
        details.insert("code".into(), json!(self.code.as_str()));
        if let Some(tool) = &self.tool {
            details.insert("tool".into(), json!(tool));
        }
        if let Some(Value::Object(extra)) = &self.details {
            for (k, v) in extra {
                details.entry(k.clone()).or_insert_with(|| v.clone());
            }
        } else if let Some(extra) = &self.details {
            details.insert("details".into(), extra.clone());
        }
        ToolError::new(self.code.response_error_type(), self.message.clone())
            .with_details(Value::Object(details))
    }

    /// Failure response for the offending request. `None` when the payload
    /// had no id to correlate with.
    pub fn to_response(&self, duration_ms: u64) -> Option<ToolResponse> {
        let id = self.request_id.as_deref()?;
        Some(ToolResponse::failure(id, self.to_tool_error(), duration_ms))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParserConfig {
    /// Upper bound on the serialized payload, in bytes.
    pub max_request_size: usize,
    pub max_object_depth: usize,
    /// Strings longer than this are truncated when sanitizing.
    pub max_string_length: usize,
    pub allow_unknown_tools: bool,
    pub sanitize_inputs: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            max_request_size: 1024 * 1024,
            max_object_depth: 10,
            max_string_length: 10_000,
            allow_unknown_tools: false,
            sanitize_inputs: true,
        }
    }
}

impl ParserConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_request_size(mut self, bytes: usize) -> Self {
        self.max_request_size = bytes;
        self
    }

    pub fn with_max_object_depth(mut self, depth: usize) -> Self {
        self.max_object_depth = depth;
        self
    }

    pub fn with_max_string_length(mut self, len: usize) -> Self {
        self.max_string_length = len;
        self
    }

    pub fn with_allow_unknown_tools(mut self, allow: bool) -> Self {
        self.allow_unknown_tools = allow;
        self
    }

    pub fn with_sanitize_inputs(mut self, sanitize: bool) -> Self {
        self.sanitize_inputs = sanitize;
        self
    }
}

/// Validates raw payloads against a registry snapshot.
pub struct ToolRequestParser {
    registry: Arc<ToolRegistry>,
    config: ParserConfig,
    patterns: PatternCache,
}

impl ToolRequestParser {
    pub fn new(registry: Arc<ToolRegistry>, config: ParserConfig) -> Self {
        Self {
            registry,
            config,
            patterns: PatternCache::new(PATTERN_CACHE_CAPACITY),
        }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Parse a JSON document. Invalid JSON is `MALFORMED`; an oversized
    /// document is rejected before it is decoded.
    pub fn parse_str(&self, raw: &str) -> Result<ToolRequest, ParseError> {
        if raw.len() > self.config.max_request_size {
            return Err(self.too_large(raw.len()));
        }
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| ParseError::malformed(format!("Request is not valid JSON: {}", e)))?;
        self.parse_request(&value)
    }

    pub fn parse_request(&self, raw: &Value) -> Result<ToolRequest, ParseError> {
        let id_hint = ToolRequest::peek_id(raw);
        let tool_hint = raw.get("tool").and_then(Value::as_str);

        let mut request = self
            .check_structure(raw)
            .map_err(|e| e.for_request(id_hint, tool_hint))?;

        let size = serde_json::to_vec(raw).map(|b| b.len()).unwrap_or(usize::MAX);
        if size > self.config.max_request_size {
            return Err(self.too_large(size).for_request(id_hint, tool_hint));
        }

        let known = self.validate_tool(&request.tool);
        if !known && !self.config.allow_unknown_tools {
            return Err(ParseError::new(
                ParseErrorCode::UnknownTool,
                format!("Unknown tool: {}", request.tool),
            )
            .with_details(json!({ "supportedTools": self.get_supported_tools() }))
            .for_request(id_hint, tool_hint));
        }

        self.check_depth(&request.args)
            .map_err(|e| e.for_request(id_hint, tool_hint))?;
        if known {
            self.validate_parameters(&request.tool, &request.args)
                .map_err(|e| e.for_request(id_hint, tool_hint))?;
        }

        if self.config.sanitize_inputs {
            sanitize::sanitize_args(&mut request.args, self.config.max_string_length);
        }

        tracing::debug!(request_id = %request.id, tool = %request.tool, bytes = size, "parsed tool request");
        Ok(request)
    }

    pub fn validate_tool(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    /// Validate `params` against the declared schema of `tool`.
    pub fn validate_parameters(
        &self,
        tool: &str,
        params: &Map<String, Value>,
    ) -> Result<(), ParseError> {
        let schema = self.registry.schema(tool).ok_or_else(|| {
            ParseError::new(ParseErrorCode::UnknownTool, format!("Unknown tool: {}", tool))
        })?;
        ParameterValidator::new(&self.patterns)
            .validate_args(&schema.parameters, params)
            .map_err(|v| {
                ParseError::new(
                    ParseErrorCode::InvalidParam,
                    format!("Invalid parameter '{}': {}", v.path, v.message),
                )
                .with_details(v.to_details())
            })
    }

    pub fn get_supported_tools(&self) -> Vec<String> {
        self.registry.names()
    }

    fn check_structure(&self, raw: &Value) -> Result<ToolRequest, ParseError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| ParseError::malformed("Request must be a JSON object"))?;

        let id = non_empty_str(obj, "id")?;
        let tool = non_empty_str(obj, "tool")?;

        let args = match obj.get("args").or_else(|| obj.get("arguments")) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(m)) => m.clone(),
            Some(other) => {
                return Err(ParseError::malformed(format!(
                    "Field 'args' must be an object, got {}",
                    crate::types::ParameterType::of(other)
                )))
            }
        };

        let timestamp = optional_str(obj, "timestamp")?;
        let session_code = optional_str(obj, "sessionCode")?;

        let mut request = ToolRequest::new(id, tool, args);
        if let Some(ts) = timestamp {
            request = request.with_timestamp(ts);
        }
        if let Some(code) = session_code {
            request = request.with_session_code(code);
        }
        Ok(request)
    }

    fn check_depth(&self, args: &Map<String, Value>) -> Result<(), ParseError> {
        let limit = self.config.max_object_depth;
        // The argument object itself is level 1.
        let depth = 1 + args
            .values()
            .map(|v| nesting_depth(v, limit))
            .max()
            .unwrap_or(0);
        if depth > limit {
            return Err(ParseError::new(
                ParseErrorCode::InvalidParam,
                format!("Arguments nested deeper than {} levels", limit),
            )
            .with_details(json!({
                "path": "",
                "constraint": "maxObjectDepth",
                "message": format!("depth exceeds {}", limit),
            })));
        }
        Ok(())
    }

    fn too_large(&self, size: usize) -> ParseError {
        ParseError::new(
            ParseErrorCode::TooLarge,
            format!(
                "Request size {} bytes exceeds limit of {} bytes",
                size, self.config.max_request_size
            ),
        )
        .with_details(json!({ "size": size, "limit": self.config.max_request_size }))
    }
}

fn non_empty_str(obj: &Map<String, Value>, field: &str) -> Result<String, ParseError> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(ParseError::malformed(format!("Field '{}' is empty", field))),
        Some(_) => Err(ParseError::malformed(format!("Field '{}' must be a string", field))),
        None => Err(ParseError::malformed(format!("Missing field '{}'", field))),
    }
}

fn optional_str(obj: &Map<String, Value>, field: &str) -> Result<Option<String>, ParseError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ParseError::malformed(format!("Field '{}' must be a string", field))),
    }
}
