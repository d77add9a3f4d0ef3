//! 类型系统模块：定义中继请求、响应、工具模式与连接状态的核心数据类型。
//!
//! # Types Module
//!
//! Core data types shared by every stage of the relay pipeline.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ToolRequest`] | A unit of work requested by the remote agent |
//! | [`ToolResponse`] | Result of executing one request (success xor error) |
//! | [`ToolError`] | Typed failure carried by a response |
//! | [`ResponseBatch`] | Responses grouped for one delivery |
//! | [`ToolSchema`] | Declared parameter contract of a tool |
//! | [`ConnectionStatus`] | Snapshot of the relay connection state machine |
//! | [`ConnectionError`] | Typed connection failure |
//!
//! ## Submodules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`request`] | Inbound tool requests |
//! | [`response`] | Outbound tool responses and batches |
//! | [`schema`] | Tool and parameter schemas |
//! | [`connection`] | Connection status and errors |

pub mod connection;
pub mod request;
pub mod response;
pub mod schema;

pub use connection::{
    ConnectionError, ConnectionErrorKind, ConnectionState, ConnectionStatus, TransportKind,
};
pub use request::ToolRequest;
pub use response::{ResponseBatch, ToolError, ToolErrorType, ToolResponse};
pub use schema::{ParameterSchema, ParameterType, ToolSchema};

/// Current time as an RFC 3339 string with millisecond precision (UTC).
pub(crate) fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
