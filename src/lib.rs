//! # codap-relay-worker
//!
//! 连接远程工具调用代理与 CODAP 插件 API 的中继工作器。
//!
//! Relay worker that lets a remote tool-calling agent drive a CODAP document.
//! The agent posts tool requests to a relay server; the worker receives them
//! over a push stream (falling back to polling), validates them against the
//! registered tool schemas, runs them one at a time against the host API, and
//! delivers the responses back to the relay in rate-limited batches.
//!
//! ## Overview
//!
//! - **Connection**: [`connection::ConnectionManager`] keeps one channel to the
//!   relay, prefers SSE, falls back to polling, and reconnects with backoff.
//! - **Parsing**: [`parser::ToolRequestParser`] turns raw payloads into typed
//!   [`types::ToolRequest`]s or structured rejections.
//! - **Execution**: [`executor::ToolExecutor`] serializes handler calls because
//!   the host channel cannot multiplex.
//! - **Delivery**: [`response::ResponseHandler`] batches, rate-limits and
//!   retries response delivery.
//! - **Worker**: [`worker::BrowserWorker`] wires all of the above together.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use codap_relay_worker::tools::{handler_fn, ToolRegistry};
//! use codap_relay_worker::types::{ParameterSchema, ToolSchema};
//! use codap_relay_worker::{BrowserWorker, BrowserWorkerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> codap_relay_worker::Result<()> {
//!     let registry = ToolRegistry::builder()
//!         .tool(
//!             ToolSchema::new("get_codap_document", "Describe the document")
//!                 .with_param("include", ParameterSchema::string(), false),
//!             handler_fn(|_args| async move { Ok(serde_json::json!({"contexts": []})) }),
//!         )
//!         .build()?;
//!
//!     let worker = BrowserWorker::builder()
//!         .config(BrowserWorkerConfig::new("https://relay.example.com", "ABC123"))
//!         .registry(Arc::new(registry))
//!         .build()?;
//!
//!     worker.start().await?;
//!     tokio::signal::ctrl_c().await.ok();
//!     worker.stop().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connection`] | Relay channel state machine with SSE → polling fallback |
//! | [`transport`] | HTTP client, SSE decoding, polling, request de-duplication |
//! | [`parser`] | Request validation and sanitization |
//! | [`executor`] | Single-flight tool execution with timeouts |
//! | [`tools`] | Tool handler trait and registry |
//! | [`host`] | Host API request/response model and notification routing |
//! | [`response`] | Batched, rate-limited response delivery |
//! | [`batch`] | Size/delay bounded batch collection |
//! | [`resilience`] | Rate limiter and backoff policy |
//! | [`metadata`] | Tool manifest discovery and version negotiation |
//! | [`worker`] | The end-to-end worker |

pub mod batch;
pub mod connection;
pub mod events;
pub mod executor;
pub mod host;
pub mod logging;
pub mod metadata;
pub mod parser;
pub mod resilience;
pub mod response;
pub mod tools;
pub mod transport;
pub mod types;
pub mod worker;

pub use connection::{ConnectionConfig, ConnectionManager};
pub use executor::ToolExecutor;
pub use parser::{ParseError, ToolRequestParser};
pub use response::{ResponseHandler, ResponseHandlerConfig};
pub use tools::{ToolHandler, ToolRegistry};
pub use types::{ConnectionState, ConnectionStatus, ToolRequest, ToolResponse};
pub use worker::{BrowserWorker, BrowserWorkerConfig};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
