//! 工具注册模块：工具名到处理器与参数模式的映射。
//!
//! # Tools Module
//!
//! Tools are data, not branching code: a [`ToolRegistry`] maps each tool name
//! to its declared [`ToolSchema`](crate::types::ToolSchema) and an async
//! [`ToolHandler`]. The parser validates against the schemas and the executor
//! dispatches to the handlers; neither knows about any particular tool.
//!
//! ```rust
//! use codap_relay_worker::tools::{handler_fn, ToolRegistry};
//! use codap_relay_worker::types::{ParameterSchema, ToolSchema};
//! use serde_json::json;
//!
//! let registry = ToolRegistry::builder()
//!     .tool(
//!         ToolSchema::new("echo", "Echo text back").with_param("text", ParameterSchema::string(), true),
//!         handler_fn(|args| async move { Ok(json!({ "echoed": args["text"] })) }),
//!     )
//!     .build()
//!     .unwrap();
//! assert!(registry.contains("echo"));
//! ```

mod handler;
mod registry;

pub use handler::{handler_fn, FnTool, ToolFailure, ToolHandler};
pub use registry::{RegisteredTool, ToolRegistry, ToolRegistryBuilder};
