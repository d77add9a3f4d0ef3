//! 宿主接口模块：宿主插件 API 的请求/响应原语、资源路径与通知路由。
//!
//! # Host API Module
//!
//! The host application's plugin API is an opaque request/response channel:
//! `send_request({action, resource, values}) -> {success, values}`. Tool
//! handlers call into it through the [`HostApi`] trait; how the call crosses
//! into the host is up to the embedding application.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`HostApi`] | The RPC primitive |
//! | [`HostRequest`] / [`HostResponse`] | Wire shapes of one call |
//! | [`ResourcePath`] | Builder and parser for bracketed resource paths |
//! | [`NotificationRouter`] | `on(action, resource, handler)` for host-initiated notifications |

mod notifications;
mod resource;

pub use notifications::{HostNotification, NotificationRouter};
pub use resource::{ResourcePath, ResourcePathError, ResourceSegment};

use crate::tools::ToolFailure;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostAction {
    Get,
    Create,
    Update,
    Delete,
    Notify,
}

impl HostAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostAction::Get => "get",
            HostAction::Create => "create",
            HostAction::Update => "update",
            HostAction::Delete => "delete",
            HostAction::Notify => "notify",
        }
    }
}

impl fmt::Display for HostAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "get" => Ok(HostAction::Get),
            "create" => Ok(HostAction::Create),
            "update" => Ok(HostAction::Update),
            "delete" => Ok(HostAction::Delete),
            "notify" => Ok(HostAction::Notify),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRequest {
    pub action: HostAction,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
}

impl HostRequest {
    pub fn new(action: HostAction, resource: &ResourcePath) -> Self {
        Self {
            action,
            resource: resource.to_string(),
            values: None,
        }
    }

    pub fn with_values(mut self, values: Value) -> Self {
        self.values = Some(values);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
}

impl HostResponse {
    pub fn ok(values: Value) -> Self {
        Self {
            success: true,
            values: Some(values),
        }
    }

    pub fn failed(values: Option<Value>) -> Self {
        Self {
            success: false,
            values,
        }
    }

    /// `success: false` becomes a host failure whose message is taken from
    /// `values.error` when the host supplied one.
    pub fn into_result(self, request: &HostRequest) -> Result<Value, ToolFailure> {
        if self.success {
            return Ok(self.values.unwrap_or(Value::Null));
        }
        let message = self
            .values
            .as_ref()
            .and_then(|v| v.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Host request failed: {} {}", request.action, request.resource));
        Err(ToolFailure::Host {
            message,
            details: Some(json!({
                "action": request.action,
                "resource": request.resource,
                "values": self.values,
            })),
        })
    }
}

/// Error raised by the channel itself, as opposed to a `success: false` reply.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("host channel error: {0}")]
pub struct HostChannelError(pub String);

#[async_trait]
pub trait HostApi: Send + Sync {
    async fn send_request(&self, request: HostRequest) -> Result<HostResponse, HostChannelError>;

    /// Send and map both channel errors and `success: false` to a
    /// [`ToolFailure::Host`].
    async fn call(&self, request: HostRequest) -> Result<Value, ToolFailure> {
        let echo = HostRequest {
            action: request.action,
            resource: request.resource.clone(),
            values: None,
        };
        match self.send_request(request).await {
            Ok(resp) => resp.into_result(&echo),
            Err(e) => Err(ToolFailure::Host {
                message: e.to_string(),
                details: Some(json!({ "action": echo.action, "resource": echo.resource })),
            }),
        }
    }
}
