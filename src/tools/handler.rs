use crate::types::{ToolError, ToolErrorType};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;

/// Failure reported by a tool handler.
///
/// The variant decides the `type` of the resulting response error.
#[derive(Debug, thiserror::Error)]
pub enum ToolFailure {
    /// Arguments passed schema validation but the handler rejected them.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The host plugin API call failed or reported `success: false`.
    #[error("host API error: {message}")]
    Host {
        message: String,
        details: Option<Value>,
    },

    #[error(transparent)]
    Execution(#[from] anyhow::Error),
}

impl ToolFailure {
    pub fn invalid_args(message: impl Into<String>) -> Self {
        ToolFailure::InvalidArgs(message.into())
    }

    pub fn host(message: impl Into<String>) -> Self {
        ToolFailure::Host {
            message: message.into(),
            details: None,
        }
    }

    pub fn error_type(&self) -> ToolErrorType {
        match self {
            ToolFailure::InvalidArgs(_) => ToolErrorType::InvalidArgs,
            ToolFailure::Host { .. } => ToolErrorType::CodapError,
            ToolFailure::Execution(_) => ToolErrorType::ExecutionError,
        }
    }

    pub fn into_tool_error(self) -> ToolError {
        let kind = self.error_type();
        match self {
            ToolFailure::InvalidArgs(message) => ToolError::new(kind, message),
            ToolFailure::Host { message, details } => {
                let err = ToolError::new(kind, message);
                match details {
                    Some(d) => err.with_details(d),
                    None => err,
                }
            }
            ToolFailure::Execution(e) => ToolError::new(kind, format!("{:#}", e)),
        }
    }
}

/// Async capability behind a tool name.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolFailure>;
}

/// Adapter turning an async closure into a [`ToolHandler`].
pub struct FnTool<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ToolFailure>> + Send,
{
    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolFailure> {
        (self.0)(args).await
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolFailure>> + Send + 'static,
{
    Arc::new(FnTool(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn failure_maps_to_error_type() {
        assert_eq!(
            ToolFailure::invalid_args("bad").error_type(),
            ToolErrorType::InvalidArgs
        );
        assert_eq!(ToolFailure::host("down").error_type(), ToolErrorType::CodapError);
        let exec: ToolFailure = anyhow::anyhow!("boom").into();
        assert_eq!(exec.error_type(), ToolErrorType::ExecutionError);
    }

    #[test]
    fn host_details_survive_conversion() {
        let failure = ToolFailure::Host {
            message: "no such dataContext".into(),
            details: Some(json!({"resource": "dataContext[Missing]"})),
        };
        let err = failure.into_tool_error();
        assert_eq!(err.kind, ToolErrorType::CodapError);
        assert_eq!(err.details.unwrap()["resource"], "dataContext[Missing]");
    }

    #[tokio::test]
    async fn closure_handler_is_called() {
        let h = handler_fn(|args| async move { Ok(json!({"n": args.len()})) });
        let mut args = Map::new();
        args.insert("a".into(), json!(1));
        assert_eq!(h.call(args).await.unwrap(), json!({"n": 1}));
    }
}
