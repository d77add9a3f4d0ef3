//! Single-flight tool executor.
//!
//! The host API is one logical message channel that cannot multiplex calls,
//! so at most one handler runs at a time. Callers queue on a fair async mutex
//! and are served in the order they arrived. Every call resolves to a
//! [`ToolResponse`]; handler errors, panics and timeouts become typed
//! response errors.

use crate::tools::ToolRegistry;
use crate::types::{ToolError, ToolErrorType, ToolRequest, ToolResponse};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    gate: Mutex<()>,
    queued: AtomicUsize,
    busy: AtomicBool,
    timeout: Duration,
}

/// Decrements the waiting count when the caller leaves the queue, whether it
/// got its turn or was dropped while waiting.
struct QueueSlot<'a>(&'a AtomicUsize);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct BusyFlag<'a>(&'a AtomicBool);

impl Drop for BusyFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            gate: Mutex::new(()),
            queued: AtomicUsize::new(0),
            busy: AtomicBool::new(false),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn execute(&self, request: ToolRequest) -> ToolResponse {
        self.queued.fetch_add(1, Ordering::SeqCst);
        let slot = QueueSlot(&self.queued);
        let _turn = self.gate.lock().await;
        drop(slot);

        self.busy.store(true, Ordering::SeqCst);
        let _busy = BusyFlag(&self.busy);
        let started = Instant::now();

        let ToolRequest { id, tool, args, .. } = request;
        let Some(registered) = self.registry.get(&tool) else {
            tracing::warn!(request_id = %id, tool = %tool, "tool not registered");
            return ToolResponse::failure(
                id,
                ToolError::new(ToolErrorType::ToolNotFound, format!("Unknown tool: {}", tool)),
                elapsed_ms(started),
            );
        };
        let handler = Arc::clone(&registered.handler);

        tracing::debug!(request_id = %id, tool = %tool, "executing tool");
        let outcome = tokio::time::timeout(
            self.timeout,
            AssertUnwindSafe(handler.call(args)).catch_unwind(),
        )
        .await;
        let duration_ms = elapsed_ms(started);

        let response = match outcome {
            Ok(Ok(Ok(value))) => ToolResponse::success(id, value, duration_ms),
            Ok(Ok(Err(failure))) => ToolResponse::failure(id, failure.into_tool_error(), duration_ms),
            Ok(Err(panic)) => ToolResponse::failure(
                id,
                ToolError::new(
                    ToolErrorType::ExecutionError,
                    format!("Tool '{}' panicked: {}", tool, panic_message(panic.as_ref())),
                ),
                duration_ms,
            ),
            Err(_) => ToolResponse::failure(
                id,
                ToolError::new(
                    ToolErrorType::ExecutionError,
                    format!(
                        "Tool '{}' timed out after {} ms",
                        tool,
                        self.timeout.as_millis()
                    ),
                ),
                duration_ms,
            ),
        };

        match response.error() {
            None => tracing::debug!(
                request_id = %response.request_id(),
                tool = %tool,
                duration_ms,
                "tool succeeded"
            ),
            Some(err) => tracing::warn!(
                request_id = %response.request_id(),
                tool = %tool,
                duration_ms,
                error_type = %err.kind,
                error = %err.message,
                "tool failed"
            ),
        }
        response
    }

    pub fn is_tool_supported(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn get_supported_tools(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Calls waiting for their turn, not counting the one in flight.
    pub fn queue_size(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{handler_fn, ToolFailure};
    use crate::types::ToolSchema;
    use serde_json::{json, Map, Value};
    use std::sync::Mutex as StdMutex;

    fn request(id: &str, tool: &str, args: Value) -> ToolRequest {
        ToolRequest::new(id, tool, args.as_object().cloned().unwrap_or_default())
    }

    fn executor() -> ToolExecutor {
        let registry = ToolRegistry::builder()
            .tool(
                ToolSchema::new("echo", ""),
                handler_fn(|args| async move { Ok(json!({ "echoed": args["text"] })) }),
            )
            .tool(
                ToolSchema::new("bad_args", ""),
                handler_fn(|_| async { Err(ToolFailure::invalid_args("attribute missing")) }),
            )
            .tool(
                ToolSchema::new("host_down", ""),
                handler_fn(|_| async { Err(ToolFailure::host("no such dataContext")) }),
            )
            .tool(
                ToolSchema::new("boom", ""),
                handler_fn(|_| async { Err(anyhow::anyhow!("unexpected").into()) }),
            )
            .tool(
                ToolSchema::new("panics", ""),
                handler_fn(|args| async move {
                    if args.is_empty() {
                        panic!("handler exploded");
                    }
                    Ok(Value::Null)
                }),
            )
            .tool(
                ToolSchema::new("hang", ""),
                handler_fn(|_| async {
                    std::future::pending::<()>().await;
                    Ok(Value::Null)
                }),
            )
            .build()
            .unwrap();
        ToolExecutor::new(Arc::new(registry)).with_timeout(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn echo_succeeds() {
        let resp = executor().execute(request("r1", "echo", json!({"text": "hi"}))).await;
        assert!(resp.is_success());
        assert_eq!(resp.request_id(), "r1");
        assert_eq!(resp.result(), Some(&json!({"echoed": "hi"})));
        assert!(resp.error().is_none());
    }

    #[tokio::test]
    async fn failures_are_typed() {
        let ex = executor();
        let cases = [
            ("missing", ToolErrorType::ToolNotFound),
            ("bad_args", ToolErrorType::InvalidArgs),
            ("host_down", ToolErrorType::CodapError),
            ("boom", ToolErrorType::ExecutionError),
            ("panics", ToolErrorType::ExecutionError),
        ];
        for (tool, expected) in cases {
            let resp = ex.execute(request("r", tool, json!({}))).await;
            assert!(!resp.is_success(), "{}", tool);
            assert!(resp.result().is_none());
            assert_eq!(resp.error().unwrap().kind, expected, "{}", tool);
        }
    }

    #[tokio::test]
    async fn hanging_handler_times_out_and_queue_proceeds() {
        let ex = executor();
        let (hung, next) = tokio::join!(
            ex.execute(request("r1", "hang", json!({}))),
            ex.execute(request("r2", "echo", json!({"text": "after"}))),
        );
        let err = hung.error().unwrap();
        assert_eq!(err.kind, ToolErrorType::ExecutionError);
        assert!(err.message.contains("timed out"));
        assert!(hung.duration_ms() >= 100);
        assert!(next.is_success());
        assert!(!ex.is_busy());
    }

    #[tokio::test]
    async fn executions_are_serialized_in_submission_order() {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let active = Arc::new(AtomicUsize::new(0));
        let l = log.clone();
        let a = active.clone();
        let registry = ToolRegistry::builder()
            .tool(
                ToolSchema::new("slow", ""),
                handler_fn(move |args: Map<String, Value>| {
                    let log = l.clone();
                    let active = a.clone();
                    async move {
                        let n = args["n"].as_u64().unwrap();
                        assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0, "overlap");
                        log.lock().unwrap().push(n);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(json!(n))
                    }
                }),
            )
            .build()
            .unwrap();
        let ex = Arc::new(ToolExecutor::new(Arc::new(registry)));

        let calls = (0..8u64).map(|n| {
            let ex = ex.clone();
            async move { ex.execute(request(&format!("r{}", n), "slow", json!({"n": n}))).await }
        });
        let responses = futures::future::join_all(calls).await;

        assert!(responses.iter().all(|r| r.is_success()));
        assert_eq!(*log.lock().unwrap(), (0..8).collect::<Vec<_>>());
        assert_eq!(ex.queue_size(), 0);
    }

    #[tokio::test]
    async fn reports_queue_and_busy_state() {
        let ex = Arc::new(executor());
        let first = tokio::spawn({
            let ex = ex.clone();
            async move { ex.execute(request("a", "hang", json!({}))).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = tokio::spawn({
            let ex = ex.clone();
            async move { ex.execute(request("b", "echo", json!({"text": "x"}))).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(ex.is_busy());
        assert_eq!(ex.queue_size(), 1);

        first.await.unwrap();
        second.await.unwrap();
        assert!(!ex.is_busy());
        assert_eq!(ex.queue_size(), 0);
    }

    #[test]
    fn supported_tools_come_from_registry() {
        let ex = executor();
        assert!(ex.is_tool_supported("echo"));
        assert!(!ex.is_tool_supported("nope"));
        assert_eq!(ex.get_supported_tools().len(), 6);
    }
}
