//! 工作器模块：把连接、解析、执行与响应交付串成一条处理流水线。
//!
//! # Worker Module
//!
//! [`BrowserWorker`] wires the pieces together:
//!
//! ```text
//! ConnectionManager ──tool request──▶ ToolRequestParser ──▶ ToolExecutor
//!                                           │ rejected            │
//!                                           ▼                     ▼
//!                                      failure response ──▶ ResponseHandler ──▶ relay
//! ```
//!
//! Requests are processed one at a time in arrival order. Responses are
//! handed to a separate delivery task so a slow relay never holds up the
//! next tool call.
//!
//! ```rust,no_run
//! use codap_relay_worker::tools::{handler_fn, ToolRegistry};
//! use codap_relay_worker::types::{ParameterSchema, ToolSchema};
//! use codap_relay_worker::worker::{BrowserWorker, BrowserWorkerConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> codap_relay_worker::Result<()> {
//! let registry = ToolRegistry::builder()
//!     .tool(
//!         ToolSchema::new("echo", "Echo the arguments")
//!             .with_param("text", ParameterSchema::string(), true),
//!         handler_fn(|args| async move { Ok(serde_json::Value::Object(args)) }),
//!     )
//!     .build()?;
//!
//! let worker = BrowserWorker::builder()
//!     .config(BrowserWorkerConfig::new("https://relay.example.com", "ABC123"))
//!     .registry(Arc::new(registry))
//!     .build()?;
//!
//! worker.start().await?;
//! // ... serve requests ...
//! worker.stop().await?;
//! # Ok(())
//! # }
//! ```

mod config;

pub use config::BrowserWorkerConfig;

use crate::connection::{ConnectionEvent, ConnectionEventKind, ConnectionManager};
use crate::events::{Event, EventBus, ListenerId};
use crate::executor::ToolExecutor;
use crate::parser::ToolRequestParser;
use crate::response::{DeliveryStatistics, ResponseHandler};
use crate::tools::ToolRegistry;
use crate::transport::{RelayEvent, RelayHttpClient, Transport};
use crate::types::{ConnectionStatus, ToolResponse};
use crate::{Error, ErrorContext, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolExecutionKind {
    /// The request parsed and its handler ran (successfully or not).
    Executed,
    /// The parser rejected the request before any handler ran.
    Rejected,
}

/// Outcome of one inbound request that produced a response.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolExecution {
    pub kind: ToolExecutionKind,
    pub request_id: String,
    pub tool: Option<String>,
    pub response: ToolResponse,
}

impl Event for ToolExecution {
    type Kind = ToolExecutionKind;

    fn kind(&self) -> ToolExecutionKind {
        self.kind
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatistics {
    pub requests_received: u64,
    pub requests_rejected: u64,
    pub requests_executed: u64,
    pub executor_busy: bool,
    pub executor_queue_size: usize,
    pub delivery: DeliveryStatistics,
}

#[derive(Default)]
struct WorkerCounters {
    received: AtomicU64,
    rejected: AtomicU64,
    executed: AtomicU64,
}

struct Pipeline {
    parser: ToolRequestParser,
    executor: ToolExecutor,
    responses: ResponseHandler,
    executions: EventBus<ToolExecution>,
    counters: WorkerCounters,
}

impl Pipeline {
    /// Parse and run one raw request. `None` when it was rejected without an
    /// id to answer to.
    async fn process(&self, raw: Value) -> Option<ToolResponse> {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        let execution = match self.parser.parse_request(&raw) {
            Ok(request) => {
                let request_id = request.id.clone();
                let tool = request.tool.clone();
                debug!(request_id = %request_id, tool = %tool, "executing tool request");
                let response = self.executor.execute(request).await;
                self.counters.executed.fetch_add(1, Ordering::Relaxed);
                info!(
                    request_id = %request_id,
                    tool = %tool,
                    success = response.is_success(),
                    duration_ms = response.duration_ms(),
                    "tool request completed"
                );
                ToolExecution {
                    kind: ToolExecutionKind::Executed,
                    request_id,
                    tool: Some(tool),
                    response,
                }
            }
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    code = %e.code,
                    request_id = ?e.request_id,
                    tool = ?e.tool,
                    error = %e.message,
                    "rejected tool request"
                );
                let response = e.to_response(started.elapsed().as_millis() as u64)?;
                ToolExecution {
                    kind: ToolExecutionKind::Rejected,
                    request_id: response.request_id().to_string(),
                    tool: e.tool.clone(),
                    response,
                }
            }
        };

        self.executions.emit(&execution);
        Some(execution.response)
    }
}

struct Run {
    cancel: CancellationToken,
    listener: ListenerId,
    intake: JoinHandle<()>,
    delivery: JoinHandle<()>,
}

pub struct BrowserWorker {
    config: BrowserWorkerConfig,
    connection: ConnectionManager,
    pipeline: Arc<Pipeline>,
    run: Mutex<Option<Run>>,
}

impl BrowserWorker {
    pub fn builder() -> BrowserWorkerBuilder {
        BrowserWorkerBuilder::default()
    }

    pub fn config(&self) -> &BrowserWorkerConfig {
        &self.config
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.pipeline.executor
    }

    pub fn parser(&self) -> &ToolRequestParser {
        &self.pipeline.parser
    }

    pub fn responses(&self) -> &ResponseHandler {
        &self.pipeline.responses
    }

    /// Start the processing pipeline and connect to the relay.
    ///
    /// Resolves once the connection is established. If it cannot be, the
    /// pipeline is torn down again and the connection error is returned.
    /// Calling `start` on a running worker just waits for the connection.
    pub async fn start(&self) -> Result<ConnectionStatus> {
        {
            let mut run = self.run.lock().await;
            if run.is_none() {
                if self.config.debug {
                    crate::logging::init_tracing(true);
                }
                info!(
                    session_code = %self.config.session_code,
                    relay = %self.config.relay_base_url,
                    "starting worker"
                );
                *run = Some(self.spawn_pipeline());
            }
        }

        match self.connection.connect().await {
            Ok(status) => Ok(status),
            Err(e) => {
                error!(kind = %e.kind, error = %e.message, "worker could not connect");
                if let Err(flush) = self.shutdown_pipeline().await {
                    warn!(error = %flush, "flushing responses after failed start");
                }
                Err(Error::Connection(e))
            }
        }
    }

    fn spawn_pipeline(&self) -> Run {
        let (requests_tx, mut requests_rx) = mpsc::unbounded_channel::<Value>();
        let listener = self
            .connection
            .add_event_listener(ConnectionEventKind::Message, move |ev| {
                if let ConnectionEvent::Message(RelayEvent::ToolRequest(raw)) = ev {
                    if requests_tx.send(raw.clone()).is_err() {
                        debug!("request intake closed; dropping request");
                    }
                }
            });

        let (responses_tx, mut responses_rx) = mpsc::unbounded_channel::<ToolResponse>();
        let cancel = CancellationToken::new();

        let pipeline = Arc::clone(&self.pipeline);
        let stop = cancel.clone();
        let intake = tokio::spawn(async move {
            loop {
                let raw = tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    next = requests_rx.recv() => match next {
                        Some(raw) => raw,
                        None => break,
                    },
                };
                if let Some(response) = pipeline.process(raw).await {
                    if responses_tx.send(response).is_err() {
                        break;
                    }
                }
            }
            debug!("request intake stopped");
        });

        let pipeline = Arc::clone(&self.pipeline);
        let delivery = tokio::spawn(async move {
            while let Some(response) = responses_rx.recv().await {
                let request_id = response.request_id().to_string();
                if let Err(e) = pipeline.responses.post_response(response).await {
                    error!(request_id = %request_id, error = %e, "response delivery failed");
                }
            }
            debug!("response delivery loop stopped");
        });

        Run {
            cancel,
            listener,
            intake,
            delivery,
        }
    }

    /// Stop accepting requests, let the in-flight one finish, and flush
    /// pending responses. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        self.connection.disconnect().await;
        self.shutdown_pipeline().await
    }

    async fn shutdown_pipeline(&self) -> Result<()> {
        let Some(run) = self.run.lock().await.take() else {
            return Ok(());
        };
        self.connection.remove_event_listener(run.listener);
        run.cancel.cancel();
        if let Err(e) = run.intake.await {
            warn!(error = %e, "request intake ended abnormally");
        }
        if let Err(e) = run.delivery.await {
            warn!(error = %e, "response delivery ended abnormally");
        }
        let flushed = self.pipeline.responses.flush().await;
        info!(session_code = %self.config.session_code, "worker stopped");
        flushed
    }

    pub async fn is_running(&self) -> bool {
        self.run.lock().await.is_some()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn on_status_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionStatus) + Send + Sync + 'static,
    {
        self.connection
            .add_event_listener(ConnectionEventKind::StatusChange, move |ev| {
                if let ConnectionEvent::StatusChange(status) = ev {
                    listener(status);
                }
            })
    }

    pub fn remove_status_listener(&self, id: ListenerId) -> bool {
        self.connection.remove_event_listener(id)
    }

    /// Called after every request that produced a response, executed or
    /// rejected.
    pub fn on_tool_execution<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ToolExecution) + Send + Sync + 'static,
    {
        self.pipeline.executions.subscribe_all(listener)
    }

    pub fn remove_execution_listener(&self, id: ListenerId) -> bool {
        self.pipeline.executions.unsubscribe(id)
    }

    pub async fn statistics(&self) -> WorkerStatistics {
        let c = &self.pipeline.counters;
        WorkerStatistics {
            requests_received: c.received.load(Ordering::Relaxed),
            requests_rejected: c.rejected.load(Ordering::Relaxed),
            requests_executed: c.executed.load(Ordering::Relaxed),
            executor_busy: self.pipeline.executor.is_busy(),
            executor_queue_size: self.pipeline.executor.queue_size(),
            delivery: self.pipeline.responses.get_statistics().await,
        }
    }
}

#[derive(Default)]
pub struct BrowserWorkerBuilder {
    config: Option<BrowserWorkerConfig>,
    registry: Option<Arc<ToolRegistry>>,
    client: Option<RelayHttpClient>,
    transports: Option<(Arc<dyn Transport>, Option<Arc<dyn Transport>>)>,
}

impl BrowserWorkerBuilder {
    /// Defaults to [`BrowserWorkerConfig::from_env`].
    pub fn config(mut self, config: BrowserWorkerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn registry(mut self, registry: Arc<ToolRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// HTTP client for the relay; built from `relay_base_url` otherwise.
    pub fn http_client(mut self, client: RelayHttpClient) -> Self {
        self.client = Some(client);
        self
    }

    /// Replace the stream/polling transports.
    pub fn transports(
        mut self,
        primary: Arc<dyn Transport>,
        fallback: Option<Arc<dyn Transport>>,
    ) -> Self {
        self.transports = Some((primary, fallback));
        self
    }

    pub fn build(self) -> Result<BrowserWorker> {
        let config = self.config.unwrap_or_else(BrowserWorkerConfig::from_env);
        config.validate()?;
        let registry = self.registry.ok_or_else(|| {
            Error::configuration_with_context(
                "a tool registry is required",
                ErrorContext::new()
                    .with_field_path("registry")
                    .with_source("browser_worker"),
            )
        })?;
        let client = match self.client {
            Some(c) => c,
            None => RelayHttpClient::new(&config.relay_base_url)?,
        };

        let connection_config = config.connection_config();
        let connection = match self.transports {
            Some((primary, fallback)) => {
                ConnectionManager::with_transports(connection_config, primary, fallback)
            }
            None => ConnectionManager::new(client.clone(), connection_config),
        };
        let pipeline = Pipeline {
            parser: ToolRequestParser::new(Arc::clone(&registry), config.parser.clone()),
            executor: ToolExecutor::new(registry).with_timeout(config.tool_timeout),
            responses: ResponseHandler::new(client, config.response.clone())?,
            executions: EventBus::new(),
            counters: WorkerCounters::default(),
        };

        Ok(BrowserWorker {
            config,
            connection,
            pipeline: Arc::new(pipeline),
            run: Mutex::new(None),
        })
    }
}
