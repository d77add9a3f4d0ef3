//! 连接管理模块：维护到中继的通道，推送流优先，失败时回退到轮询。
//!
//! # Connection Module
//!
//! [`ConnectionManager`] owns the channel to the relay. It prefers the push
//! stream and falls back to polling when the stream cannot be established or
//! drops. Reconnection follows the backoff schedule, bounded by
//! `max_retries`; exceeding the bound moves the state machine to `error`.
//!
//! ```text
//! disconnected ──connect()──▶ connecting ──opened──▶ connected
//!                                  │                   │ drop
//!                                  │ retries exhausted ▼
//!                                  └──────▶ error ◀── reconnecting
//! any state ──disconnect()──▶ disconnected
//! ```
//!
//! Tool requests from every transport go through one [`RequestTracker`], so
//! a request redelivered across poll cycles or during a transport switch is
//! emitted once.

mod supervisor;

use crate::events::{Event, EventBus, ListenerId};
use crate::resilience::BackoffPolicy;
use crate::transport::{
    PollingTransport, RelayEvent, RelayHttpClient, RequestTracker, SseTransport, Transport,
    DEFAULT_MAX_TRACKED_IDS,
};
use crate::types::{ConnectionError, ConnectionState, ConnectionStatus, TransportKind};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub session_code: String,
    /// Push stream inactivity limit; heartbeats count as activity.
    pub sse_timeout: Duration,
    pub polling_interval: Duration,
    /// Failed reconnection attempts tolerated before entering `error`.
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    /// A transport that has not opened within this long counts as a failed
    /// `timeout` attempt.
    pub connect_timeout: Duration,
    pub prefer_sse: bool,
    pub fallback_to_polling: bool,
    pub max_tracked_ids: usize,
    pub poll_request_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            session_code: String::new(),
            sse_timeout: Duration::from_secs(60),
            polling_interval: Duration::from_millis(1000),
            max_retries: 5,
            backoff: BackoffPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            prefer_sse: true,
            fallback_to_polling: true,
            max_tracked_ids: DEFAULT_MAX_TRACKED_IDS,
            poll_request_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectionConfig {
    pub fn new(session_code: impl Into<String>) -> Self {
        Self {
            session_code: session_code.into(),
            ..Self::default()
        }
    }

    pub fn with_sse_timeout(mut self, d: Duration) -> Self {
        self.sse_timeout = d;
        self
    }

    pub fn with_polling_interval(mut self, d: Duration) -> Self {
        self.polling_interval = d;
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    pub fn with_prefer_sse(mut self, prefer: bool) -> Self {
        self.prefer_sse = prefer;
        self
    }

    pub fn with_fallback_to_polling(mut self, fallback: bool) -> Self {
        self.fallback_to_polling = fallback;
        self
    }

    pub fn with_max_tracked_ids(mut self, n: usize) -> Self {
        self.max_tracked_ids = n;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEventKind {
    Message,
    Error,
    StatusChange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Message(RelayEvent),
    Error(ConnectionError),
    StatusChange(ConnectionStatus),
}

impl Event for ConnectionEvent {
    type Kind = ConnectionEventKind;

    fn kind(&self) -> ConnectionEventKind {
        match self {
            ConnectionEvent::Message(_) => ConnectionEventKind::Message,
            ConnectionEvent::Error(_) => ConnectionEventKind::Error,
            ConnectionEvent::StatusChange(_) => ConnectionEventKind::StatusChange,
        }
    }
}

/// State shared between the manager handle and its supervisor task.
pub(crate) struct Shared {
    pub(crate) config: ConnectionConfig,
    pub(crate) primary: Arc<dyn Transport>,
    pub(crate) fallback: Option<Arc<dyn Transport>>,
    pub(crate) status: watch::Sender<ConnectionStatus>,
    pub(crate) events: EventBus<ConnectionEvent>,
    pub(crate) tracker: Arc<RequestTracker>,
}

impl Shared {
    /// Apply `f` to the status; emits `StatusChange` only if it changed.
    pub(crate) fn update_status(&self, f: impl FnOnce(&mut ConnectionStatus)) {
        let mut next = self.status.borrow().clone();
        f(&mut next);
        let changed = self.status.send_if_modified(|cur| {
            if *cur == next {
                false
            } else {
                *cur = next.clone();
                true
            }
        });
        if changed {
            tracing::info!(
                state = %next.state,
                transport = %next.transport,
                retry_count = next.retry_count,
                "connection state changed"
            );
            self.events.emit(&ConnectionEvent::StatusChange(next));
        }
    }
}

struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ConnectionManager {
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl ConnectionManager {
    /// Stream and polling transports over `client`.
    pub fn new(client: RelayHttpClient, config: ConnectionConfig) -> Self {
        let tracker = Arc::new(RequestTracker::new(config.max_tracked_ids));
        let sse: Arc<dyn Transport> = Arc::new(SseTransport::new(
            client.clone(),
            config.session_code.clone(),
            config.sse_timeout,
        ));
        let polling: Arc<dyn Transport> = Arc::new(
            PollingTransport::new(client, config.session_code.clone(), Arc::clone(&tracker))
                .with_interval(config.polling_interval)
                .with_request_timeout(config.poll_request_timeout),
        );
        let (primary, fallback) = if !config.prefer_sse {
            (polling, None)
        } else if config.fallback_to_polling {
            (sse, Some(polling))
        } else {
            (sse, None)
        };
        Self::from_parts(config, primary, fallback, tracker)
    }

    /// Use caller-supplied transports.
    pub fn with_transports(
        config: ConnectionConfig,
        primary: Arc<dyn Transport>,
        fallback: Option<Arc<dyn Transport>>,
    ) -> Self {
        let tracker = Arc::new(RequestTracker::new(config.max_tracked_ids));
        Self::from_parts(config, primary, fallback, tracker)
    }

    fn from_parts(
        config: ConnectionConfig,
        primary: Arc<dyn Transport>,
        fallback: Option<Arc<dyn Transport>>,
        tracker: Arc<RequestTracker>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::disconnected(primary.kind()));
        Self {
            shared: Arc::new(Shared {
                config,
                primary,
                fallback,
                status,
                events: EventBus::new(),
                tracker,
            }),
            session: Mutex::new(None),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    pub fn tracker(&self) -> &Arc<RequestTracker> {
        &self.shared.tracker
    }

    pub fn add_event_listener<F>(&self, kind: ConnectionEventKind, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(kind, listener)
    }

    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the supervisor (if not already running) and wait until the
    /// state machine settles on `connected` or `error`.
    pub async fn connect(&self) -> Result<ConnectionStatus, ConnectionError> {
        let mut rx = self.shared.status.subscribe();
        {
            let mut session = self.lock_session();
            let running = session.as_ref().map_or(false, |s| !s.handle.is_finished());
            if !running {
                self.shared.update_status(|s| {
                    s.state = ConnectionState::Connecting;
                    s.transport = self.shared.primary.kind();
                    s.error = None;
                    s.retry_count = 0;
                });
                let cancel = CancellationToken::new();
                let handle = tokio::spawn(supervisor::run(
                    Arc::clone(&self.shared),
                    cancel.clone(),
                ));
                *session = Some(Session { cancel, handle });
            }
        }

        let settled = rx
            .wait_for(|s| s.state.is_settled())
            .await
            .map(|s| s.clone())
            .map_err(|_| ConnectionError::network("connection manager dropped"))?;
        match settled.state {
            ConnectionState::Connected => Ok(settled),
            ConnectionState::Error => Err(settled
                .error
                .unwrap_or_else(|| ConnectionError::network("connection failed"))),
            _ => Err(ConnectionError::network(
                "disconnected before the connection was established",
            )),
        }
    }

    /// Tear down the active transport. Idempotent.
    pub async fn disconnect(&self) {
        let session = self.lock_session().take();
        if let Some(Session { cancel, handle }) = session {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "connection supervisor ended abnormally");
            }
        }
        if self.shared.status.borrow().state != ConnectionState::Disconnected {
            self.shared.update_status(|s| {
                s.state = ConnectionState::Disconnected;
                s.error = None;
                s.retry_count = 0;
            });
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.status.borrow().is_connected()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(session) = self.lock_session().take() {
            session.cancel.cancel();
        }
    }
}
