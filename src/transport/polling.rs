use super::{RelayEvent, RelayHttpClient, RequestTracker, Transport, TransportEvent};
use crate::types::{ConnectionError, ConnectionErrorKind, ToolRequest, TransportKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_POLL_FAILURES: u32 = 3;

/// Pull transport: asks the relay for requests newer than the last one seen,
/// once per interval.
///
/// The first poll decides whether the channel opens. After that, isolated
/// failures are reported as warnings and the channel is only considered
/// dropped after `max_consecutive_failures` in a row, or on an
/// authentication failure.
pub struct PollingTransport {
    client: RelayHttpClient,
    session_code: String,
    interval: Duration,
    request_timeout: Duration,
    max_consecutive_failures: u32,
    tracker: Arc<RequestTracker>,
}

impl PollingTransport {
    pub fn new(
        client: RelayHttpClient,
        session_code: impl Into<String>,
        tracker: Arc<RequestTracker>,
    ) -> Self {
        Self {
            client,
            session_code: session_code.into(),
            interval: DEFAULT_POLLING_INTERVAL,
            request_timeout: Duration::from_secs(10),
            max_consecutive_failures: DEFAULT_MAX_POLL_FAILURES,
            tracker,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_consecutive_failures(mut self, n: u32) -> Self {
        self.max_consecutive_failures = n.max(1);
        self
    }
}

#[async_trait]
impl Transport for PollingTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Polling
    }

    async fn run(
        &self,
        events: UnboundedSender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ConnectionError> {
        let mut cursor = self.tracker.last_processed_id();
        let mut opened = false;
        let mut failures = 0u32;

        loop {
            let reply = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                r = self.client.poll(&self.session_code, cursor.as_deref(), self.request_timeout) => r,
            };

            match reply {
                Ok(reply) => {
                    failures = 0;
                    if !opened {
                        opened = true;
                        tracing::debug!(session = %self.session_code, "polling channel opened");
                        if events.send(TransportEvent::Opened).is_err() {
                            return Ok(());
                        }
                    }
                    let mut newest = None;
                    for raw in reply.requests {
                        if let Some(id) = ToolRequest::peek_id(&raw) {
                            newest = Some(id.to_string());
                        }
                        if events
                            .send(TransportEvent::Event(RelayEvent::ToolRequest(raw)))
                            .is_err()
                        {
                            return Ok(());
                        }
                    }
                    if let Some(last) = reply.last_request_id.or(newest) {
                        cursor = Some(last);
                    }
                }
                Err(e) if !opened => return Err(e),
                Err(e) if e.kind == ConnectionErrorKind::Authentication => return Err(e),
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        consecutive_failures = failures,
                        error = %e,
                        "poll failed"
                    );
                    if failures >= self.max_consecutive_failures {
                        return Err(e);
                    }
                    let _ = events.send(TransportEvent::Warning(e));
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
