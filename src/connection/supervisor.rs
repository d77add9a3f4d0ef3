//! Reconnection loop driving one transport at a time.

use super::{ConnectionEvent, Shared};
use crate::transport::{RelayEvent, Transport, TransportEvent};
use crate::types::{ConnectionError, ConnectionErrorKind, ConnectionState, ToolRequest};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How one transport run ended.
enum RunOutcome {
    Cancelled,
    Failed { error: ConnectionError, opened: bool },
}

pub(super) async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut transport = Arc::clone(&shared.primary);
    let mut on_fallback = false;
    let mut ever_connected = false;
    let mut failures: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return;
        }
        let kind = transport.kind();
        shared.update_status(|s| s.transport = kind);
        tracing::debug!(transport = %kind, attempt = failures, "opening transport");

        let (error, opened) = match run_once(&shared, transport.as_ref(), &cancel).await {
            RunOutcome::Cancelled => return,
            RunOutcome::Failed { error, opened } => (error, opened),
        };
        if opened {
            ever_connected = true;
            failures = 0;
        }
        shared.events.emit(&ConnectionEvent::Error(error.clone()));

        if error.kind == ConnectionErrorKind::Authentication {
            tracing::error!(transport = %kind, error = %error, "relay rejected the session");
            enter_error(&shared, error, failures);
            return;
        }

        if !on_fallback {
            if let Some(fallback) = shared.fallback.as_ref() {
                tracing::warn!(
                    from = %kind,
                    to = %fallback.kind(),
                    error = %error,
                    "falling back to polling"
                );
                transport = Arc::clone(fallback);
                on_fallback = true;
                if ever_connected {
                    shared.update_status(|s| {
                        s.state = ConnectionState::Reconnecting;
                        s.error = Some(error.clone());
                    });
                }
                continue;
            }
        }

        failures += 1;
        if failures > shared.config.max_retries {
            tracing::error!(
                transport = %kind,
                retries = shared.config.max_retries,
                error = %error,
                "giving up on relay connection"
            );
            enter_error(&shared, error, shared.config.max_retries);
            return;
        }

        let delay = shared.config.backoff.delay(failures - 1);
        tracing::warn!(
            transport = %kind,
            attempt = failures,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "relay connection failed; retrying"
        );
        shared.update_status(|s| {
            s.state = if ever_connected {
                ConnectionState::Reconnecting
            } else {
                ConnectionState::Connecting
            };
            s.retry_count = failures;
            s.error = Some(error.clone());
        });

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn enter_error(shared: &Shared, error: ConnectionError, retry_count: u32) {
    shared.update_status(|s| {
        s.state = ConnectionState::Error;
        s.retry_count = retry_count;
        s.error = Some(error);
    });
}

/// Drive one transport until it stops, forwarding its events.
async fn run_once(shared: &Shared, transport: &dyn Transport, cancel: &CancellationToken) -> RunOutcome {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let child = cancel.child_token();
    let run = transport.run(tx, child.clone());
    tokio::pin!(run);
    let deadline = tokio::time::sleep(shared.config.connect_timeout);
    tokio::pin!(deadline);

    let mut opened = false;
    let mut rx_open = true;
    let result = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                child.cancel();
                return RunOutcome::Cancelled;
            }
            ev = rx.recv(), if rx_open => match ev {
                Some(ev) => on_transport_event(shared, ev, &mut opened),
                None => rx_open = false,
            },
            res = &mut run => break res,
            _ = &mut deadline, if !opened => {
                child.cancel();
                break Err(ConnectionError::timeout(format!(
                    "{} channel did not open within {} ms",
                    transport.kind(),
                    shared.config.connect_timeout.as_millis()
                )));
            }
        }
    };

    while let Ok(ev) = rx.try_recv() {
        on_transport_event(shared, ev, &mut opened);
    }
    if cancel.is_cancelled() {
        return RunOutcome::Cancelled;
    }
    let error = match result {
        Err(e) => e,
        Ok(()) => ConnectionError::network(format!("{} channel closed", transport.kind())),
    };
    RunOutcome::Failed { error, opened }
}

fn on_transport_event(shared: &Shared, ev: TransportEvent, opened: &mut bool) {
    match ev {
        TransportEvent::Opened => {
            *opened = true;
            shared.update_status(|s| {
                s.state = ConnectionState::Connected;
                s.last_connected = Some(chrono::Utc::now());
                s.error = None;
                s.retry_count = 0;
            });
        }
        TransportEvent::Warning(e) => {
            shared.events.emit(&ConnectionEvent::Error(e));
        }
        TransportEvent::Event(event) => on_relay_event(shared, event),
    }
}

fn on_relay_event(shared: &Shared, event: RelayEvent) {
    match &event {
        RelayEvent::ToolRequest(raw) => {
            if let Some(id) = ToolRequest::peek_id(raw) {
                if !shared.tracker.record(id) {
                    tracing::debug!(request_id = id, "dropping duplicate tool request");
                    return;
                }
            }
        }
        RelayEvent::Connected { code, message } => {
            tracing::info!(code = ?code, message = ?message, "relay acknowledged session");
        }
        RelayEvent::Heartbeat => tracing::trace!("relay heartbeat"),
        RelayEvent::ServerError { error, message } => {
            tracing::warn!(error = %error, message = %message, "relay reported an error");
            shared
                .events
                .emit(&ConnectionEvent::Error(ConnectionError::server(format!(
                    "{}: {}",
                    error, message
                ))));
        }
        RelayEvent::Timeout => tracing::debug!("relay stream timeout event"),
    }
    shared.events.emit(&ConnectionEvent::Message(event));
}
