use super::{RelayEvent, RelayHttpClient, Transport, TransportEvent};
use crate::types::{ConnectionError, TransportKind};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One server-sent event: `event:` name (if any) and joined `data:` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE frame decoder.
///
/// Bytes are buffered until a full line is available, so a multi-byte
/// character split across network chunks decodes intact. Frames end at a
/// blank line; `\n` and `\r\n` line endings are both accepted. Comment lines
/// (leading `:`) and `id:`/`retry:` fields are dropped. A line that is not
/// valid UTF-8 is skipped and kept for [`SseFrameDecoder::take_errors`].
#[derive(Debug, Default)]
pub struct SseFrameDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    errors: Vec<ConnectionError>,
}

impl SseFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some(idx) = self.buf[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + idx;
            let raw = self.buf[consumed..end].to_vec();
            consumed = end + 1;
            if let Some(frame) = self.raw_line(&raw) {
                frames.push(frame);
            }
        }
        self.buf.drain(..consumed);
        frames
    }

    /// Flush a final frame left without a trailing blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buf);
        if !rest.is_empty() {
            self.raw_line(&rest);
        }
        self.dispatch()
    }

    /// Lines dropped because they were not valid UTF-8.
    pub fn take_errors(&mut self) -> Vec<ConnectionError> {
        std::mem::take(&mut self.errors)
    }

    fn raw_line(&mut self, raw: &[u8]) -> Option<SseFrame> {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        match std::str::from_utf8(raw) {
            Ok(line) => {
                let line = line.to_string();
                self.line(&line)
            }
            Err(e) => {
                self.errors.push(ConnectionError::parsing(format!(
                    "stream line is not valid UTF-8: {}",
                    e
                )));
                None
            }
        }
    }

    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.find(':') {
            Some(i) => {
                let v = &line[i + 1..];
                (&line[..i], v.strip_prefix(' ').unwrap_or(v))
            }
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame { event, data })
    }
}

/// Push transport over the relay's server-sent event stream.
pub struct SseTransport {
    client: RelayHttpClient,
    session_code: String,
    inactivity_timeout: Duration,
}

impl SseTransport {
    pub fn new(
        client: RelayHttpClient,
        session_code: impl Into<String>,
        inactivity_timeout: Duration,
    ) -> Self {
        Self {
            client,
            session_code: session_code.into(),
            inactivity_timeout,
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn run(
        &self,
        events: UnboundedSender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ConnectionError> {
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            resp = self.client.open_stream(&self.session_code) => resp?,
        };
        tracing::debug!(session = %self.session_code, "event stream opened");
        if events.send(TransportEvent::Opened).is_err() {
            return Ok(());
        }

        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ConnectionError::from_reqwest(&e)));
        pump_frames(body, self.inactivity_timeout, &events, &cancel).await
    }
}

/// Decode `body` into relay events until it ends, fails or goes quiet.
///
/// Only complete frames count as activity: a body that keeps sending
/// comment lines but no event for `inactivity_timeout` is a dead channel.
pub(crate) async fn pump_frames<S, B>(
    body: S,
    inactivity_timeout: Duration,
    events: &UnboundedSender<TransportEvent>,
    cancel: &CancellationToken,
) -> Result<(), ConnectionError>
where
    S: Stream<Item = Result<B, ConnectionError>>,
    B: AsRef<[u8]>,
{
    tokio::pin!(body);
    let mut decoder = SseFrameDecoder::new();
    let mut deadline = Instant::now() + inactivity_timeout;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            next = tokio::time::timeout_at(deadline, body.next()) => next,
        };
        let frames = match next {
            Err(_) => {
                return Err(ConnectionError::timeout(format!(
                    "no events received for {} ms",
                    inactivity_timeout.as_millis()
                )))
            }
            Ok(None) => {
                if let Some(frame) = decoder.finish() {
                    dispatch_frame(events, frame)?;
                }
                return Err(ConnectionError::network("event stream closed by relay"));
            }
            Ok(Some(Err(e))) => return Err(e),
            Ok(Some(Ok(chunk))) => decoder.push(chunk.as_ref()),
        };
        for e in decoder.take_errors() {
            tracing::warn!(error = %e, "dropping undecodable stream line");
            let _ = events.send(TransportEvent::Warning(e));
        }
        if !frames.is_empty() {
            deadline = Instant::now() + inactivity_timeout;
        }
        for frame in frames {
            dispatch_frame(events, frame)?;
        }
    }
}

/// Forward one frame. Server `timeout` ends the stream; a frame that cannot
/// be decoded is reported and skipped.
fn dispatch_frame(
    events: &UnboundedSender<TransportEvent>,
    frame: SseFrame,
) -> Result<(), ConnectionError> {
    let event = match RelayEvent::from_frame(&frame) {
        Ok(Some(event)) => event,
        Ok(None) => return Ok(()),
        Err(e) => {
            tracing::warn!(event = ?frame.event, error = %e, "undecodable stream event");
            let _ = events.send(TransportEvent::Warning(e));
            return Ok(());
        }
    };
    if matches!(event, RelayEvent::Heartbeat) {
        tracing::trace!("heartbeat");
    }
    let closes = matches!(event, RelayEvent::Timeout);
    let _ = events.send(TransportEvent::Event(event));
    if closes {
        return Err(ConnectionError::timeout("relay ended the stream (timeout event)"));
    }
    Ok(())
}
