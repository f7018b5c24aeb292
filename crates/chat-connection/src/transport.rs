//! A single WebSocket connection attempt and its I/O tasks.
//!
//! [`Transport::open`] returns immediately; the handshake, read pump and
//! write pump run in a spawned task that reports back to the driver with
//! events tagged by the transport's generation. The driver ignores events
//! whose generation is not the live one, so a retired transport can never
//! affect the connection.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use neomind_protocol::constants::WS_CLOSE_ABNORMAL;

use crate::pumps::read::read_pump;
use crate::pumps::write::write_pump;

/// What a transport reports to the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TransportEvent {
    Opened,
    Text(String),
    Error(String),
    Closed { code: u16, reason: String },
}

/// Smallest hard limit handed to tungstenite.
const TRANSPORT_LIMIT_FLOOR: usize = 1024 * 1024;

/// Hard frame limit for the socket itself. Frames between the read limit
/// and this one are read and then dropped by the read pump; only frames
/// above it fail the connection.
fn transport_limit(max_message_size: usize) -> usize {
    max_message_size
        .saturating_mul(4)
        .max(TRANSPORT_LIMIT_FLOOR)
}

pub(crate) type EventSender = mpsc::UnboundedSender<(u64, TransportEvent)>;

/// Limits applied on the read side.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReadSettings {
    pub(crate) idle_timeout: Duration,
    pub(crate) max_message_size: usize,
}

/// Handle to one connection attempt.
pub(crate) struct Transport {
    generation: u64,
    token: String,
    open: bool,
    write_tx: mpsc::UnboundedSender<tungstenite::Message>,
    cancel: CancellationToken,
    _task: tokio::task::JoinHandle<()>,
}

impl Transport {
    /// Starts connecting to `url`. Progress is reported on `events`.
    pub(crate) fn open(
        url: Url,
        token: String,
        generation: u64,
        settings: ReadSettings,
        events: EventSender,
    ) -> Self {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(
            url,
            generation,
            settings,
            write_rx,
            events,
            cancel.clone(),
        ));
        Self {
            generation,
            token,
            open: false,
            write_tx,
            cancel,
            _task: task,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn mark_open(&mut self) {
        self.open = true;
    }

    /// Queues a text frame. Hands the text back if the I/O task is gone.
    pub(crate) fn send_text(&self, text: String) -> Result<(), String> {
        if self.write_tx.is_closed() {
            return Err(text);
        }
        self.write_tx
            .send(tungstenite::Message::Text(text.into()))
            .map_err(|e| match e.0 {
                tungstenite::Message::Text(t) => t.as_str().to_owned(),
                _ => String::new(),
            })
    }

    /// Sends a close frame with `code` and stops the I/O tasks. No
    /// further events are reported for this generation.
    pub(crate) fn close(&self, code: u16, reason: &str) {
        if self.open {
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            };
            let _ = self.write_tx.send(tungstenite::Message::Close(Some(frame)));
        }
        self.cancel.cancel();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // Not aborted: the write pump still flushes a queued close frame.
        self.cancel.cancel();
    }
}

async fn run(
    url: Url,
    generation: u64,
    settings: ReadSettings,
    write_rx: mpsc::UnboundedReceiver<tungstenite::Message>,
    events: EventSender,
    cancel: CancellationToken,
) {
    let limit = transport_limit(settings.max_message_size);
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(limit);
    ws_config.max_frame_size = Some(limit);

    debug!(generation, host = ?url.host_str(), "opening transport");
    let connect =
        tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config), false);

    let ws_stream = tokio::select! {
        _ = cancel.cancelled() => {
            debug!(generation, "connect cancelled");
            return;
        }
        result = connect => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                warn!(generation, error = %e, "connect failed");
                let _ = events.send((generation, TransportEvent::Error(e.to_string())));
                let _ = events.send((
                    generation,
                    TransportEvent::Closed {
                        code: WS_CLOSE_ABNORMAL,
                        reason: e.to_string(),
                    },
                ));
                return;
            }
        }
    };

    info!(generation, "transport open");
    if events.send((generation, TransportEvent::Opened)).is_err() {
        return;
    }

    let (write, read) = ws_stream.split();
    let write_failed = CancellationToken::new();
    let writer = tokio::spawn(write_pump(
        write,
        write_rx,
        cancel.clone(),
        write_failed.clone(),
    ));

    let outcome = read_pump(read, generation, settings, &events, &cancel, &write_failed).await;

    cancel.cancel();
    let _ = writer.await;

    if let Some(close) = outcome {
        debug!(generation, code = close.code, reason = %close.reason, "transport closed");
        let _ = events.send((
            generation,
            TransportEvent::Closed {
                code: close.code,
                reason: close.reason,
            },
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use neomind_protocol::constants::WS_MAX_MESSAGE_SIZE;

    #[test]
    fn socket_limit_exceeds_read_limit() {
        assert_eq!(transport_limit(1024), TRANSPORT_LIMIT_FLOOR);
        assert_eq!(transport_limit(WS_MAX_MESSAGE_SIZE), 4 * WS_MAX_MESSAGE_SIZE);
        assert_eq!(transport_limit(usize::MAX), usize::MAX);
        for max in [1, 1024, WS_MAX_MESSAGE_SIZE] {
            assert!(transport_limit(max) > max);
        }
    }
}
