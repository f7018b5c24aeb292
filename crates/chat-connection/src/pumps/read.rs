//! WebSocket read pump: forwards inbound frames to the driver.

use futures_util::StreamExt;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use neomind_protocol::constants::{WS_CLOSE_ABNORMAL, WS_CLOSE_NO_STATUS};

use crate::transport::{EventSender, ReadSettings, TransportEvent};

/// How a transport ended, as seen from the read side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CloseInfo {
    pub(crate) code: u16,
    pub(crate) reason: String,
}

impl CloseInfo {
    fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: WS_CLOSE_ABNORMAL,
            reason: reason.into(),
        }
    }
}

/// Reads frames until the connection ends.
///
/// Any inbound frame resets the idle deadline; the server pings every
/// 30 s, so prolonged silence means the connection is dead. Returns
/// `None` when cancelled by the owner, who already knows the transport
/// is gone.
pub(crate) async fn read_pump<S>(
    mut read: S,
    generation: u64,
    settings: ReadSettings,
    events: &EventSender,
    cancel: &CancellationToken,
    write_failed: &CancellationToken,
) -> Option<CloseInfo>
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let idle_deadline = tokio::time::sleep(settings.idle_timeout);
    tokio::pin!(idle_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,

            _ = write_failed.cancelled() => {
                return Some(CloseInfo::abnormal("write failed"));
            }

            () = &mut idle_deadline => {
                warn!(generation, "no traffic within idle timeout, dropping connection");
                return Some(CloseInfo::abnormal("idle timeout"));
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        idle_deadline
                            .as_mut()
                            .reset(tokio::time::Instant::now() + settings.idle_timeout);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                if text.len() > settings.max_message_size {
                                    warn!(
                                        generation,
                                        "message too large ({} bytes), dropping",
                                        text.len()
                                    );
                                    continue;
                                }
                                let _ = events
                                    .send((generation, TransportEvent::Text(text.as_str().to_owned())));
                            }
                            tungstenite::Message::Close(frame) => {
                                let info = match frame {
                                    Some(f) => CloseInfo {
                                        code: u16::from(f.code),
                                        reason: f.reason.as_str().to_owned(),
                                    },
                                    None => CloseInfo {
                                        code: WS_CLOSE_NO_STATUS,
                                        reason: String::new(),
                                    },
                                };
                                debug!(generation, code = info.code, "received close frame");
                                return Some(info);
                            }
                            tungstenite::Message::Ping(_) => trace!("received ping"),
                            tungstenite::Message::Pong(_) => trace!("received pong"),
                            _ => {} // Binary frames are not part of the chat protocol
                        }
                    }
                    Some(Err(e)) => {
                        warn!(generation, "WebSocket read error: {e}");
                        let _ = events.send((generation, TransportEvent::Error(e.to_string())));
                        return Some(CloseInfo::abnormal(e.to_string()));
                    }
                    None => {
                        debug!(generation, "WebSocket stream ended");
                        return Some(CloseInfo::abnormal("stream ended"));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures_util::stream;
    use tokio::sync::mpsc;
    use tungstenite::protocol::CloseFrame;
    use tungstenite::protocol::frame::coding::CloseCode;

    fn settings() -> ReadSettings {
        ReadSettings {
            idle_timeout: Duration::from_secs(75),
            max_message_size: 1024,
        }
    }

    type Frames = Vec<Result<tungstenite::Message, tungstenite::Error>>;

    async fn run(frames: Frames) -> (Option<CloseInfo>, Vec<(u64, TransportEvent)>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = read_pump(
            stream::iter(frames),
            7,
            settings(),
            &tx,
            &CancellationToken::new(),
            &CancellationToken::new(),
        )
        .await;
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        (outcome, events)
    }

    #[tokio::test]
    async fn forwards_text_with_generation() {
        let (outcome, events) = run(vec![
            Ok(tungstenite::Message::Text(r#"{"type":"system"}"#.into())),
            Ok(tungstenite::Message::Ping(vec![1].into())),
            Ok(tungstenite::Message::Text(r#"{"type":"end"}"#.into())),
        ])
        .await;

        assert_eq!(
            events,
            vec![
                (7, TransportEvent::Text(r#"{"type":"system"}"#.into())),
                (7, TransportEvent::Text(r#"{"type":"end"}"#.into())),
            ]
        );
        assert_eq!(outcome, Some(CloseInfo::abnormal("stream ended")));
    }

    #[tokio::test]
    async fn oversized_text_is_dropped() {
        let huge = "x".repeat(2048);
        let (_, events) = run(vec![Ok(tungstenite::Message::Text(huge.into()))]).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn close_frame_code_is_reported() {
        let (outcome, _) = run(vec![Ok(tungstenite::Message::Close(Some(CloseFrame {
            code: CloseCode::from(4001),
            reason: "rejected".into(),
        })))])
        .await;
        assert_eq!(
            outcome,
            Some(CloseInfo {
                code: 4001,
                reason: "rejected".into()
            })
        );
    }

    #[tokio::test]
    async fn close_without_frame_is_no_status() {
        let (outcome, _) = run(vec![Ok(tungstenite::Message::Close(None))]).await;
        assert_eq!(outcome.map(|c| c.code), Some(WS_CLOSE_NO_STATUS));
    }

    #[tokio::test]
    async fn read_error_reports_error_then_abnormal_close() {
        let (outcome, events) = run(vec![Err(tungstenite::Error::ConnectionClosed)]).await;
        assert!(matches!(events.as_slice(), [(7, TransportEvent::Error(_))]));
        assert_eq!(outcome.map(|c| c.code), Some(WS_CLOSE_ABNORMAL));
    }

    #[tokio::test]
    async fn cancel_returns_none() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = read_pump(
            stream::pending::<Result<tungstenite::Message, tungstenite::Error>>(),
            1,
            settings(),
            &tx,
            &cancel,
            &CancellationToken::new(),
        )
        .await;
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn write_failure_ends_read_side() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let failed = CancellationToken::new();
        failed.cancel();
        let outcome = read_pump(
            stream::pending::<Result<tungstenite::Message, tungstenite::Error>>(),
            1,
            settings(),
            &tx,
            &CancellationToken::new(),
            &failed,
        )
        .await;
        assert_eq!(outcome, Some(CloseInfo::abnormal("write failed")));
    }

    #[tokio::test]
    async fn idle_timeout_on_silence() {
        tokio::time::pause();
        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = read_pump(
            stream::pending::<Result<tungstenite::Message, tungstenite::Error>>(),
            1,
            settings(),
            &tx,
            &CancellationToken::new(),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(outcome, Some(CloseInfo::abnormal("idle timeout")));
    }

    #[tokio::test]
    async fn any_frame_resets_idle_deadline() {
        tokio::time::pause();
        let (tx, _rx) = mpsc::unbounded_channel();
        let idle = settings().idle_timeout;

        // One frame just before the deadline, then silence.
        let delayed = stream::once(async move {
            tokio::time::sleep(idle - Duration::from_secs(1)).await;
            Ok(tungstenite::Message::Text(r#"{"type":"ping"}"#.into()))
        });
        let frames = Box::pin(delayed.chain(stream::pending()));

        let started = tokio::time::Instant::now();
        let outcome = read_pump(
            frames,
            1,
            settings(),
            &tx,
            &CancellationToken::new(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome, Some(CloseInfo::abnormal("idle timeout")));
        assert!(started.elapsed() >= idle * 2 - Duration::from_secs(1));
    }
}
