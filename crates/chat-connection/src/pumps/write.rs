//! WebSocket write pump: serialises outbound frames.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

/// Writes frames to the WebSocket in the order they were queued.
///
/// Queued frames win over cancellation, so a close frame queued right
/// before the transport is cancelled still goes out. A failed write
/// cancels `failed` so the read side can report the drop.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::UnboundedReceiver<tungstenite::Message>,
    cancel: CancellationToken,
    failed: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            msg = write_rx.recv() => {
                match msg {
                    Some(m) => {
                        let closing = m.is_close();
                        if let Err(e) = write.send(m).await {
                            error!("WebSocket write error: {e}");
                            failed.cancel();
                            return;
                        }
                        if closing {
                            trace!("close frame sent");
                            return;
                        }
                    }
                    None => break,
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}
