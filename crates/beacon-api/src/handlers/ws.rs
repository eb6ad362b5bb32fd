//! WebSocket upgrade handler.

use std::sync::Arc;

use axum::Extension;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, warn};

use beacon_realtime::{OutboundMessage, RealtimeEngine};

use crate::middleware::proxy::ClientInfo;
use crate::state::AppState;

/// How long the reader waits for the writer to flush a close frame.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Largest frame the transport buffers. Frames between `max_message_bytes`
/// and this cap are answered with an error frame; larger ones drop the
/// connection before being read in full.
pub fn frame_cap(max_message_bytes: usize) -> usize {
    max_message_bytes.saturating_mul(2).max(1024)
}

/// GET /ws: WebSocket upgrade
pub async fn ws_upgrade(
    State(state): State<AppState>,
    client: Option<Extension<ClientInfo>>,
    ws: WebSocketUpgrade,
) -> Response {
    let peer = client
        .and_then(|Extension(info)| info.ip)
        .map(|ip| ip.to_string());
    let cap = frame_cap(state.config.realtime.max_message_bytes);
    let engine = state.realtime.clone();
    ws.max_frame_size(cap)
        .max_message_size(cap)
        .on_upgrade(move |socket| handle_ws_connection(engine, peer, socket))
}

/// Drives one established WebSocket until either side goes away.
async fn handle_ws_connection(engine: Arc<RealtimeEngine>, peer: Option<String>, socket: WebSocket) {
    let (handle, mut outbound_rx, _guard) = engine.open_connection(peer);
    let conn_id = handle.id;
    let heartbeat = engine.heartbeat();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Outbound frames and keepalive pings.
    let writer_handle = handle.clone();
    let mut writer = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if heartbeat.is_expired(writer_handle.idle_for()) {
                        warn!(conn_id = %writer_handle.id, "Heartbeat timed out");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
                _ = writer_handle.closed() => break,
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let mut writer_done = false;
    loop {
        tokio::select! {
            _ = &mut writer => {
                writer_done = true;
                break;
            }
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle.touch();
                    engine.handle_inbound(conn_id, text.as_str()).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    handle.touch();
                    let frame = OutboundMessage::error(
                        "UNSUPPORTED_FRAME",
                        "Binary frames are not supported",
                    );
                    if let Ok(frame) = serde_json::to_string(&frame) {
                        let _ = handle.send(frame);
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => handle.touch(),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(conn_id = %conn_id, error = %e, "WebSocket transport error");
                    break;
                }
            }
        }
    }

    handle.begin_close();
    if !writer_done && tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
        writer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_cap_leaves_room_for_error_replies() {
        assert_eq!(frame_cap(65_536), 131_072);
        assert_eq!(frame_cap(10), 1024);
        assert_eq!(frame_cap(usize::MAX), usize::MAX);
    }
}
