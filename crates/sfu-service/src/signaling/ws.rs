//! WebSocket transport for signaling.
//!
//! One socket, one [`SignalingSession`]. The loop multiplexes inbound frames
//! with the session's event sink, so notifications are written to the socket
//! in the order the room produced them. A connection whose event queue
//! overflows is closed.

use super::protocol::ServerMessage;
use super::session::SignalingSession;
use super::sink::event_channel;
use crate::errors::SfuError;
use crate::observability::metrics as prom;
use crate::routes::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// `GET /ws`
pub async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[instrument(skip_all, name = "sfu.signaling.connection")]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (events_tx, mut events_rx) = event_channel();
    let overflow = events_rx.overflow_token();
    let mut session = SignalingSession::new(
        state.registry.clone(),
        state.chat.clone(),
        events_tx,
        state.session_settings,
    );

    let connections = state.connections.fetch_add(1, Ordering::Relaxed) + 1;
    prom::set_signaling_connections(connections);
    info!(
        target: "sfu.signaling",
        connection_id = %session.connection_id(),
        connections,
        "Signaling connection opened"
    );

    loop {
        tokio::select! {
            () = overflow.cancelled() => {
                warn!(
                    target: "sfu.signaling",
                    connection_id = %session.connection_id(),
                    "Connection fell behind on events, closing"
                );
                break;
            }

            frame = ws_rx.next() => {
                let reply = match frame {
                    Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
                    Some(Ok(Message::Binary(_))) => ServerMessage::error(
                        None,
                        &SfuError::BadRequest("Binary frames are not supported".to_string()),
                    ),
                    // Pings are answered by axum
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(
                            target: "sfu.signaling",
                            connection_id = %session.connection_id(),
                            error = %e,
                            "WebSocket read failed"
                        );
                        break;
                    }
                };
                if !write_frame(&mut ws_tx, &reply, &overflow).await {
                    break;
                }
            }

            // The session holds the sender, so this never yields None
            Some(event) = events_rx.recv() => {
                session.observe_event(&event);
                let frame = ServerMessage::Event(event);
                if !write_frame(&mut ws_tx, &frame, &overflow).await {
                    break;
                }
            }
        }
    }

    session.close().await;

    let connections = state
        .connections
        .fetch_sub(1, Ordering::Relaxed)
        .saturating_sub(1);
    prom::set_signaling_connections(connections);
    info!(
        target: "sfu.signaling",
        connection_id = %session.connection_id(),
        connections,
        "Signaling connection closed"
    );
}

/// Write one frame unless the connection overflows first. Returns `false`
/// when the connection should close.
async fn write_frame(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    frame: &ServerMessage,
    overflow: &CancellationToken,
) -> bool {
    tokio::select! {
        result = send_frame(ws_tx, frame) => result.is_ok(),
        () = overflow.cancelled() => false,
    }
}

async fn send_frame(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    frame: &ServerMessage,
) -> Result<(), axum::Error> {
    match frame.to_text() {
        Ok(text) => ws_tx.send(Message::Text(text)).await,
        Err(e) => {
            warn!(target: "sfu.signaling", error = %e, "Dropping unencodable frame");
            Ok(())
        }
    }
}
