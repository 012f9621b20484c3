//! Per-connection event queue.
//!
//! Rooms and chat push notifications into an [`EventSink`] without waiting.
//! The queue is bounded: when a connection stops draining it, the sink marks
//! the connection overflowed and drops further events. The WebSocket loop
//! watches for that and disconnects, which tears the peer down like any other
//! disconnect.

use super::protocol::ServerEvent;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Events buffered per connection before it is considered stalled.
pub const EVENT_CHANNEL_BUFFER: usize = 200;

/// Sending half, held by rooms and chat subscriptions.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::Sender<ServerEvent>,
    overflow: CancellationToken,
}

/// Receiving half, drained by the connection.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::Receiver<ServerEvent>,
    overflow: CancellationToken,
}

/// Create a sink with the default buffer.
#[must_use]
pub fn event_channel() -> (EventSink, EventStream) {
    EventSink::with_capacity(EVENT_CHANNEL_BUFFER)
}

impl EventSink {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> (EventSink, EventStream) {
        let (sender, receiver) = mpsc::channel(capacity);
        let overflow = CancellationToken::new();
        (
            EventSink {
                sender,
                overflow: overflow.clone(),
            },
            EventStream { receiver, overflow },
        )
    }

    /// Queue `event` without waiting. Returns `false` if it was dropped.
    pub fn send(&self, event: ServerEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                if !self.overflow.is_cancelled() {
                    warn!(
                        target: "sfu.signaling",
                        capacity = self.sender.max_capacity(),
                        "Event queue full, disconnecting slow connection"
                    );
                    self.overflow.cancel();
                }
                false
            }
            // The connection is going away and will leave
            Err(TrySendError::Closed(_)) => false,
        }
    }

    #[must_use]
    pub fn is_overflowed(&self) -> bool {
        self.overflow.is_cancelled()
    }
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<ServerEvent, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Token cancelled once the queue has overflowed.
    #[must_use]
    pub fn overflow_token(&self) -> CancellationToken {
        self.overflow.clone()
    }
}
