//! Per-connection signaling state and request dispatch.
//!
//! A [`SignalingSession`] belongs to one WebSocket. Its connection id is both
//! the media peer id and the chat participant id. Requests are handled one at
//! a time, each under the configured request timeout.
//!
//! Failures come back as `error` frames and never end the session. An
//! `Internal` failure additionally tears down this connection's media peer,
//! leaving the rest of the room untouched.

use super::protocol::{parse_request, ClientRequest, ServerEvent, ServerMessage};
use super::sink::EventSink;
use crate::actors::{
    ActorType, ConsumeRequest, MailboxMonitor, ProduceRequest, RoomActorHandle, RoomRegistryHandle,
};
use crate::chat::ChatHub;
use crate::errors::SfuError;
use crate::observability::metrics as prom;
use common::types::ConnectionId;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Session timing.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Upper bound on handling one request.
    pub request_timeout: Duration,
    /// Delay after which a typing flag clears itself.
    pub typing_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            typing_timeout: Duration::from_secs(3),
        }
    }
}

/// Signaling state of one connection.
pub struct SignalingSession {
    connection_id: ConnectionId,
    peer_id: String,
    registry: RoomRegistryHandle,
    chat: ChatHub,
    events: EventSink,
    settings: SessionSettings,
    /// Media room this connection is joined to.
    room: Option<RoomActorHandle>,
    display_name: Option<String>,
    /// Chat rooms joined, with the pending typing reset if any.
    chat_rooms: HashMap<String, Option<AbortHandle>>,
    mailbox: MailboxMonitor,
}

fn to_data<T: Serialize>(value: T) -> Result<Value, SfuError> {
    serde_json::to_value(value)
        .map_err(|e| SfuError::Internal(format!("failed to encode response: {e}")))
}

fn not_in_room() -> SfuError {
    SfuError::NotFound("Not in a room".to_string())
}

impl SignalingSession {
    #[must_use]
    pub fn new(
        registry: RoomRegistryHandle,
        chat: ChatHub,
        events: EventSink,
        settings: SessionSettings,
    ) -> Self {
        let connection_id = ConnectionId::new();
        let peer_id = connection_id.to_string();
        Self {
            connection_id,
            mailbox: MailboxMonitor::new(ActorType::Session, peer_id.clone()),
            peer_id,
            registry,
            chat,
            events,
            settings,
            room: None,
            display_name: None,
            chat_rooms: HashMap::new(),
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Id of the room this connection is joined to, if any.
    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        self.room.as_ref().map(RoomActorHandle::room_id)
    }

    /// Handle one inbound text frame and produce the reply frame.
    pub async fn handle_text(&mut self, text: &str) -> ServerMessage {
        let envelope = match parse_request(text) {
            Ok(envelope) => envelope,
            Err((id, err)) => {
                debug!(
                    target: "sfu.signaling",
                    connection_id = %self.connection_id,
                    error = %err,
                    "Rejected malformed frame"
                );
                prom::record_signaling_message("invalid", err.error_type_label());
                return ServerMessage::error(id, &err);
            }
        };

        let message_type = envelope.request.type_label();
        let joining = matches!(envelope.request, ClientRequest::JoinRoom { .. });
        let request_timeout = self.settings.request_timeout;
        let started = Instant::now();
        self.mailbox.record_enqueue();

        let dispatch = self.dispatch(envelope.request);
        let result = match tokio::time::timeout(request_timeout, dispatch).await {
            Ok(result) => result,
            Err(_elapsed) => Err(SfuError::Timeout),
        };

        // A join that lands after its timeout would leave a peer the client
        // does not know about. Other room operations undo themselves once
        // their caller stops waiting.
        if joining && matches!(result, Err(SfuError::Timeout)) {
            self.leave_media_room().await;
        }

        self.mailbox.record_dequeue();
        prom::record_signaling_latency(message_type, started.elapsed());

        match result {
            Ok(data) => {
                prom::record_signaling_message(message_type, "success");
                ServerMessage::Response {
                    id: envelope.id,
                    data,
                }
            }
            Err(err) => {
                prom::record_signaling_message(message_type, err.error_type_label());
                if err.is_fatal() {
                    warn!(
                        target: "sfu.signaling",
                        connection_id = %self.connection_id,
                        message_type,
                        error = %err,
                        "Unexpected failure, tearing down media peer"
                    );
                    self.leave_media_room().await;
                } else {
                    debug!(
                        target: "sfu.signaling",
                        connection_id = %self.connection_id,
                        message_type,
                        error = %err,
                        "Request failed"
                    );
                }
                ServerMessage::error(Some(envelope.id), &err)
            }
        }
    }

    /// Track events that change session state.
    pub fn observe_event(&mut self, event: &ServerEvent) {
        if let ServerEvent::RoomClosed { room_id } = event {
            if self.room_id() == Some(room_id.as_str()) {
                info!(
                    target: "sfu.signaling",
                    connection_id = %self.connection_id,
                    room_id = %room_id,
                    "Room closed under this connection"
                );
                self.room = None;
            }
        }
    }

    fn current_room(&mut self) -> Result<&RoomActorHandle, SfuError> {
        if self.room.as_ref().is_some_and(RoomActorHandle::is_cancelled) {
            self.room = None;
        }
        self.room.as_ref().ok_or_else(not_in_room)
    }

    fn display_name(&self) -> String {
        self.display_name.clone().unwrap_or_else(|| {
            let short: String = self.peer_id.chars().take(8).collect();
            format!("Guest-{short}")
        })
    }

    async fn dispatch(&mut self, request: ClientRequest) -> Result<Value, SfuError> {
        let peer_id = self.peer_id.clone();

        match request {
            ClientRequest::JoinRoom { room_id, name } => {
                if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
                    self.display_name = Some(name.trim().to_string());
                }
                let (room, joined) = self
                    .registry
                    .join_room(room_id, peer_id, self.display_name(), self.events.clone())
                    .await?;
                info!(
                    target: "sfu.signaling",
                    connection_id = %self.connection_id,
                    room_id = %room.room_id(),
                    existing_peers = joined.peers.len(),
                    "Joined room"
                );
                self.room = Some(room);
                to_data(joined)
            }

            ClientRequest::LeaveRoom => {
                // The registry is asked even without a room: a timed-out join may
                // still have landed
                self.room = None;
                let left = self.registry.leave_room(peer_id).await?;
                Ok(json!({ "left": left }))
            }

            ClientRequest::RoomInfo => {
                let detail = self.current_room()?.get_state().await?;
                to_data(detail)
            }

            ClientRequest::GetRtpCapabilities { room_id } => {
                let rtp_capabilities = self.registry.create_room(room_id).await?;
                Ok(json!({ "rtp_capabilities": rtp_capabilities }))
            }

            ClientRequest::CreateTransport { direction } => {
                let options = self
                    .current_room()?
                    .create_transport(peer_id, direction)
                    .await?;
                to_data(options)
            }

            ClientRequest::ConnectTransport {
                transport_id,
                dtls_parameters,
            } => {
                self.current_room()?
                    .connect_transport(peer_id, transport_id.clone(), dtls_parameters)
                    .await?;
                Ok(json!({ "transport_id": transport_id, "connected": true }))
            }

            ClientRequest::CloseTransport { transport_id } => {
                self.current_room()?
                    .close_transport(peer_id, transport_id.clone())
                    .await?;
                Ok(json!({ "transport_id": transport_id, "closed": true }))
            }

            ClientRequest::Produce {
                transport_id,
                kind,
                rtp_parameters,
                source,
            } => {
                let produced = self
                    .current_room()?
                    .produce(
                        peer_id,
                        ProduceRequest {
                            transport_id,
                            kind,
                            rtp_parameters,
                            source,
                        },
                    )
                    .await?;
                to_data(produced)
            }

            ClientRequest::Consume {
                transport_id,
                producer_id,
                rtp_capabilities,
            } => {
                let consumed = self
                    .current_room()?
                    .consume(
                        peer_id,
                        ConsumeRequest {
                            transport_id,
                            producer_id,
                            rtp_capabilities,
                        },
                    )
                    .await?;
                to_data(consumed)
            }

            ClientRequest::PauseProducer { producer_id } => {
                self.current_room()?
                    .pause_producer(peer_id, producer_id.clone())
                    .await?;
                Ok(json!({ "producer_id": producer_id, "paused": true }))
            }

            ClientRequest::ResumeProducer { producer_id } => {
                self.current_room()?
                    .resume_producer(peer_id, producer_id.clone())
                    .await?;
                Ok(json!({ "producer_id": producer_id, "paused": false }))
            }

            ClientRequest::PauseConsumer { consumer_id } => {
                self.current_room()?
                    .pause_consumer(peer_id, consumer_id.clone())
                    .await?;
                Ok(json!({ "consumer_id": consumer_id, "paused": true }))
            }

            ClientRequest::ResumeConsumer { consumer_id } => {
                self.current_room()?
                    .resume_consumer(peer_id, consumer_id.clone())
                    .await?;
                Ok(json!({ "consumer_id": consumer_id, "paused": false }))
            }

            ClientRequest::CloseProducer { producer_id } => {
                self.current_room()?
                    .close_producer(peer_id, producer_id.clone())
                    .await?;
                Ok(json!({ "producer_id": producer_id, "closed": true }))
            }

            ClientRequest::CloseConsumer { consumer_id } => {
                self.current_room()?
                    .close_consumer(peer_id, consumer_id.clone())
                    .await?;
                Ok(json!({ "consumer_id": consumer_id, "closed": true }))
            }

            ClientRequest::ChatJoin { room_id, name } => {
                let name = name
                    .filter(|n| !n.trim().is_empty())
                    .map_or_else(|| self.display_name(), |n| n.trim().to_string());
                let joined = self
                    .chat
                    .join(&room_id, &peer_id, &name, self.events.clone());
                self.chat_rooms.entry(room_id).or_insert(None);
                to_data(joined)
            }

            ClientRequest::ChatLeave { room_id } => {
                self.cancel_typing_reset(&room_id);
                self.chat_rooms.remove(&room_id);
                let left = self.chat.leave(&room_id, &peer_id);
                Ok(json!({ "room_id": room_id, "left": left }))
            }

            ClientRequest::ChatSend {
                room_id,
                content,
                message_type,
                metadata,
            } => {
                let message = self
                    .chat
                    .send(&room_id, &peer_id, &content, message_type, metadata)?;
                // Sending ends typing
                self.cancel_typing_reset(&room_id);
                let _ = self.chat.set_typing(&room_id, &peer_id, false);
                to_data(message)
            }

            ClientRequest::ChatEdit {
                room_id,
                message_id,
                content,
            } => {
                let message = self.chat.edit(&room_id, &message_id, &peer_id, &content)?;
                to_data(message)
            }

            ClientRequest::ChatDelete {
                room_id,
                message_id,
            } => {
                self.chat.delete(&room_id, &message_id, &peer_id)?;
                Ok(json!({ "room_id": room_id, "message_id": message_id, "deleted": true }))
            }

            ClientRequest::ChatTyping { room_id, is_typing } => {
                self.chat.set_typing(&room_id, &peer_id, is_typing)?;
                self.cancel_typing_reset(&room_id);
                if is_typing {
                    self.schedule_typing_reset(room_id.clone());
                }
                Ok(json!({ "room_id": room_id, "is_typing": is_typing }))
            }

            ClientRequest::ChatHistory { room_id, query } => {
                let page = self.chat.history(&room_id, &query.unwrap_or_default());
                to_data(page)
            }
        }
    }

    /// Clear this connection's typing flag after the typing timeout.
    fn schedule_typing_reset(&mut self, room_id: String) {
        let chat = self.chat.clone();
        let peer_id = self.peer_id.clone();
        let delay = self.settings.typing_timeout;
        let task_room = room_id.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The participant may have left in the meantime
            let _ = chat.set_typing(&task_room, &peer_id, false);
        });
        self.chat_rooms.insert(room_id, Some(task.abort_handle()));
    }

    fn cancel_typing_reset(&mut self, room_id: &str) {
        if let Some(Some(timer)) = self.chat_rooms.get_mut(room_id).map(Option::take) {
            timer.abort();
        }
    }

    async fn leave_media_room(&mut self) {
        self.room = None;
        if let Err(e) = self.registry.leave_room(self.peer_id.clone()).await {
            warn!(
                target: "sfu.signaling",
                connection_id = %self.connection_id,
                error = %e,
                "Failed to leave media room"
            );
        }
    }

    /// Tear down everything this connection holds. Called once on disconnect.
    pub async fn close(&mut self) {
        let chat_rooms: Vec<(String, Option<AbortHandle>)> = self.chat_rooms.drain().collect();
        for (room_id, timer) in chat_rooms {
            if let Some(timer) = timer {
                timer.abort();
            }
            self.chat.leave(&room_id, &self.peer_id);
        }

        self.leave_media_room().await;

        info!(
            target: "sfu.signaling",
            connection_id = %self.connection_id,
            requests = self.mailbox.messages_processed(),
            peak_pending = self.mailbox.peak_depth(),
            "Session closed"
        );
    }
}
