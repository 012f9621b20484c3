//! Signaling wire format.
//!
//! Frames are JSON text. Field names are `snake_case`; request, response and
//! event type tags are `kebab-case`.
//!
//! ```text
//! client -> server   { "id": 7, "type": "produce", "transport_id": "...", ... }
//! server -> client   { "type": "response", "id": 7, "data": { ... } }
//!                    { "type": "error", "id": 7, "error": { "code": "NOT_FOUND", "message": "..." } }
//!                    { "type": "event", "event": "new-producer-available", ... }
//! ```

use crate::engine::{DtlsParameters, RtpCapabilities, RtpParameters};
use crate::errors::{ErrorBody, SfuError};
use chat_store::{ChatMessage, MessageMetadata, MessageQuery, MessageType};
use common::types::{MediaKind, MediaSource, TransportDirection};
use serde::{Deserialize, Serialize};
/// Client request with its correlation id.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEnvelope {
    pub id: u64,
    #[serde(flatten)]
    pub request: ClientRequest,
}

/// Requests a client can send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientRequest {
    JoinRoom {
        room_id: String,
        #[serde(default)]
        name: Option<String>,
    },
    LeaveRoom,
    RoomInfo,
    GetRtpCapabilities {
        room_id: String,
    },
    CreateTransport {
        direction: TransportDirection,
    },
    ConnectTransport {
        transport_id: String,
        dtls_parameters: DtlsParameters,
    },
    CloseTransport {
        transport_id: String,
    },
    Produce {
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        #[serde(default)]
        source: Option<MediaSource>,
    },
    Consume {
        transport_id: String,
        producer_id: String,
        rtp_capabilities: RtpCapabilities,
    },
    PauseProducer {
        producer_id: String,
    },
    ResumeProducer {
        producer_id: String,
    },
    PauseConsumer {
        consumer_id: String,
    },
    ResumeConsumer {
        consumer_id: String,
    },
    CloseProducer {
        producer_id: String,
    },
    CloseConsumer {
        consumer_id: String,
    },
    ChatJoin {
        room_id: String,
        #[serde(default)]
        name: Option<String>,
    },
    ChatLeave {
        room_id: String,
    },
    ChatSend {
        room_id: String,
        content: String,
        #[serde(default)]
        message_type: MessageType,
        #[serde(default)]
        metadata: Option<MessageMetadata>,
    },
    ChatEdit {
        room_id: String,
        message_id: String,
        content: String,
    },
    ChatDelete {
        room_id: String,
        message_id: String,
    },
    ChatTyping {
        room_id: String,
        is_typing: bool,
    },
    ChatHistory {
        room_id: String,
        #[serde(default)]
        query: Option<MessageQuery>,
    },
}

impl ClientRequest {
    /// Bounded label for logs and metrics.
    #[must_use]
    pub fn type_label(&self) -> &'static str {
        match self {
            ClientRequest::JoinRoom { .. } => "join-room",
            ClientRequest::LeaveRoom => "leave-room",
            ClientRequest::RoomInfo => "room-info",
            ClientRequest::GetRtpCapabilities { .. } => "get-rtp-capabilities",
            ClientRequest::CreateTransport { .. } => "create-transport",
            ClientRequest::ConnectTransport { .. } => "connect-transport",
            ClientRequest::CloseTransport { .. } => "close-transport",
            ClientRequest::Produce { .. } => "produce",
            ClientRequest::Consume { .. } => "consume",
            ClientRequest::PauseProducer { .. } => "pause-producer",
            ClientRequest::ResumeProducer { .. } => "resume-producer",
            ClientRequest::PauseConsumer { .. } => "pause-consumer",
            ClientRequest::ResumeConsumer { .. } => "resume-consumer",
            ClientRequest::CloseProducer { .. } => "close-producer",
            ClientRequest::CloseConsumer { .. } => "close-consumer",
            ClientRequest::ChatJoin { .. } => "chat-join",
            ClientRequest::ChatLeave { .. } => "chat-leave",
            ClientRequest::ChatSend { .. } => "chat-send",
            ClientRequest::ChatEdit { .. } => "chat-edit",
            ClientRequest::ChatDelete { .. } => "chat-delete",
            ClientRequest::ChatTyping { .. } => "chat-typing",
            ClientRequest::ChatHistory { .. } => "chat-history",
        }
    }
}

/// Notifications pushed to a peer outside request/response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    NewProducerAvailable {
        producer_id: String,
        peer_id: String,
        kind: MediaKind,
        source: MediaSource,
    },
    ProducerClosed {
        producer_id: String,
        peer_id: String,
    },
    ProducerPaused {
        producer_id: String,
    },
    ProducerResumed {
        producer_id: String,
    },
    ConsumerClosed {
        consumer_id: String,
        producer_id: String,
    },
    PeerJoined {
        peer_id: String,
        name: String,
    },
    PeerLeft {
        peer_id: String,
    },
    /// The room was force-deleted; the peer is no longer in it.
    RoomClosed {
        room_id: String,
    },
    ChatMessage {
        message: ChatMessage,
    },
    ChatMessageEdited {
        message: ChatMessage,
    },
    ChatMessageDeleted {
        room_id: String,
        message_id: String,
    },
    ChatSystemMessage {
        message: ChatMessage,
    },
    ChatTypingState {
        room_id: String,
        participant_id: String,
        name: String,
        is_typing: bool,
    },
}

/// Every frame the server sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Response {
        id: u64,
        data: serde_json::Value,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        error: ErrorBody,
    },
    Event(ServerEvent),
}

impl ServerMessage {
    #[must_use]
    pub fn error(id: Option<u64>, err: &SfuError) -> Self {
        ServerMessage::Error {
            id,
            error: ErrorBody::from(err),
        }
    }

    /// Serialize to a text frame.
    ///
    /// # Errors
    ///
    /// `Internal` if serialization fails.
    pub fn to_text(&self) -> Result<String, SfuError> {
        serde_json::to_string(self)
            .map_err(|e| SfuError::Internal(format!("failed to encode frame: {e}")))
    }
}

/// Decode an inbound frame.
///
/// On failure the request id is still returned when the frame carried one, so
/// the error can be correlated.
///
/// # Errors
///
/// `BadRequest` for invalid JSON, a missing id or an unknown request type.
pub fn parse_request(text: &str) -> Result<ClientEnvelope, (Option<u64>, SfuError)> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| (None, SfuError::BadRequest(format!("Invalid JSON: {e}"))))?;
    let id = value.get("id").and_then(serde_json::Value::as_u64);

    serde_json::from_value(value)
        .map_err(|e| (id, SfuError::BadRequest(format!("Invalid request: {e}"))))
}
