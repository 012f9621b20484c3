//! Message types for actor communication.
//!
//! Requests travel over `tokio::sync::mpsc`; replies come back on a
//! `tokio::sync::oneshot` carried in the message. The read-model types below
//! are also the JSON bodies of the introspection endpoints.

use super::room::RoomActorHandle;
use crate::engine::{
    DtlsParameters, ProducerType, RtpCapabilities, RtpParameters, TransportOptions,
};
use crate::errors::SfuError;
use crate::signaling::EventSink;
use chrono::{DateTime, Utc};
use common::types::{MediaKind, MediaSource, TransportDirection};
use serde::Serialize;
use tokio::sync::oneshot;

/// Messages sent to the `RoomRegistry`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Create-or-fetch a room and return its capability context.
    CreateRoom {
        room_id: String,
        respond_to: oneshot::Sender<Result<RtpCapabilities, SfuError>>,
    },

    GetRoom {
        room_id: String,
        respond_to: oneshot::Sender<Option<RoomActorHandle>>,
    },

    /// Join a peer, creating the room if unseen. A peer already present in
    /// any room is torn down first.
    JoinRoom {
        room_id: String,
        peer_id: String,
        display_name: String,
        events: EventSink,
        respond_to: oneshot::Sender<Result<(RoomActorHandle, JoinResult), SfuError>>,
    },

    /// Remove a peer wherever it is. Replies `false` when it was in no room.
    LeaveRoom {
        peer_id: String,
        respond_to: oneshot::Sender<Result<bool, SfuError>>,
    },

    /// Force-delete a room, tearing down every peer in it.
    DeleteRoom {
        room_id: String,
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    },

    ListRooms {
        respond_to: oneshot::Sender<Vec<RoomSummary>>,
    },

    GetStats {
        respond_to: oneshot::Sender<RegistryStats>,
    },

    /// Close every room and stop the registry.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    },
}

/// Producer creation request.
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub transport_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    /// Defaults to camera for video and microphone for audio.
    pub source: Option<MediaSource>,
}

/// Consumer creation request.
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub transport_id: String,
    pub producer_id: String,
    /// Capabilities of the consuming endpoint.
    pub rtp_capabilities: RtpCapabilities,
}

/// Messages sent to a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    Join {
        peer_id: String,
        display_name: String,
        events: EventSink,
        respond_to: oneshot::Sender<Result<JoinResult, SfuError>>,
    },

    Leave {
        peer_id: String,
        respond_to: oneshot::Sender<LeaveOutcome>,
    },

    /// Remove every peer, notifying each with `room-closed`. Replies with the
    /// removed peer ids.
    CloseRoom {
        respond_to: oneshot::Sender<Vec<String>>,
    },

    CreateTransport {
        peer_id: String,
        direction: TransportDirection,
        respond_to: oneshot::Sender<Result<TransportOptions, SfuError>>,
    },

    ConnectTransport {
        peer_id: String,
        transport_id: String,
        dtls_parameters: DtlsParameters,
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    },

    CloseTransport {
        peer_id: String,
        transport_id: String,
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    },

    Produce {
        peer_id: String,
        request: ProduceRequest,
        respond_to: oneshot::Sender<Result<ProduceResult, SfuError>>,
    },

    Consume {
        peer_id: String,
        request: ConsumeRequest,
        respond_to: oneshot::Sender<Result<ConsumeResult, SfuError>>,
    },

    SetProducerPaused {
        peer_id: String,
        producer_id: String,
        paused: bool,
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    },

    SetConsumerPaused {
        peer_id: String,
        consumer_id: String,
        paused: bool,
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    },

    CloseProducer {
        peer_id: String,
        producer_id: String,
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    },

    CloseConsumer {
        peer_id: String,
        consumer_id: String,
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    },

    GetState {
        respond_to: oneshot::Sender<RoomDetail>,
    },

    GetPeer {
        peer_id: String,
        respond_to: oneshot::Sender<Option<PeerDetail>>,
    },

    GetScreenShare {
        respond_to: oneshot::Sender<Option<ScreenShareSession>>,
    },
}

/// Result of a room join.
#[derive(Debug, Clone, Serialize)]
pub struct JoinResult {
    pub room_id: String,
    pub peer_id: String,
    pub rtp_capabilities: RtpCapabilities,
    /// Every other peer with its current producers. Producers created after
    /// the join arrive as `new-producer-available` events only.
    pub peers: Vec<PeerSummary>,
}

/// Another peer as seen by a joining peer.
#[derive(Debug, Clone, Serialize)]
pub struct PeerSummary {
    pub id: String,
    pub name: String,
    pub producers: Vec<ProducerSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProducerSummary {
    pub producer_id: String,
    pub kind: MediaKind,
    pub source: MediaSource,
    pub paused: bool,
}

/// Outcome of removing a peer from a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// Whether the peer was in the room.
    pub removed: bool,
    pub remaining_peers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProduceResult {
    pub id: String,
    pub kind: MediaKind,
    pub source: MediaSource,
    pub producer_type: ProducerType,
}

/// What a peer needs to start receiving a remote producer.
#[derive(Debug, Clone, Serialize)]
pub struct ConsumeResult {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub producer_type: ProducerType,
    /// Consumers start paused; the client resumes once its track is ready.
    pub paused: bool,
}

/// Registry listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSummary {
    pub id: String,
    pub peers_count: usize,
    pub created_at: DateTime<Utc>,
}

/// One room's detail view.
#[derive(Debug, Clone, Serialize)]
pub struct RoomDetail {
    pub id: String,
    pub peers_count: usize,
    pub created_at: DateTime<Utc>,
    pub peers: Vec<PeerInfo>,
    pub screen_share: Option<ScreenShareSession>,
}

/// Per-peer summary inside [`RoomDetail`].
#[derive(Debug, Clone, Serialize)]
pub struct PeerInfo {
    pub id: String,
    pub name: String,
    pub joined_at: DateTime<Utc>,
    pub transports_count: usize,
    pub producers_count: usize,
    pub consumers_count: usize,
}

/// One peer's resource view.
#[derive(Debug, Clone, Serialize)]
pub struct PeerDetail {
    pub id: String,
    pub name: String,
    pub joined_at: DateTime<Utc>,
    pub transports: Vec<TransportInfo>,
    pub producers: Vec<ProducerInfo>,
    pub consumers: Vec<ConsumerInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransportInfo {
    pub id: String,
    pub direction: TransportDirection,
    /// DTLS handshake completed.
    pub connected: bool,
    pub closed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProducerInfo {
    pub id: String,
    pub kind: MediaKind,
    pub source: MediaSource,
    pub paused: bool,
    #[serde(rename = "type")]
    pub producer_type: ProducerType,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumerInfo {
    pub id: String,
    pub kind: MediaKind,
    pub paused: bool,
    #[serde(rename = "type")]
    pub producer_type: ProducerType,
    pub producer_id: String,
}

/// The room's active screen share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScreenShareSession {
    pub producer_id: String,
    pub peer_id: String,
    pub started_at: DateTime<Utc>,
}

/// Aggregate registry statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_rooms: usize,
    pub total_peers: usize,
    pub rooms_with_peers: usize,
    pub empty_rooms: usize,
    /// Rounded to two decimals.
    pub average_peers_per_room: f64,
    pub oldest_room_created_at: Option<DateTime<Utc>>,
}
