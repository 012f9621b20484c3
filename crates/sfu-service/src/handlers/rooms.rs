//! Room introspection handlers.
//!
//! - `GET /rooms` - List rooms with peer and chat message counts
//! - `GET /rooms/:room_id` - Room detail
//! - `GET /rooms/:room_id/rtp-capabilities` - Create-or-fetch a room's capabilities
//! - `GET /rooms/:room_id/peers/:peer_id` - Peer resource view
//! - `GET /rooms/:room_id/screen-share` - Active screen share
//! - `DELETE /rooms/:room_id` - Force-delete a room
//! - `GET /stats` - Registry statistics

use crate::actors::{PeerDetail, RegistryStats, RoomDetail, ScreenShareSession};
use crate::engine::RtpCapabilities;
use crate::errors::SfuError;
use crate::routes::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// Entry of `GET /rooms`.
#[derive(Debug, Serialize)]
pub struct RoomListEntry {
    pub id: String,
    pub peers_count: usize,
    pub messages_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RoomListResponse {
    pub rooms: Vec<RoomListEntry>,
}

#[derive(Debug, Serialize)]
pub struct RtpCapabilitiesResponse {
    pub room_id: String,
    pub rtp_capabilities: RtpCapabilities,
}

/// Handler for GET /rooms
#[instrument(skip_all, name = "sfu.http.rooms.list")]
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RoomListResponse>, SfuError> {
    let rooms = state
        .registry
        .rooms_info()
        .await?
        .into_iter()
        .map(|room| RoomListEntry {
            messages_count: state.chat.message_count(&room.id),
            id: room.id,
            peers_count: room.peers_count,
            created_at: room.created_at,
        })
        .collect();

    Ok(Json(RoomListResponse { rooms }))
}

/// Handler for GET /rooms/:room_id
#[instrument(skip_all, name = "sfu.http.rooms.get", fields(room_id = %room_id))]
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomDetail>, SfuError> {
    state
        .registry
        .room_detail(room_id.clone())
        .await?
        .map(Json)
        .ok_or_else(|| SfuError::NotFound(format!("Room {room_id} not found")))
}

/// Handler for GET /rooms/:room_id/rtp-capabilities
///
/// Creates the room if it does not exist yet.
#[instrument(skip_all, name = "sfu.http.rooms.rtp_capabilities", fields(room_id = %room_id))]
pub async fn get_rtp_capabilities(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RtpCapabilitiesResponse>, SfuError> {
    let rtp_capabilities = state.registry.create_room(room_id.clone()).await?;

    Ok(Json(RtpCapabilitiesResponse {
        room_id,
        rtp_capabilities,
    }))
}

/// Handler for GET /rooms/:room_id/peers/:peer_id
#[instrument(
    skip_all,
    name = "sfu.http.rooms.peer",
    fields(room_id = %room_id, peer_id = %peer_id)
)]
pub async fn get_peer(
    State(state): State<Arc<AppState>>,
    Path((room_id, peer_id)): Path<(String, String)>,
) -> Result<Json<PeerDetail>, SfuError> {
    state
        .registry
        .peer_detail(room_id.clone(), peer_id.clone())
        .await?
        .map(Json)
        .ok_or_else(|| SfuError::NotFound(format!("Peer {peer_id} not found in room {room_id}")))
}

/// Handler for GET /rooms/:room_id/screen-share
#[instrument(skip_all, name = "sfu.http.rooms.screen_share", fields(room_id = %room_id))]
pub async fn get_screen_share(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<ScreenShareSession>, SfuError> {
    state
        .registry
        .screen_share(room_id.clone())
        .await?
        .map(Json)
        .ok_or_else(|| SfuError::NotFound(format!("No active screen share in room {room_id}")))
}

/// Handler for DELETE /rooms/:room_id
///
/// Every peer in the room receives `room-closed`.
#[instrument(skip_all, name = "sfu.http.rooms.delete", fields(room_id = %room_id))]
pub async fn delete_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<StatusCode, SfuError> {
    state.registry.delete_room(room_id.clone()).await?;

    info!(target: "sfu.http", room_id = %room_id, "Room deleted via REST");
    Ok(StatusCode::NO_CONTENT)
}

/// Handler for GET /stats
#[instrument(skip_all, name = "sfu.http.stats")]
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RegistryStats>, SfuError> {
    Ok(Json(state.registry.stats().await?))
}
