//! Chat history handlers.
//!
//! - `GET /chat/rooms` - List chat rooms
//! - `GET /chat/rooms/:room_id` - Participants and the last few messages
//! - `GET /chat/rooms/:room_id/messages` - Paged history (`limit`, `offset`, `before`)
//! - `DELETE /chat/rooms/:room_id/messages/:message_id` - Delete one message
//! - `DELETE /chat/rooms/:room_id/messages` - Clear a room's history
//! - `GET /chat/stats` - Store statistics
//!
//! Live chat (join, send, typing) goes through signaling only.

use crate::errors::SfuError;
use crate::routes::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use chat_store::{ChatRoomDetail, ChatRoomInfo, ChatStats, MessagePage, MessageQuery};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Serialize)]
pub struct ChatRoomListResponse {
    pub rooms: Vec<ChatRoomInfo>,
}

/// Body of `DELETE /chat/rooms/:room_id/messages/:message_id`.
#[derive(Debug, Deserialize)]
pub struct DeleteMessageRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteMessageResponse {
    pub message_id: String,
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct ClearMessagesResponse {
    pub room_id: String,
    pub cleared: usize,
}

/// Handler for GET /chat/rooms
#[instrument(skip_all, name = "sfu.http.chat.rooms")]
pub async fn list_chat_rooms(State(state): State<Arc<AppState>>) -> Json<ChatRoomListResponse> {
    Json(ChatRoomListResponse {
        rooms: state.chat.rooms_info(),
    })
}

/// Handler for GET /chat/rooms/:room_id
#[instrument(skip_all, name = "sfu.http.chat.room", fields(room_id = %room_id))]
pub async fn get_chat_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<ChatRoomDetail>, SfuError> {
    state
        .chat
        .room_detail(&room_id)
        .map(Json)
        .ok_or_else(|| SfuError::NotFound(format!("Chat room {room_id} not found")))
}

/// Handler for GET /chat/rooms/:room_id/messages
///
/// Unknown rooms yield an empty page.
#[instrument(skip_all, name = "sfu.http.chat.messages", fields(room_id = %room_id))]
pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(query): Query<MessageQuery>,
) -> Json<MessagePage> {
    Json(state.chat.history(&room_id, &query))
}

/// Handler for DELETE /chat/rooms/:room_id/messages/:message_id
///
/// Only the author may delete a message.
#[instrument(
    skip_all,
    name = "sfu.http.chat.delete_message",
    fields(room_id = %room_id, message_id = %message_id)
)]
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Path((room_id, message_id)): Path<(String, String)>,
    body: axum::body::Bytes,
) -> Result<Json<DeleteMessageResponse>, SfuError> {
    // Deserialize manually to return 400 (not Axum's default 422)
    let request: DeleteMessageRequest = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!(target: "sfu.http", error = %e, "Invalid request body");
        SfuError::BadRequest("Invalid request body".to_string())
    })?;

    state.chat.delete(&room_id, &message_id, &request.user_id)?;

    Ok(Json(DeleteMessageResponse {
        message_id,
        deleted: true,
    }))
}

/// Handler for DELETE /chat/rooms/:room_id/messages
#[instrument(skip_all, name = "sfu.http.chat.clear", fields(room_id = %room_id))]
pub async fn clear_messages(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<ClearMessagesResponse>, SfuError> {
    let cleared = state.chat.clear_messages(&room_id)?;

    info!(target: "sfu.http", room_id = %room_id, cleared, "Chat history cleared via REST");
    Ok(Json(ClearMessagesResponse { room_id, cleared }))
}

/// Handler for GET /chat/stats
#[instrument(skip_all, name = "sfu.http.chat.stats")]
pub async fn get_chat_stats(State(state): State<Arc<AppState>>) -> Json<ChatStats> {
    Json(state.chat.stats())
}
