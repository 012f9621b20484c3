//! `ChatHub` - chat store plus per-room event fan-out.
//!
//! Chat membership is independent of media membership: a connection may chat
//! in a room it has no media peer in. The hub pairs the [`ChatStore`] with the
//! event sinks of the connections subscribed to each chat room. Notifications
//! go to everyone in the room except the connection that caused them; that
//! connection gets the result as its response instead.

use crate::errors::SfuError;
use crate::observability::metrics as prom;
use crate::signaling::{EventSink, ServerEvent};
use chat_store::{
    ChatMessage, ChatParticipant, ChatRoomDetail, ChatRoomInfo, ChatRoomSettings, ChatStats,
    ChatStore, MessageMetadata, MessagePage, MessageQuery, MessageType,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Number of messages returned with a chat join.
const JOIN_HISTORY_LIMIT: usize = 50;

/// Number of recent messages in the REST room detail.
const DETAIL_RECENT_MESSAGES: usize = 10;

/// Response to a chat join.
#[derive(Debug, Clone, Serialize)]
pub struct ChatJoinResult {
    pub room_id: String,
    pub participant: ChatParticipant,
    pub history: MessagePage,
}

#[derive(Debug)]
struct HubState {
    store: ChatStore,
    /// Room id -> participant id -> sink.
    subscribers: HashMap<String, HashMap<String, EventSink>>,
}

impl HubState {
    fn broadcast(&self, room_id: &str, except_id: &str, event: &ServerEvent) {
        let Some(room) = self.subscribers.get(room_id) else {
            return;
        };
        for (participant_id, sink) in room {
            if participant_id != except_id {
                sink.send(event.clone());
            }
        }
    }
}

/// Shared chat state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChatHub {
    state: Arc<Mutex<HubState>>,
}

impl ChatHub {
    #[must_use]
    pub fn new(settings: ChatRoomSettings) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                store: ChatStore::new(settings),
                subscribers: HashMap::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join a chat room and subscribe `events` to it.
    pub fn join(
        &self,
        room_id: &str,
        participant_id: &str,
        name: &str,
        events: EventSink,
    ) -> ChatJoinResult {
        let mut state = self.state();
        let outcome = state.store.join(room_id, participant_id, name);
        state
            .subscribers
            .entry(room_id.to_string())
            .or_default()
            .insert(participant_id.to_string(), events);

        if let Some(notice) = outcome.system_message {
            state.broadcast(
                room_id,
                participant_id,
                &ServerEvent::ChatSystemMessage { message: notice },
            );
        }

        let history = state.store.messages(
            room_id,
            &MessageQuery {
                limit: JOIN_HISTORY_LIMIT,
                ..MessageQuery::default()
            },
        );

        ChatJoinResult {
            room_id: room_id.to_string(),
            participant: outcome.participant,
            history,
        }
    }

    /// Leave a chat room. Returns `false` if the participant was not in it.
    pub fn leave(&self, room_id: &str, participant_id: &str) -> bool {
        let mut state = self.state();
        if let Some(room) = state.subscribers.get_mut(room_id) {
            room.remove(participant_id);
            if room.is_empty() {
                state.subscribers.remove(room_id);
            }
        }

        match state.store.leave(room_id, participant_id) {
            Some(notice) => {
                state.broadcast(
                    room_id,
                    participant_id,
                    &ServerEvent::ChatSystemMessage { message: notice },
                );
                true
            }
            None => false,
        }
    }

    /// Store and fan out a participant's message.
    ///
    /// # Errors
    ///
    /// `BadRequest` for blank content, `NotFound` if the sender is not in the room.
    pub fn send(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
        message_type: MessageType,
        metadata: Option<MessageMetadata>,
    ) -> Result<ChatMessage, SfuError> {
        let mut state = self.state();
        let message = state
            .store
            .send_message(room_id, sender_id, content, message_type, metadata)?;

        prom::record_chat_message(message_type_label(message_type));
        state.broadcast(
            room_id,
            sender_id,
            &ServerEvent::ChatMessage {
                message: message.clone(),
            },
        );
        Ok(message)
    }

    /// Edit a message sent by `editor_id`.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` for system messages or another sender's message.
    pub fn edit(
        &self,
        room_id: &str,
        message_id: &str,
        editor_id: &str,
        content: &str,
    ) -> Result<ChatMessage, SfuError> {
        let mut state = self.state();
        let message = state
            .store
            .edit_message(room_id, message_id, editor_id, content)?;

        state.broadcast(
            room_id,
            editor_id,
            &ServerEvent::ChatMessageEdited {
                message: message.clone(),
            },
        );
        Ok(message)
    }

    /// Delete a message sent by `deleter_id`.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` for system messages or another sender's message.
    pub fn delete(
        &self,
        room_id: &str,
        message_id: &str,
        deleter_id: &str,
    ) -> Result<(), SfuError> {
        let mut state = self.state();
        state.store.delete_message(room_id, message_id, deleter_id)?;

        state.broadcast(
            room_id,
            deleter_id,
            &ServerEvent::ChatMessageDeleted {
                room_id: room_id.to_string(),
                message_id: message_id.to_string(),
            },
        );
        Ok(())
    }

    /// Set a typing flag. Others are told only when the flag changes.
    ///
    /// # Errors
    ///
    /// `NotFound` if the participant is not in the room.
    pub fn set_typing(
        &self,
        room_id: &str,
        participant_id: &str,
        is_typing: bool,
    ) -> Result<ChatParticipant, SfuError> {
        let mut state = self.state();
        let was_typing = state
            .store
            .participant(room_id, participant_id)
            .is_some_and(|p| p.is_typing);
        let participant = state.store.set_typing(room_id, participant_id, is_typing)?;

        if was_typing != is_typing {
            state.broadcast(
                room_id,
                participant_id,
                &ServerEvent::ChatTypingState {
                    room_id: room_id.to_string(),
                    participant_id: participant_id.to_string(),
                    name: participant.name.clone(),
                    is_typing,
                },
            );
        }
        Ok(participant)
    }

    #[must_use]
    pub fn history(&self, room_id: &str, query: &MessageQuery) -> MessagePage {
        self.state().store.messages(room_id, query)
    }

    #[must_use]
    pub fn rooms_info(&self) -> Vec<ChatRoomInfo> {
        self.state().store.rooms_info()
    }

    /// Room detail with participants and the last few messages.
    #[must_use]
    pub fn room_detail(&self, room_id: &str) -> Option<ChatRoomDetail> {
        self.state()
            .store
            .room_detail(room_id, DETAIL_RECENT_MESSAGES)
    }

    #[must_use]
    pub fn message_count(&self, room_id: &str) -> usize {
        self.state().store.message_count(room_id)
    }

    /// Wipe a room's history in place.
    ///
    /// # Errors
    ///
    /// `NotFound` if the room does not exist.
    pub fn clear_messages(&self, room_id: &str) -> Result<usize, SfuError> {
        let cleared = self.state().store.clear_messages(room_id)?;
        debug!(target: "sfu.chat", room_id = %room_id, cleared, "Chat history cleared");
        Ok(cleared)
    }

    #[must_use]
    pub fn stats(&self) -> ChatStats {
        self.state().store.stats()
    }
}

fn message_type_label(message_type: MessageType) -> &'static str {
    match message_type {
        MessageType::Text => "text",
        MessageType::Emoji => "emoji",
        MessageType::System => "system",
        MessageType::File => "file",
        MessageType::Image => "image",
    }
}
