//! In-memory chat room store.

use crate::error::ChatError;
use crate::types::{
    ChatMessage, ChatParticipant, ChatRoomDetail, ChatRoomInfo, ChatRoomSettings, ChatStats,
    JoinOutcome, MessageMetadata, MessagePage, MessageQuery, MessageType, SYSTEM_SENDER_ID,
    SYSTEM_SENDER_NAME,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};
use uuid::Uuid;

/// Chat room state.
#[derive(Debug)]
struct ChatRoom {
    id: String,
    messages: VecDeque<ChatMessage>,
    participants: HashMap<String, ChatParticipant>,
    created_at: DateTime<Utc>,
    settings: ChatRoomSettings,
}

impl ChatRoom {
    fn new(id: String, settings: ChatRoomSettings) -> Self {
        Self {
            id,
            messages: VecDeque::new(),
            participants: HashMap::new(),
            created_at: Utc::now(),
            settings,
        }
    }

    /// Append a message, evicting the oldest ones past the bound.
    fn push(&mut self, message: ChatMessage) {
        self.messages.push_back(message);
        while self.messages.len() > self.settings.max_messages {
            self.messages.pop_front();
        }
    }

    fn find_mut(&mut self, message_id: &str) -> Option<&mut ChatMessage> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    fn info(&self) -> ChatRoomInfo {
        ChatRoomInfo {
            id: self.id.clone(),
            participants_count: self.participants.len(),
            messages_count: self.messages.len(),
            created_at: self.created_at,
            last_activity: self
                .messages
                .back()
                .map_or(self.created_at, |m| m.timestamp),
        }
    }

    fn system_message(&self, content: String) -> ChatMessage {
        ChatMessage {
            id: Uuid::new_v4().to_string(),
            room_id: self.id.clone(),
            sender_id: SYSTEM_SENDER_ID.to_string(),
            sender_name: SYSTEM_SENDER_NAME.to_string(),
            content,
            message_type: MessageType::System,
            timestamp: Utc::now(),
            metadata: None,
        }
    }
}

/// Store of all chat rooms in the process.
#[derive(Debug, Default)]
pub struct ChatStore {
    rooms: HashMap<String, ChatRoom>,
    default_settings: ChatRoomSettings,
}

impl ChatStore {
    /// Create an empty store. New rooms take `default_settings`.
    #[must_use]
    pub fn new(default_settings: ChatRoomSettings) -> Self {
        Self {
            rooms: HashMap::new(),
            default_settings,
        }
    }

    /// Add a participant to a room, creating the room if needed.
    ///
    /// A first join records a system notice in the room history. Joining again
    /// only refreshes the participant's name and `last_seen`.
    pub fn join(&mut self, room_id: &str, participant_id: &str, name: &str) -> JoinOutcome {
        let default_settings = self.default_settings;
        let room = self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            info!(target: "sfu.chat", room_id = %room_id, "Created chat room");
            ChatRoom::new(room_id.to_string(), default_settings)
        });

        let now = Utc::now();
        if let Some(existing) = room.participants.get_mut(participant_id) {
            existing.name = name.to_string();
            existing.last_seen = now;
            return JoinOutcome {
                participant: existing.clone(),
                system_message: None,
            };
        }

        let participant = ChatParticipant {
            id: participant_id.to_string(),
            name: name.to_string(),
            joined_at: now,
            last_seen: now,
            is_typing: false,
        };
        room.participants
            .insert(participant_id.to_string(), participant.clone());

        let notice = room.system_message(format!("{name} joined the chat"));
        room.push(notice.clone());

        info!(
            target: "sfu.chat",
            room_id = %room_id,
            participant_id = %participant_id,
            participants = room.participants.len(),
            "Participant joined chat room"
        );

        JoinOutcome {
            participant,
            system_message: Some(notice),
        }
    }

    /// Remove a participant. Returns the recorded leave notice, or `None` if
    /// the participant was not in the room.
    ///
    /// The room is deleted once it has no participants left.
    pub fn leave(&mut self, room_id: &str, participant_id: &str) -> Option<ChatMessage> {
        let room = self.rooms.get_mut(room_id)?;
        let participant = room.participants.remove(participant_id)?;

        let notice = room.system_message(format!("{} left the chat", participant.name));
        room.push(notice.clone());

        info!(
            target: "sfu.chat",
            room_id = %room_id,
            participant_id = %participant_id,
            remaining = room.participants.len(),
            "Participant left chat room"
        );

        if room.participants.is_empty() {
            self.rooms.remove(room_id);
            info!(target: "sfu.chat", room_id = %room_id, "Empty chat room deleted");
        }

        Some(notice)
    }

    /// Append a user message.
    ///
    /// # Errors
    ///
    /// - `InvalidContent` for blank content or a user-sent system message
    /// - `RoomNotFound` / `ParticipantNotFound` if the sender is not in the room
    pub fn send_message(
        &mut self,
        room_id: &str,
        sender_id: &str,
        content: &str,
        message_type: MessageType,
        metadata: Option<MessageMetadata>,
    ) -> Result<ChatMessage, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::InvalidContent(
                "Message content cannot be empty".to_string(),
            ));
        }
        if message_type == MessageType::System {
            return Err(ChatError::InvalidContent(
                "System messages cannot be sent by participants".to_string(),
            ));
        }

        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| ChatError::RoomNotFound(room_id.to_string()))?;
        let sender = room
            .participants
            .get_mut(sender_id)
            .ok_or(ChatError::ParticipantNotFound)?;

        let now = Utc::now();
        sender.last_seen = now;

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: sender.name.clone(),
            content: content.to_string(),
            message_type,
            timestamp: now,
            metadata,
        };
        room.push(message.clone());

        debug!(
            target: "sfu.chat",
            room_id = %room_id,
            message_id = %message.id,
            "Message stored"
        );

        Ok(message)
    }

    /// Replace the content of a message sent by `editor_id`.
    ///
    /// # Errors
    ///
    /// - `InvalidContent` for blank content
    /// - `RoomNotFound` / `MessageNotFound`
    /// - `PermissionDenied` for system messages or another sender's message
    pub fn edit_message(
        &mut self,
        room_id: &str,
        message_id: &str,
        editor_id: &str,
        content: &str,
    ) -> Result<ChatMessage, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::InvalidContent(
                "Message content cannot be empty".to_string(),
            ));
        }

        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| ChatError::RoomNotFound(room_id.to_string()))?;
        let message = room
            .find_mut(message_id)
            .ok_or(ChatError::MessageNotFound)?;

        check_mutable(message, editor_id, "edit")?;

        let now = Utc::now();
        message.content = content.to_string();
        let metadata = message.metadata.get_or_insert_with(MessageMetadata::default);
        metadata.edited = true;
        metadata.edited_at = Some(now);

        debug!(
            target: "sfu.chat",
            room_id = %room_id,
            message_id = %message_id,
            "Message edited"
        );

        Ok(message.clone())
    }

    /// Remove a message sent by `deleter_id`.
    ///
    /// # Errors
    ///
    /// - `RoomNotFound` / `MessageNotFound`
    /// - `PermissionDenied` for system messages or another sender's message
    pub fn delete_message(
        &mut self,
        room_id: &str,
        message_id: &str,
        deleter_id: &str,
    ) -> Result<(), ChatError> {
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| ChatError::RoomNotFound(room_id.to_string()))?;
        let position = room
            .messages
            .iter()
            .position(|m| m.id == message_id)
            .ok_or(ChatError::MessageNotFound)?;

        if let Some(message) = room.messages.get(position) {
            check_mutable(message, deleter_id, "delete")?;
        }
        room.messages.remove(position);

        debug!(
            target: "sfu.chat",
            room_id = %room_id,
            message_id = %message_id,
            "Message deleted"
        );

        Ok(())
    }

    /// Set a participant's typing flag.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` / `ParticipantNotFound`.
    pub fn set_typing(
        &mut self,
        room_id: &str,
        participant_id: &str,
        is_typing: bool,
    ) -> Result<ChatParticipant, ChatError> {
        let participant = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| ChatError::RoomNotFound(room_id.to_string()))?
            .participants
            .get_mut(participant_id)
            .ok_or(ChatError::ParticipantNotFound)?;
        participant.is_typing = is_typing;
        Ok(participant.clone())
    }

    /// Page through history.
    ///
    /// Messages are filtered newest-first (optionally strictly older than
    /// `before`), `offset` newest ones skipped, `limit` taken, and the page
    /// returned oldest-first. An unknown room yields an empty page.
    #[must_use]
    pub fn messages(&self, room_id: &str, query: &MessageQuery) -> MessagePage {
        let Some(room) = self.rooms.get(room_id) else {
            return MessagePage {
                messages: Vec::new(),
                total: 0,
                has_more: false,
            };
        };

        let newest_first: Vec<&ChatMessage> = room
            .messages
            .iter()
            .rev()
            .filter(|m| query.before.map_or(true, |before| m.timestamp < before))
            .collect();

        let total = newest_first.len();
        let mut messages: Vec<ChatMessage> = newest_first
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .cloned()
            .collect();
        messages.reverse();

        MessagePage {
            messages,
            total,
            has_more: query.offset.saturating_add(query.limit) < total,
        }
    }

    /// The last `count` messages of a room, oldest first.
    #[must_use]
    pub fn recent_messages(&self, room_id: &str, count: usize) -> Vec<ChatMessage> {
        self.rooms.get(room_id).map_or_else(Vec::new, |room| {
            let skip = room.messages.len().saturating_sub(count);
            room.messages.iter().skip(skip).cloned().collect()
        })
    }

    /// Wipe a room's history in place. Participants stay.
    ///
    /// # Errors
    ///
    /// `RoomNotFound`.
    pub fn clear_messages(&mut self, room_id: &str) -> Result<usize, ChatError> {
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| ChatError::RoomNotFound(room_id.to_string()))?;
        let cleared = room.messages.len();
        room.messages.clear();

        info!(
            target: "sfu.chat",
            room_id = %room_id,
            cleared = cleared,
            "Chat history cleared"
        );

        Ok(cleared)
    }

    /// Look up a participant.
    #[must_use]
    pub fn participant(&self, room_id: &str, participant_id: &str) -> Option<&ChatParticipant> {
        self.rooms.get(room_id)?.participants.get(participant_id)
    }

    /// Participants of a room (empty for an unknown room).
    #[must_use]
    pub fn participant_ids(&self, room_id: &str) -> Vec<String> {
        self.rooms
            .get(room_id)
            .map(|room| room.participants.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of stored messages in a room (0 for an unknown room).
    #[must_use]
    pub fn message_count(&self, room_id: &str) -> usize {
        self.rooms.get(room_id).map_or(0, |room| room.messages.len())
    }

    /// Detailed view including participants and the `recent` last messages.
    #[must_use]
    pub fn room_detail(&self, room_id: &str, recent: usize) -> Option<ChatRoomDetail> {
        let room = self.rooms.get(room_id)?;
        Some(ChatRoomDetail {
            id: room.id.clone(),
            participants_count: room.participants.len(),
            messages_count: room.messages.len(),
            created_at: room.created_at,
            settings: room.settings,
            participants: room.participants.values().cloned().collect(),
            recent_messages: self.recent_messages(room_id, recent),
        })
    }

    /// Summary rows for every room.
    #[must_use]
    pub fn rooms_info(&self) -> Vec<ChatRoomInfo> {
        self.rooms.values().map(ChatRoom::info).collect()
    }

    /// Aggregate statistics across rooms.
    #[must_use]
    pub fn stats(&self) -> ChatStats {
        let rooms = self.rooms_info();
        let total_messages: usize = rooms.iter().map(|r| r.messages_count).sum();
        let total_participants: usize = rooms.iter().map(|r| r.participants_count).sum();

        // Room and message counts stay far below 2^52
        #[allow(clippy::cast_precision_loss)]
        let average_messages_per_room = if rooms.is_empty() {
            0.0
        } else {
            round2(total_messages as f64 / rooms.len() as f64)
        };

        ChatStats {
            total_chat_rooms: rooms.len(),
            total_participants,
            total_messages,
            active_chat_rooms: rooms.iter().filter(|r| r.participants_count > 0).count(),
            average_messages_per_room,
            most_active_room: rooms.iter().max_by_key(|r| r.messages_count).cloned(),
        }
    }
}

/// Only the original sender may change a message, and never a system notice.
fn check_mutable(message: &ChatMessage, actor_id: &str, action: &str) -> Result<(), ChatError> {
    if message.is_system() {
        return Err(ChatError::PermissionDenied(format!(
            "System messages cannot be modified ({action})"
        )));
    }
    if message.sender_id != actor_id {
        return Err(ChatError::PermissionDenied(format!(
            "You can only {action} your own messages"
        )));
    }
    Ok(())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    fn store_with_bound(max_messages: usize) -> ChatStore {
        ChatStore::new(ChatRoomSettings {
            max_messages,
            ..ChatRoomSettings::default()
        })
    }

    fn send(store: &mut ChatStore, room: &str, sender: &str, content: &str) -> ChatMessage {
        store
            .send_message(room, sender, content, MessageType::Text, None)
            .unwrap()
    }

    #[test]
    fn test_join_creates_room_and_records_notice() {
        let mut store = ChatStore::default();

        let outcome = store.join("lobby", "alice", "Alice");

        assert_eq!(outcome.participant.name, "Alice");
        let notice = outcome.system_message.unwrap();
        assert!(notice.is_system());
        assert_eq!(notice.sender_id, SYSTEM_SENDER_ID);
        assert_eq!(store.message_count("lobby"), 1);
    }

    #[test]
    fn test_rejoin_refreshes_name_without_notice() {
        let mut store = ChatStore::default();
        store.join("lobby", "alice", "Alice");

        let outcome = store.join("lobby", "alice", "Alice B.");

        assert!(outcome.system_message.is_none());
        assert_eq!(
            store.participant("lobby", "alice").unwrap().name,
            "Alice B."
        );
        assert_eq!(store.message_count("lobby"), 1);
    }

    #[test]
    fn test_history_bound_keeps_most_recent_in_order() {
        let max = 5;
        let extra = 3;
        let mut store = store_with_bound(max);
        store.join("lobby", "alice", "Alice");
        store.clear_messages("lobby").unwrap();

        for i in 0..(max + extra) {
            send(&mut store, "lobby", "alice", &format!("msg-{i}"));
        }

        let page = store.messages(
            "lobby",
            &MessageQuery {
                limit: 100,
                ..MessageQuery::default()
            },
        );
        assert_eq!(page.total, max);
        let contents: Vec<&str> = page.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg-3", "msg-4", "msg-5", "msg-6", "msg-7"]);
    }

    #[test]
    fn test_send_rejects_blank_and_unknown_sender() {
        let mut store = ChatStore::default();
        store.join("lobby", "alice", "Alice");

        assert!(matches!(
            store.send_message("lobby", "alice", "   ", MessageType::Text, None),
            Err(ChatError::InvalidContent(_))
        ));
        assert_eq!(
            store.send_message("lobby", "mallory", "hi", MessageType::Text, None),
            Err(ChatError::ParticipantNotFound)
        );
        assert!(matches!(
            store.send_message("nowhere", "alice", "hi", MessageType::Text, None),
            Err(ChatError::RoomNotFound(_))
        ));
    }

    #[test]
    fn test_participants_cannot_send_system_messages() {
        let mut store = ChatStore::default();
        store.join("lobby", "alice", "Alice");

        let result = store.send_message("lobby", "alice", "fake", MessageType::System, None);
        assert!(matches!(result, Err(ChatError::InvalidContent(_))));
    }

    #[test]
    fn test_send_trims_content_and_uses_participant_name() {
        let mut store = ChatStore::default();
        store.join("lobby", "alice", "Alice");

        let message = send(&mut store, "lobby", "alice", "  hello  ");

        assert_eq!(message.content, "hello");
        assert_eq!(message.sender_name, "Alice");
        assert_eq!(message.message_type, MessageType::Text);
    }

    #[test]
    fn test_only_sender_can_edit() {
        let mut store = ChatStore::default();
        store.join("lobby", "alice", "Alice");
        store.join("lobby", "bob", "Bob");
        let message = send(&mut store, "lobby", "alice", "hello");

        let denied = store.edit_message("lobby", &message.id, "bob", "hijack");
        assert!(matches!(denied, Err(ChatError::PermissionDenied(_))));

        let edited = store
            .edit_message("lobby", &message.id, "alice", "hello there")
            .unwrap();
        assert_eq!(edited.content, "hello there");
        let metadata = edited.metadata.unwrap();
        assert!(metadata.edited);
        assert!(metadata.edited_at.is_some());
    }

    #[test]
    fn test_only_sender_can_delete() {
        let mut store = ChatStore::default();
        store.join("lobby", "alice", "Alice");
        store.join("lobby", "bob", "Bob");
        let message = send(&mut store, "lobby", "alice", "hello");

        assert!(matches!(
            store.delete_message("lobby", &message.id, "bob"),
            Err(ChatError::PermissionDenied(_))
        ));
        store.delete_message("lobby", &message.id, "alice").unwrap();
        assert_eq!(
            store.delete_message("lobby", &message.id, "alice"),
            Err(ChatError::MessageNotFound)
        );
    }

    #[test]
    fn test_system_messages_are_immutable() {
        let mut store = ChatStore::default();
        let notice = store
            .join("lobby", "alice", "Alice")
            .system_message
            .unwrap();

        // Not even a caller claiming the system sender id may touch it
        for actor in ["alice", SYSTEM_SENDER_ID] {
            assert!(matches!(
                store.edit_message("lobby", &notice.id, actor, "rewritten"),
                Err(ChatError::PermissionDenied(_))
            ));
            assert!(matches!(
                store.delete_message("lobby", &notice.id, actor),
                Err(ChatError::PermissionDenied(_))
            ));
        }
        assert_eq!(store.message_count("lobby"), 1);
    }

    #[test]
    fn test_pagination_newest_first_filter_oldest_first_page() {
        let mut store = ChatStore::default();
        store.join("lobby", "alice", "Alice");
        store.clear_messages("lobby").unwrap();
        for i in 0..10 {
            send(&mut store, "lobby", "alice", &format!("m{i}"));
        }

        let page = store.messages(
            "lobby",
            &MessageQuery {
                limit: 3,
                offset: 2,
                before: None,
            },
        );

        let contents: Vec<&str> = page.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m5", "m6", "m7"]);
        assert_eq!(page.total, 10);
        assert!(page.has_more);

        let last_page = store.messages(
            "lobby",
            &MessageQuery {
                limit: 5,
                offset: 5,
                before: None,
            },
        );
        assert_eq!(last_page.messages.len(), 5);
        assert!(!last_page.has_more);
    }

    #[test]
    fn test_pagination_before_filter() {
        let mut store = ChatStore::default();
        store.join("lobby", "alice", "Alice");
        store.clear_messages("lobby").unwrap();
        let first = send(&mut store, "lobby", "alice", "first");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = send(&mut store, "lobby", "alice", "second");

        let page = store.messages(
            "lobby",
            &MessageQuery {
                before: Some(second.timestamp),
                ..MessageQuery::default()
            },
        );

        assert_eq!(page.total, 1);
        assert_eq!(page.messages[0].id, first.id);
    }

    #[test]
    fn test_unknown_room_yields_empty_page() {
        let store = ChatStore::default();
        let page = store.messages("nowhere", &MessageQuery::default());
        assert!(page.messages.is_empty());
        assert_eq!(page.total, 0);
        assert!(!page.has_more);
    }

    #[test]
    fn test_clear_keeps_room_and_participants() {
        let mut store = ChatStore::default();
        store.join("lobby", "alice", "Alice");
        send(&mut store, "lobby", "alice", "hello");

        let cleared = store.clear_messages("lobby").unwrap();

        assert_eq!(cleared, 2);
        assert_eq!(store.message_count("lobby"), 0);
        assert!(store.participant("lobby", "alice").is_some());
        assert!(matches!(
            store.clear_messages("nowhere"),
            Err(ChatError::RoomNotFound(_))
        ));
    }

    #[test]
    fn test_last_leave_deletes_room() {
        let mut store = ChatStore::default();
        store.join("lobby", "alice", "Alice");
        store.join("lobby", "bob", "Bob");

        let notice = store.leave("lobby", "alice").unwrap();
        assert!(notice.content.contains("Alice"));
        assert_eq!(store.rooms_info().len(), 1);

        store.leave("lobby", "bob").unwrap();
        assert!(store.rooms_info().is_empty());
        assert!(store.leave("lobby", "bob").is_none());
    }

    #[test]
    fn test_typing_flag() {
        let mut store = ChatStore::default();
        store.join("lobby", "alice", "Alice");

        let participant = store.set_typing("lobby", "alice", true).unwrap();
        assert!(participant.is_typing);
        assert_eq!(
            store.set_typing("lobby", "bob", true),
            Err(ChatError::ParticipantNotFound)
        );
    }

    #[test]
    fn test_room_detail_includes_last_ten_messages() {
        let mut store = ChatStore::default();
        store.join("lobby", "alice", "Alice");
        for i in 0..15 {
            send(&mut store, "lobby", "alice", &format!("m{i}"));
        }

        let detail = store.room_detail("lobby", 10).unwrap();

        assert_eq!(detail.participants.len(), 1);
        assert_eq!(detail.messages_count, 16);
        assert_eq!(detail.recent_messages.len(), 10);
        assert_eq!(detail.recent_messages[0].content, "m5");
        assert_eq!(detail.recent_messages[9].content, "m14");
    }

    #[test]
    fn test_stats() {
        let mut store = ChatStore::default();
        store.join("a", "alice", "Alice");
        store.join("b", "bob", "Bob");
        send(&mut store, "a", "alice", "one");
        send(&mut store, "a", "alice", "two");

        let stats = store.stats();

        assert_eq!(stats.total_chat_rooms, 2);
        assert_eq!(stats.total_participants, 2);
        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.active_chat_rooms, 2);
        assert!((stats.average_messages_per_room - 2.0).abs() < f64::EPSILON);
        assert_eq!(stats.most_active_room.unwrap().id, "a");
    }
}
