//! Chat data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sender ID recorded on system messages.
pub const SYSTEM_SENDER_ID: &str = "system";

/// Sender name recorded on system messages.
pub const SYSTEM_SENDER_NAME: &str = "System";

/// Default history bound per room.
pub const DEFAULT_MAX_MESSAGES: usize = 1000;

/// Default page size for history queries.
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// Kind of chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Emoji,
    System,
    File,
    Image,
}

/// Optional message metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default)]
    pub edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
}

/// A stored chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl ChatMessage {
    /// Whether this is an immutable system notice.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.message_type == MessageType::System
    }
}

/// A participant present in a chat room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatParticipant {
    pub id: String,
    pub name: String,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_typing: bool,
}

/// Per-room chat settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRoomSettings {
    /// History bound. Older messages are evicted first once exceeded.
    pub max_messages: usize,
    pub allow_file_upload: bool,
    pub allow_emojis: bool,
    pub moderation_enabled: bool,
}

impl Default for ChatRoomSettings {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            allow_file_upload: true,
            allow_emojis: true,
            moderation_enabled: false,
        }
    }
}

/// Result of joining a chat room.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub participant: ChatParticipant,
    /// Notice recorded for a first join. `None` when the participant was
    /// already present and only had its name refreshed.
    pub system_message: Option<ChatMessage>,
}

/// Summary row for listing chat rooms.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRoomInfo {
    pub id: String,
    pub participants_count: usize,
    pub messages_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Detailed view of one chat room.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRoomDetail {
    pub id: String,
    pub participants_count: usize,
    pub messages_count: usize,
    pub created_at: DateTime<Utc>,
    pub settings: ChatRoomSettings,
    pub participants: Vec<ChatParticipant>,
    pub recent_messages: Vec<ChatMessage>,
}

/// History query.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    /// Only messages strictly older than this instant.
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,
}

fn default_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
            before: None,
        }
    }
}

/// One page of history, oldest message first.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,
    /// Number of messages matching the `before` filter.
    pub total: usize,
    pub has_more: bool,
}

/// Aggregate chat statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ChatStats {
    pub total_chat_rooms: usize,
    pub total_participants: usize,
    pub total_messages: usize,
    pub active_chat_rooms: usize,
    pub average_messages_per_room: f64,
    pub most_active_room: Option<ChatRoomInfo>,
}
