//! HTTP request handlers for the SFU service.

pub mod chat;
pub mod metrics;
pub mod rooms;

pub use chat::{
    clear_messages, delete_message, get_chat_room, get_chat_stats, get_messages, list_chat_rooms,
};
pub use metrics::metrics_handler;
pub use rooms::{
    delete_room, get_peer, get_room, get_rtp_capabilities, get_screen_share, get_stats, list_rooms,
};
