//! Text chat store.
//!
//! Chat rooms live next to media rooms but share no state with them: a
//! participant can be present in chat without an active media peer, and the
//! store never looks at the media side.
//!
//! # Behaviour
//!
//! - Rooms are created on first join and deleted once the last participant leaves.
//! - History is bounded by [`ChatRoomSettings::max_messages`]; the oldest
//!   message is evicted first.
//! - Only the original sender may edit or delete a message. System messages
//!   (join/leave notices) cannot be edited or deleted by anyone.
//! - Paging filters newest-first and returns each page oldest-first.
//!
//! The store is synchronous and not internally locked. Callers that share it
//! across tasks wrap it in their own lock.

#![warn(clippy::pedantic)]

pub mod error;
pub mod store;
pub mod types;

pub use error::ChatError;
pub use store::ChatStore;
pub use types::*;
