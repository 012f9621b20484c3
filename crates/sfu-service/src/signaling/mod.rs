//! Signaling gateway.
//!
//! Translates WebSocket frames into registry, room and chat calls and writes
//! back responses, errors and room events.
//!
//! - [`protocol`] - JSON wire format
//! - [`session`] - per-connection state and dispatch
//! - [`sink`] - bounded per-connection event queue
//! - [`ws`] - axum WebSocket endpoint

pub mod protocol;
pub mod session;
pub mod sink;
pub mod ws;

pub use protocol::{ClientRequest, ServerEvent, ServerMessage};
pub use session::{SessionSettings, SignalingSession};
pub use sink::{event_channel, EventSink, EventStream, EVENT_CHANNEL_BUFFER};
pub use ws::ws_upgrade;
