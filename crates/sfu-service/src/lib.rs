//! SFU Service Library
//!
//! Control plane of a selective forwarding unit: it groups peers into rooms,
//! drives a media engine to create transports, producers and consumers, and
//! relays room events to every connected peer over a WebSocket signaling
//! channel. A small text chat rides on the same channel.
//!
//! # Architecture
//!
//! ```text
//! signaling/ws.rs -> signaling/session.rs -> actors/registry.rs -> actors/room.rs -> engine
//!                                          \-> chat.rs -> chat-store
//! routes/mod.rs -> handlers/*.rs (introspection and chat REST)
//! ```
//!
//! # Modules
//!
//! - `actors` - Room registry and per-room actors
//! - `chat` - Chat rooms with event fan-out
//! - `config` - Service configuration from environment
//! - `engine` - Media engine seam and the in-process engine
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `observability` - Metrics and health probes
//! - `routes` - Axum router setup
//! - `signaling` - WebSocket signaling gateway

pub mod actors;
pub mod chat;
pub mod config;
pub mod engine;
pub mod errors;
pub mod handlers;
pub mod observability;
pub mod routes;
pub mod signaling;
