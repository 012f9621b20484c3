//! HTTP routes for the SFU service.
//!
//! Defines the Axum router and application state.

use crate::actors::RoomRegistryHandle;
use crate::chat::ChatHub;
use crate::handlers;
use crate::observability::{health_router, HealthState};
use crate::signaling::{ws_upgrade, SessionSettings};
use axum::{
    routing::{delete, get},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Room registry handle.
    pub registry: RoomRegistryHandle,

    /// Chat rooms and their subscribers.
    pub chat: ChatHub,

    /// Per-connection signaling settings.
    pub session_settings: SessionSettings,

    /// Open signaling connections served by this router.
    pub connections: Arc<AtomicUsize>,
}

impl AppState {
    #[must_use]
    pub fn new(
        registry: RoomRegistryHandle,
        chat: ChatHub,
        session_settings: SessionSettings,
    ) -> Self {
        Self {
            registry,
            chat,
            session_settings,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health`, `/ready` - Liveness and readiness probes
/// - `/metrics` - Prometheus metrics endpoint
/// - `/ws` - Signaling WebSocket
/// - `/rooms/...`, `/stats` - Room introspection
/// - `/chat/...` - Chat history
/// - TraceLayer for request logging
/// - `http_timeout` request timeout
pub fn build_routes(
    state: Arc<AppState>,
    metrics_handle: PrometheusHandle,
    health_state: Arc<HealthState>,
    http_timeout: Duration,
) -> Router {
    let app_routes = Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/rooms", get(handlers::list_rooms))
        .route(
            "/rooms/:room_id",
            get(handlers::get_room).delete(handlers::delete_room),
        )
        .route(
            "/rooms/:room_id/rtp-capabilities",
            get(handlers::get_rtp_capabilities),
        )
        .route("/rooms/:room_id/peers/:peer_id", get(handlers::get_peer))
        .route(
            "/rooms/:room_id/screen-share",
            get(handlers::get_screen_share),
        )
        .route("/stats", get(handlers::get_stats))
        .route("/chat/rooms", get(handlers::list_chat_rooms))
        .route("/chat/rooms/:room_id", get(handlers::get_chat_room))
        .route(
            "/chat/rooms/:room_id/messages",
            get(handlers::get_messages).delete(handlers::clear_messages),
        )
        .route(
            "/chat/rooms/:room_id/messages/:message_id",
            delete(handlers::delete_message),
        )
        .route("/chat/stats", get(handlers::get_chat_stats))
        .with_state(state);

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    app_routes
        .merge(metrics_routes)
        .merge(health_router(health_state))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(http_timeout))
}
