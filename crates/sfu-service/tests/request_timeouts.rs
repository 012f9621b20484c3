//! Gateway request timeouts against a slow engine.
//!
//! A signaling request that outlives its timeout gets a `TIMEOUT` error, and
//! whatever the engine finishes afterwards must not stay attached to the peer.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use chat_store::ChatRoomSettings;
use common::types::TransportDirection;
use serde_json::{json, Value};
use sfu_service::actors::{ActorMetrics, RegistrySettings, RoomRegistryHandle};
use sfu_service::chat::ChatHub;
use sfu_service::signaling::{event_channel, EventStream, SessionSettings, SignalingSession};
use sfu_test_utils::{CloseOp, EngineOp, MockEngine};

const REQUEST_TIMEOUT: Duration = Duration::from_millis(50);
const ENGINE_DELAY: Duration = Duration::from_millis(200);

fn session_over(engine: Arc<MockEngine>) -> (RoomRegistryHandle, SignalingSession, EventStream) {
    let registry = RoomRegistryHandle::new(
        engine,
        RegistrySettings {
            engine_timeout: Duration::from_secs(2),
        },
        ActorMetrics::new(),
    );
    let (tx, rx) = event_channel();
    let session = SignalingSession::new(
        registry.clone(),
        ChatHub::new(ChatRoomSettings::default()),
        tx,
        SessionSettings {
            request_timeout: REQUEST_TIMEOUT,
            ..SessionSettings::default()
        },
    );
    (registry, session, rx)
}

async fn request(session: &mut SignalingSession, frame: Value) -> Value {
    let reply = session.handle_text(&frame.to_string()).await;
    serde_json::from_str(&reply.to_text().unwrap()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_create_transport_leaves_nothing_behind() {
    let engine = Arc::new(
        MockEngine::builder()
            .delay(EngineOp::CreateTransport, ENGINE_DELAY)
            .build(),
    );
    let (registry, mut session, _events) = session_over(Arc::clone(&engine));
    let peer_id = session.connection_id().to_string();

    let reply = request(
        &mut session,
        json!({ "id": 1, "type": "join-room", "room_id": "r1" }),
    )
    .await;
    assert_eq!(reply["type"], "response");

    let reply = request(
        &mut session,
        json!({ "id": 2, "type": "create-transport", "direction": "send" }),
    )
    .await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["error"]["code"], "TIMEOUT");

    // Let the engine finish the abandoned call
    tokio::time::sleep(ENGINE_DELAY * 2).await;
    assert_eq!(engine.closed(CloseOp::Transport).len(), 1);
    assert_eq!(engine.resource_counts().0, 0);
    let detail = registry
        .peer_detail("r1".to_string(), peer_id.clone())
        .await
        .unwrap()
        .unwrap();
    assert!(detail.transports.is_empty());

    // The peer is free to create its send transport again
    let room = registry.get_room("r1".to_string()).await.unwrap().unwrap();
    room.create_transport(peer_id, TransportDirection::Send)
        .await
        .unwrap();

    session.close().await;
    registry.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_join_leaves_no_peer() {
    let engine = Arc::new(
        MockEngine::builder()
            .delay(EngineOp::CreateRouter, ENGINE_DELAY)
            .build(),
    );
    let (registry, mut session, _events) = session_over(Arc::clone(&engine));

    let reply = request(
        &mut session,
        json!({ "id": 1, "type": "join-room", "room_id": "r1" }),
    )
    .await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["error"]["code"], "TIMEOUT");
    assert_eq!(session.room_id(), None);

    // The late join was undone along with the room it created
    assert!(registry.get_room("r1".to_string()).await.unwrap().is_none());
    assert!(engine.was_closed(CloseOp::Router, "r1"));

    session.close().await;
    registry.cancel();
}
