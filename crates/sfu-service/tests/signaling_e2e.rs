//! End-to-end signaling tests over a real WebSocket.
//!
//! Spawns `TestSfuServer` on a random port and talks to `/ws` with
//! tokio-tungstenite, the way a browser client would.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sfu_test_utils::fixtures::{client_capabilities, dtls_parameters, opus_rtp_parameters};
use sfu_test_utils::TestSfuServer;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Test client
// ============================================================================

struct Client {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    /// Events received while waiting for responses.
    events: Vec<Value>,
}

impl Client {
    async fn connect(server: &TestSfuServer) -> Self {
        let (ws, _) = connect_async(server.ws_url()).await.unwrap();
        Self {
            ws,
            next_id: 1,
            events: Vec::new(),
        }
    }

    async fn next_frame(&mut self) -> Value {
        loop {
            let frame = tokio::time::timeout(FRAME_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("socket closed")
                .unwrap();
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string())).await.unwrap();
    }

    /// Send a request and wait for its response or error frame.
    async fn request(&mut self, mut body: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        body["id"] = json!(id);
        self.send_raw(&body.to_string()).await;

        loop {
            let frame = self.next_frame().await;
            if frame["type"] == "event" {
                self.events.push(frame);
            } else if frame["id"] == json!(id) {
                return frame;
            } else {
                panic!("unexpected frame: {frame}");
            }
        }
    }

    /// Response data, panicking on an error frame.
    async fn call(&mut self, body: Value) -> Value {
        let frame = self.request(body).await;
        assert_eq!(frame["type"], "response", "request failed: {frame}");
        frame["data"].clone()
    }

    /// Wait until an event of `name` arrives.
    async fn expect_event(&mut self, name: &str) -> Value {
        if let Some(pos) = self.events.iter().position(|e| e["event"] == name) {
            return self.events.remove(pos);
        }
        loop {
            let frame = self.next_frame().await;
            if frame["event"] == name {
                return frame;
            }
            self.events.push(frame);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_produce_consume_and_disconnect_over_websocket() {
    let server = TestSfuServer::spawn().await.unwrap();

    // Alice joins and produces audio
    let mut alice = Client::connect(&server).await;
    let joined = alice
        .call(json!({ "type": "join-room", "room_id": "r1", "name": "Alice" }))
        .await;
    assert_eq!(joined["room_id"], "r1");
    assert!(joined["peers"].as_array().unwrap().is_empty());
    let alice_id = joined["peer_id"].as_str().unwrap().to_string();

    let send = alice
        .call(json!({ "type": "create-transport", "direction": "send" }))
        .await;
    let send_id = send["id"].as_str().unwrap().to_string();
    assert!(!send["ice_candidates"].as_array().unwrap().is_empty());
    alice
        .call(json!({
            "type": "connect-transport",
            "transport_id": send_id,
            "dtls_parameters": dtls_parameters(),
        }))
        .await;
    let produced = alice
        .call(json!({
            "type": "produce",
            "transport_id": send_id,
            "kind": "audio",
            "rtp_parameters": opus_rtp_parameters(),
        }))
        .await;
    let producer_id = produced["id"].as_str().unwrap().to_string();
    assert_eq!(produced["source"], "microphone");

    // Bob joins and sees the producer in the join response
    let mut bob = Client::connect(&server).await;
    let joined = bob
        .call(json!({ "type": "join-room", "room_id": "r1", "name": "Bob" }))
        .await;
    assert_eq!(joined["peers"][0]["id"], alice_id.as_str());
    assert_eq!(
        joined["peers"][0]["producers"][0]["producer_id"],
        producer_id.as_str()
    );

    let peer_joined = alice.expect_event("peer-joined").await;
    assert_eq!(peer_joined["name"], "Bob");

    let recv = bob
        .call(json!({ "type": "create-transport", "direction": "recv" }))
        .await;
    let consumed = bob
        .call(json!({
            "type": "consume",
            "transport_id": recv["id"],
            "producer_id": producer_id,
            "rtp_capabilities": client_capabilities(),
        }))
        .await;
    assert_eq!(consumed["paused"], true);
    let consumer_id = consumed["id"].as_str().unwrap().to_string();
    bob.call(json!({ "type": "resume-consumer", "consumer_id": consumer_id }))
        .await;

    // Alice drops her socket
    alice.ws.close(None).await.unwrap();

    let closed = bob.expect_event("consumer-closed").await;
    assert_eq!(closed["consumer_id"], consumer_id.as_str());
    let closed = bob.expect_event("producer-closed").await;
    assert_eq!(closed["producer_id"], producer_id.as_str());
    let left = bob.expect_event("peer-left").await;
    assert_eq!(left["peer_id"], alice_id.as_str());

    let info = bob.call(json!({ "type": "room-info" })).await;
    assert_eq!(info["peers_count"], 1);

    // Bob leaves, the room is removed
    let left = bob.call(json!({ "type": "leave-room" })).await;
    assert_eq!(left["left"], true);
    let rooms = server.registry().rooms_info().await.unwrap();
    assert!(rooms.is_empty());
}

#[tokio::test]
async fn test_malformed_frames_get_errors_and_keep_the_connection() {
    let server = TestSfuServer::spawn().await.unwrap();
    let mut client = Client::connect(&server).await;

    client.send_raw("{ not json").await;
    let frame = client.next_frame().await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["error"]["code"], "BAD_REQUEST");

    client.send_raw(r#"{ "id": 9, "type": "no-such-request" }"#).await;
    let frame = client.next_frame().await;
    assert_eq!(frame["id"], 9);
    assert_eq!(frame["error"]["code"], "BAD_REQUEST");

    // Not in a room yet
    let frame = client
        .request(json!({ "type": "create-transport", "direction": "send" }))
        .await;
    assert_eq!(frame["type"], "error");
    assert_eq!(frame["error"]["code"], "NOT_FOUND");

    // Still usable
    let joined = client
        .call(json!({ "type": "join-room", "room_id": "r1" }))
        .await;
    assert_eq!(joined["room_id"], "r1");
}

/// Poll until `server` reports `expected` open connections.
async fn wait_for_connections(server: &TestSfuServer, expected: usize) {
    tokio::time::timeout(FRAME_TIMEOUT, async {
        while server.open_connections() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {expected} open connections, found {}",
            server.open_connections()
        )
    });
}

#[tokio::test]
async fn test_connection_count_is_per_server() {
    let busy = TestSfuServer::spawn().await.unwrap();
    let idle = TestSfuServer::spawn().await.unwrap();

    let mut client = Client::connect(&busy).await;
    client
        .call(json!({ "type": "join-room", "room_id": "r1" }))
        .await;
    wait_for_connections(&busy, 1).await;
    assert_eq!(idle.open_connections(), 0);

    client.ws.close(None).await.unwrap();
    wait_for_connections(&busy, 0).await;
    assert_eq!(idle.open_connections(), 0);
}

#[tokio::test]
async fn test_room_delete_notifies_connected_peers() {
    let server = TestSfuServer::spawn().await.unwrap();
    let mut client = Client::connect(&server).await;
    client
        .call(json!({ "type": "join-room", "room_id": "doomed" }))
        .await;

    server
        .registry()
        .delete_room("doomed".to_string())
        .await
        .unwrap();

    let closed = client.expect_event("room-closed").await;
    assert_eq!(closed["room_id"], "doomed");

    let frame = client.request(json!({ "type": "room-info" })).await;
    assert_eq!(frame["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_chat_round_trip() {
    let server = TestSfuServer::spawn().await.unwrap();
    let mut alice = Client::connect(&server).await;
    let mut bob = Client::connect(&server).await;

    alice
        .call(json!({ "type": "chat-join", "room_id": "c1", "name": "Alice" }))
        .await;
    let joined = bob
        .call(json!({ "type": "chat-join", "room_id": "c1", "name": "Bob" }))
        .await;
    assert_eq!(joined["participant"]["name"], "Bob");

    let notice = alice.expect_event("chat-system-message").await;
    assert!(notice["message"]["content"]
        .as_str()
        .unwrap()
        .contains("Bob"));

    let sent = bob
        .call(json!({ "type": "chat-send", "room_id": "c1", "content": "hello" }))
        .await;
    let message_id = sent["id"].as_str().unwrap().to_string();

    let received = alice.expect_event("chat-message").await;
    assert_eq!(received["message"]["content"], "hello");

    // Only the sender may delete
    let frame = alice
        .request(json!({ "type": "chat-delete", "room_id": "c1", "message_id": message_id }))
        .await;
    assert_eq!(frame["error"]["code"], "PERMISSION_DENIED");

    bob.call(json!({ "type": "chat-delete", "room_id": "c1", "message_id": message_id }))
        .await;
    let deleted = alice.expect_event("chat-message-deleted").await;
    assert_eq!(deleted["message_id"], message_id.as_str());

    assert_eq!(server.chat().message_count("c1"), 2);
}
