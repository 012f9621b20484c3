//! Integration tests for room orchestration.
//!
//! Drives the registry and room actors directly against `MockEngine` to cover
//! the join/produce/consume lifecycle, cascades, capability mismatches and
//! engine timeouts.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use common::types::{MediaKind, MediaSource, TransportDirection};
use sfu_service::actors::{
    ActorMetrics, ConsumeRequest, JoinResult, ProduceRequest, RegistrySettings, RoomActorHandle,
    RoomRegistryHandle,
};
use sfu_service::engine::{EngineError, RtpCapabilities, RtpParameters};
use sfu_service::errors::SfuError;
use sfu_service::signaling::{event_channel, EventSink, EventStream, ServerEvent};
use sfu_test_utils::fixtures::{
    audio_only_capabilities, client_capabilities, dtls_parameters, opus_rtp_parameters,
    vp8_rtp_parameters,
};
use sfu_test_utils::{CloseOp, EngineOp, MockEngine};

const ENGINE_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Helpers
// ============================================================================

struct TestPeer {
    id: String,
    room: RoomActorHandle,
    joined: JoinResult,
    events: EventStream,
}

impl TestPeer {
    fn drain_events(&mut self) -> Vec<ServerEvent> {
        std::iter::from_fn(|| self.events.try_recv().ok()).collect()
    }

    async fn send_transport(&self) -> String {
        let options = self
            .room
            .create_transport(self.id.clone(), TransportDirection::Send)
            .await
            .unwrap();
        self.room
            .connect_transport(self.id.clone(), options.id.clone(), dtls_parameters())
            .await
            .unwrap();
        options.id
    }

    async fn recv_transport(&self) -> String {
        let options = self
            .room
            .create_transport(self.id.clone(), TransportDirection::Recv)
            .await
            .unwrap();
        options.id
    }

    async fn produce(&self, transport_id: &str, kind: MediaKind, params: RtpParameters) -> String {
        self.room
            .produce(
                self.id.clone(),
                ProduceRequest {
                    transport_id: transport_id.to_string(),
                    kind,
                    rtp_parameters: params,
                    source: None,
                },
            )
            .await
            .unwrap()
            .id
    }

    async fn consume(
        &self,
        transport_id: &str,
        producer_id: &str,
        caps: RtpCapabilities,
    ) -> Result<String, SfuError> {
        self.room
            .consume(
                self.id.clone(),
                ConsumeRequest {
                    transport_id: transport_id.to_string(),
                    producer_id: producer_id.to_string(),
                    rtp_capabilities: caps,
                },
            )
            .await
            .map(|consumed| consumed.id)
    }
}

fn registry_with(engine: Arc<MockEngine>) -> RoomRegistryHandle {
    RoomRegistryHandle::new(
        engine,
        RegistrySettings {
            engine_timeout: ENGINE_TIMEOUT,
        },
        ActorMetrics::new(),
    )
}

async fn join(registry: &RoomRegistryHandle, room_id: &str, peer_id: &str) -> TestPeer {
    let (tx, events) = event_channel();
    let (room, joined) = registry
        .join_room(
            room_id.to_string(),
            peer_id.to_string(),
            peer_id.to_uppercase(),
            tx,
        )
        .await
        .unwrap();
    TestPeer {
        id: peer_id.to_string(),
        room,
        joined,
        events,
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_two_peer_scenario() {
    let engine = Arc::new(MockEngine::default());
    let registry = registry_with(Arc::clone(&engine));
    registry.create_room("r1".to_string()).await.unwrap();

    let mut p1 = join(&registry, "r1", "p1").await;
    assert!(p1.joined.peers.is_empty());
    let send = p1.send_transport().await;
    let prod1 = p1.produce(&send, MediaKind::Video, vp8_rtp_parameters()).await;

    let mut p2 = join(&registry, "r1", "p2").await;
    let seen: Vec<_> = p2
        .joined
        .peers
        .iter()
        .flat_map(|peer| peer.producers.iter().map(|p| p.producer_id.clone()))
        .collect();
    assert_eq!(seen, vec![prod1.clone()]);

    let recv = p2.recv_transport().await;
    let cons1 = p2
        .consume(&recv, &prod1, client_capabilities())
        .await
        .unwrap();
    assert_eq!(engine.consumer_paused(&cons1), Some(true));
    p1.drain_events();
    p2.drain_events();

    // p1 disconnects
    assert!(registry.leave_room("p1".to_string()).await.unwrap());
    assert!(engine.was_closed(CloseOp::Producer, &prod1));
    assert!(engine.was_closed(CloseOp::Consumer, &cons1));

    let events = p2.drain_events();
    assert!(events.contains(&ServerEvent::ConsumerClosed {
        consumer_id: cons1.clone(),
        producer_id: prod1.clone(),
    }));
    assert!(events.contains(&ServerEvent::ProducerClosed {
        producer_id: prod1.clone(),
        peer_id: "p1".to_string(),
    }));
    assert!(events.contains(&ServerEvent::PeerLeft {
        peer_id: "p1".to_string(),
    }));

    let detail = registry.room_detail("r1".to_string()).await.unwrap().unwrap();
    assert_eq!(detail.peers_count, 1);
    let p2_detail = registry
        .peer_detail("r1".to_string(), "p2".to_string())
        .await
        .unwrap()
        .unwrap();
    assert!(p2_detail.consumers.is_empty());

    // p2 leaves, the room goes with it
    assert!(registry.leave_room("p2".to_string()).await.unwrap());
    assert!(registry.get_room("r1".to_string()).await.unwrap().is_none());
    assert!(engine.was_closed(CloseOp::Router, "r1"));

    registry.cancel();
}

#[tokio::test]
async fn test_create_room_and_leave_are_idempotent() {
    let engine = Arc::new(MockEngine::default());
    let registry = registry_with(Arc::clone(&engine));

    let first = registry.create_room("r1".to_string()).await.unwrap();
    let second = registry.create_room("r1".to_string()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(engine.call_count(EngineOp::CreateRouter), 1);

    let _p1 = join(&registry, "r1", "p1").await;
    let mut p2 = join(&registry, "r1", "p2").await;
    p2.drain_events();

    assert!(registry.leave_room("p1".to_string()).await.unwrap());
    assert!(!registry.leave_room("p1".to_string()).await.unwrap());

    // One peer-left only
    let left: Vec<_> = p2
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, ServerEvent::PeerLeft { .. }))
        .collect();
    assert_eq!(left.len(), 1);

    registry.cancel();
}

#[tokio::test]
async fn test_join_snapshot_then_deltas() {
    let registry = registry_with(Arc::new(MockEngine::default()));

    let p1 = join(&registry, "r1", "p1").await;
    let send = p1.send_transport().await;
    let audio = p1.produce(&send, MediaKind::Audio, opus_rtp_parameters()).await;
    let video = p1.produce(&send, MediaKind::Video, vp8_rtp_parameters()).await;

    let mut p2 = join(&registry, "r1", "p2").await;
    let mut snapshot: Vec<_> = p2
        .joined
        .peers
        .iter()
        .flat_map(|peer| peer.producers.iter().map(|p| p.producer_id.clone()))
        .collect();
    snapshot.sort();
    let mut expected = vec![audio, video];
    expected.sort();
    assert_eq!(snapshot, expected);

    // Existing producers are not replayed as events
    assert!(p2.drain_events().is_empty());

    let screen = p1
        .room
        .produce(
            "p1".to_string(),
            ProduceRequest {
                transport_id: send.clone(),
                kind: MediaKind::Video,
                rtp_parameters: vp8_rtp_parameters(),
                source: Some(MediaSource::Screen),
            },
        )
        .await
        .unwrap();
    assert_eq!(
        p2.drain_events(),
        vec![ServerEvent::NewProducerAvailable {
            producer_id: screen.id,
            peer_id: "p1".to_string(),
            kind: MediaKind::Video,
            source: MediaSource::Screen,
        }]
    );

    registry.cancel();
}

#[tokio::test]
async fn test_slow_peer_overflows_without_stalling_the_room() {
    let registry = registry_with(Arc::new(MockEngine::default()));

    let (tx, mut slow_events) = EventSink::with_capacity(2);
    let overflow = slow_events.overflow_token();
    let (slow_room, _) = registry
        .join_room("r1".to_string(), "slow".to_string(), "Slow".to_string(), tx)
        .await
        .unwrap();

    let mut others = Vec::new();
    for i in 0..4 {
        others.push(join(&registry, "r1", &format!("p{i}")).await);
    }
    assert!(overflow.is_cancelled());

    // Queued events survive, the rest were dropped
    let mut queued = 0;
    while slow_events.try_recv().is_ok() {
        queued += 1;
    }
    assert_eq!(queued, 2);

    // The room keeps serving everyone else
    let detail = registry.room_detail("r1".to_string()).await.unwrap().unwrap();
    assert_eq!(detail.peers_count, 5);
    others.last().unwrap().recv_transport().await;
    assert!(slow_room
        .create_transport("slow".to_string(), TransportDirection::Recv)
        .await
        .is_ok());

    registry.cancel();
}

// ============================================================================
// Cascades and capabilities
// ============================================================================

#[tokio::test]
async fn test_close_producer_cascades_to_every_consumer() {
    let engine = Arc::new(MockEngine::default());
    let registry = registry_with(Arc::clone(&engine));

    let p1 = join(&registry, "r1", "p1").await;
    let send = p1.send_transport().await;
    let producer = p1.produce(&send, MediaKind::Audio, opus_rtp_parameters()).await;

    let mut consumers = Vec::new();
    let mut watchers = Vec::new();
    for id in ["p2", "p3"] {
        let mut peer = join(&registry, "r1", id).await;
        let recv = peer.recv_transport().await;
        let consumer = peer
            .consume(&recv, &producer, client_capabilities())
            .await
            .unwrap();
        peer.drain_events();
        consumers.push(consumer);
        watchers.push(peer);
    }

    p1.room
        .close_producer("p1".to_string(), producer.clone())
        .await
        .unwrap();

    for (peer, consumer) in watchers.iter_mut().zip(&consumers) {
        let events = peer.drain_events();
        assert!(events.contains(&ServerEvent::ConsumerClosed {
            consumer_id: consumer.clone(),
            producer_id: producer.clone(),
        }));
        let detail = registry
            .peer_detail("r1".to_string(), peer.id.clone())
            .await
            .unwrap()
            .unwrap();
        assert!(detail.consumers.iter().all(|c| &c.id != consumer));
        assert!(engine.was_closed(CloseOp::Consumer, consumer));
    }
    assert_eq!(engine.resource_counts().2, 0);

    // Closing again is a no-op
    p1.room
        .close_producer("p1".to_string(), producer)
        .await
        .unwrap();

    registry.cancel();
}

#[tokio::test]
async fn test_consume_with_disjoint_capabilities_leaves_no_consumer() {
    let engine = Arc::new(MockEngine::default());
    let registry = registry_with(Arc::clone(&engine));

    let p1 = join(&registry, "r1", "p1").await;
    let send = p1.send_transport().await;
    let video = p1.produce(&send, MediaKind::Video, vp8_rtp_parameters()).await;

    let p2 = join(&registry, "r1", "p2").await;
    let recv = p2.recv_transport().await;
    let err = p2
        .consume(&recv, &video, audio_only_capabilities())
        .await
        .unwrap_err();
    assert!(matches!(err, SfuError::EngineFailure(_)), "got {err:?}");

    let detail = registry
        .peer_detail("r1".to_string(), "p2".to_string())
        .await
        .unwrap()
        .unwrap();
    assert!(detail.consumers.is_empty());
    assert_eq!(engine.resource_counts().2, 0);

    registry.cancel();
}

#[tokio::test]
async fn test_engine_rejecting_consume_leaves_no_consumer() {
    let engine = Arc::new(MockEngine::builder().reject_capabilities().build());
    let registry = registry_with(Arc::clone(&engine));

    let p1 = join(&registry, "r1", "p1").await;
    let send = p1.send_transport().await;
    let audio = p1.produce(&send, MediaKind::Audio, opus_rtp_parameters()).await;

    let p2 = join(&registry, "r1", "p2").await;
    let recv = p2.recv_transport().await;
    let err = p2
        .consume(&recv, &audio, client_capabilities())
        .await
        .unwrap_err();
    assert!(matches!(err, SfuError::EngineFailure(_)), "got {err:?}");
    assert_eq!(engine.call_count(EngineOp::Consume), 1);

    let detail = registry
        .peer_detail("r1".to_string(), "p2".to_string())
        .await
        .unwrap()
        .unwrap();
    assert!(detail.consumers.is_empty());

    registry.cancel();
}

#[tokio::test]
async fn test_failed_router_creation_leaves_no_room() {
    let engine = Arc::new(
        MockEngine::builder()
            .fail(
                EngineOp::CreateRouter,
                EngineError::ResourceExhausted("workers".to_string()),
            )
            .build(),
    );
    let registry = registry_with(engine);

    let err = registry.create_room("r1".to_string()).await.unwrap_err();
    assert!(matches!(err, SfuError::EngineFailure(_)), "got {err:?}");
    assert!(registry.rooms_info().await.unwrap().is_empty());

    registry.cancel();
}

// ============================================================================
// Timeouts and concurrency
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_transport_timeout_closes_partial_resource() {
    let engine = Arc::new(
        MockEngine::builder()
            .hang(EngineOp::CreateTransport)
            .build(),
    );
    let registry = registry_with(Arc::clone(&engine));
    let p1 = join(&registry, "r1", "p1").await;

    let err = p1
        .room
        .create_transport("p1".to_string(), TransportDirection::Send)
        .await
        .unwrap_err();
    assert!(matches!(err, SfuError::EngineTimeout(_)), "got {err:?}");

    // The id the call would have created is closed explicitly
    assert_eq!(engine.closed(CloseOp::Transport).len(), 1);
    let detail = registry
        .peer_detail("r1".to_string(), "p1".to_string())
        .await
        .unwrap()
        .unwrap();
    assert!(detail.transports.is_empty());

    registry.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_in_flight_request_is_rejected() {
    let engine = Arc::new(
        MockEngine::builder()
            .hang(EngineOp::CreateTransport)
            .build(),
    );
    let registry = registry_with(Arc::clone(&engine));
    let p1 = join(&registry, "r1", "p1").await;

    let room = p1.room.clone();
    let first = tokio::spawn(async move {
        room.create_transport("p1".to_string(), TransportDirection::Send)
            .await
    });
    // Let the first request reach the engine
    tokio::task::yield_now().await;
    while engine.call_count(EngineOp::CreateTransport) == 0 {
        tokio::task::yield_now().await;
    }

    let err = p1
        .room
        .create_transport("p1".to_string(), TransportDirection::Send)
        .await
        .unwrap_err();
    assert!(matches!(err, SfuError::Conflict(_)), "got {err:?}");

    let first = first.await.unwrap().unwrap_err();
    assert!(matches!(first, SfuError::EngineTimeout(_)), "got {first:?}");
    assert_eq!(engine.call_count(EngineOp::CreateTransport), 1);

    registry.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_leave_during_in_flight_produce_closes_late_result() {
    let engine = Arc::new(MockEngine::builder().hang(EngineOp::Produce).build());
    let registry = registry_with(Arc::clone(&engine));
    let p1 = join(&registry, "r1", "p1").await;
    let send = p1.send_transport().await;

    let room = p1.room.clone();
    let transport_id = send.clone();
    let pending = tokio::spawn(async move {
        room.produce(
            "p1".to_string(),
            ProduceRequest {
                transport_id,
                kind: MediaKind::Audio,
                rtp_parameters: opus_rtp_parameters(),
                source: None,
            },
        )
        .await
    });
    while engine.call_count(EngineOp::Produce) == 0 {
        tokio::task::yield_now().await;
    }

    let _keep_room = join(&registry, "r1", "p2").await;
    assert!(registry.leave_room("p1".to_string()).await.unwrap());
    assert!(engine.was_closed(CloseOp::Transport, &send));

    let result = pending.await.unwrap();
    assert!(result.is_err());
    assert_eq!(engine.resource_counts().1, 0);

    registry.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_create_transport_is_rolled_back() {
    let engine = Arc::new(
        MockEngine::builder()
            .delay(EngineOp::CreateTransport, Duration::from_millis(200))
            .build(),
    );
    let registry = registry_with(Arc::clone(&engine));
    let p1 = join(&registry, "r1", "p1").await;

    // The caller stops waiting before the engine answers
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        p1.room
            .create_transport("p1".to_string(), TransportDirection::Send),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.call_count(EngineOp::CreateTransport), 1);
    assert_eq!(engine.closed(CloseOp::Transport).len(), 1);
    assert_eq!(engine.resource_counts().0, 0);
    let detail = registry
        .peer_detail("r1".to_string(), "p1".to_string())
        .await
        .unwrap()
        .unwrap();
    assert!(detail.transports.is_empty());

    // A send transport can be created again
    let options = p1
        .room
        .create_transport("p1".to_string(), TransportDirection::Send)
        .await
        .unwrap();
    let detail = registry
        .peer_detail("r1".to_string(), "p1".to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(detail.transports.len(), 1);
    assert!(!engine.was_closed(CloseOp::Transport, &options.id));

    registry.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_produce_is_rolled_back() {
    let engine = Arc::new(
        MockEngine::builder()
            .delay(EngineOp::Produce, Duration::from_millis(200))
            .build(),
    );
    let registry = registry_with(Arc::clone(&engine));
    let mut p1 = join(&registry, "r1", "p1").await;
    let mut p2 = join(&registry, "r1", "p2").await;
    let send = p1.send_transport().await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        p1.produce(&send, MediaKind::Audio, opus_rtp_parameters()),
    )
    .await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.closed(CloseOp::Producer).len(), 1);
    assert_eq!(engine.resource_counts().1, 0);
    let detail = registry
        .peer_detail("r1".to_string(), "p1".to_string())
        .await
        .unwrap()
        .unwrap();
    assert!(detail.producers.is_empty());

    // Whatever p2 heard about the producer ends with its closure
    let announced: Vec<_> = p2
        .drain_events()
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::NewProducerAvailable { producer_id, .. } => Some(producer_id),
            _ => None,
        })
        .collect();
    for producer_id in announced {
        assert!(engine.was_closed(CloseOp::Producer, &producer_id));
    }
    p1.drain_events();

    registry.cancel();
}
