//! `RoomActor` - per-room actor that owns peers and their media resources.
//!
//! Each `RoomActor`:
//! - Holds the room's capability context (fixed at creation)
//! - Owns every peer's transports, producers and consumers
//! - Drives the media engine for transport handshakes, produce and consume
//! - Fans out producer/peer notifications to the peers' event sinks
//!
//! # Engine calls
//!
//! The mailbox never waits on the engine. A request is validated, recorded as
//! in flight for its peer, and the engine call is spawned under a timeout. The
//! outcome comes back on an internal completion channel and is applied in
//! mailbox order, so fan-out stays deterministic.
//!
//! - A second request with the same in-flight key for the same peer fails
//!   with `Conflict`.
//! - Each join gets a fresh epoch. A completion for a peer that has since
//!   left or re-joined closes what it created and fails with `NotFound`.
//! - A timed-out or panicking call closes its pre-allocated id.
//!
//! # Cascades
//!
//! Closing a producer closes every consumer of it (`consumer-closed` to each
//! holder, `producer-closed` to the room). Closing a transport closes the
//! producers and consumers bound to it. A leaving peer's producers cascade
//! the same way before `peer-left` is sent.

use super::messages::{
    ConsumeRequest, ConsumeResult, ConsumerInfo, JoinResult, LeaveOutcome, PeerDetail, PeerInfo,
    PeerSummary, ProduceRequest, ProduceResult, ProducerInfo, ProducerSummary, RoomDetail,
    RoomMessage, ScreenShareSession, TransportInfo,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use crate::engine::{
    capabilities, ConsumerParameters, DtlsParameters, EngineError, MediaEngine, ProducerType,
    RtpCapabilities, RtpParameters, TransportOptions,
};
use crate::errors::SfuError;
use crate::observability::metrics as prom;
use crate::signaling::{EventSink, ServerEvent};
use chrono::{DateTime, Utc};
use common::types::{MediaKind, MediaSource, TransportDirection};
use futures::FutureExt;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Run one engine call under `timeout`, catching panics.
///
/// Records `sfu_engine_calls_total` and the call duration.
pub(crate) async fn call_engine<T, F>(
    operation: &'static str,
    timeout: Duration,
    call: F,
) -> Result<T, SfuError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, AssertUnwindSafe(call).catch_unwind()).await;

    let (status, result) = match outcome {
        Ok(Ok(Ok(value))) => ("success", Ok(value)),
        Ok(Ok(Err(e))) => ("error", Err(SfuError::from(e))),
        Ok(Err(_panic)) => (
            "panic",
            Err(SfuError::Internal(format!(
                "media engine panicked during {operation}"
            ))),
        ),
        Err(_elapsed) => ("timeout", Err(SfuError::EngineTimeout(operation.to_string()))),
    };

    prom::record_engine_call(operation, status, started.elapsed());
    result
}

/// Handle to a `RoomActor`.
#[derive(Debug, Clone)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: String,
    rtp_capabilities: Arc<RtpCapabilities>,
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// The room's negotiated capability context.
    #[must_use]
    pub fn rtp_capabilities(&self) -> &RtpCapabilities {
        &self.rtp_capabilities
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, SfuError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|e| SfuError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SfuError::Internal(format!("response receive failed: {e}")))
    }

    /// Add a peer. Its notifications go to `events`.
    pub async fn join(
        &self,
        peer_id: String,
        display_name: String,
        events: EventSink,
    ) -> Result<JoinResult, SfuError> {
        self.request(|respond_to| RoomMessage::Join {
            peer_id,
            display_name,
            events,
            respond_to,
        })
        .await?
    }

    /// Remove a peer and everything it owns. Idempotent.
    pub async fn leave(&self, peer_id: String) -> Result<LeaveOutcome, SfuError> {
        self.request(|respond_to| RoomMessage::Leave {
            peer_id,
            respond_to,
        })
        .await
    }

    /// Remove every peer. Returns the removed peer ids.
    pub async fn close_room(&self) -> Result<Vec<String>, SfuError> {
        self.request(|respond_to| RoomMessage::CloseRoom { respond_to })
            .await
    }

    pub async fn create_transport(
        &self,
        peer_id: String,
        direction: TransportDirection,
    ) -> Result<TransportOptions, SfuError> {
        self.request(|respond_to| RoomMessage::CreateTransport {
            peer_id,
            direction,
            respond_to,
        })
        .await?
    }

    /// Complete a transport's DTLS handshake. A failed handshake closes the
    /// transport.
    pub async fn connect_transport(
        &self,
        peer_id: String,
        transport_id: String,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), SfuError> {
        self.request(|respond_to| RoomMessage::ConnectTransport {
            peer_id,
            transport_id,
            dtls_parameters,
            respond_to,
        })
        .await?
    }

    pub async fn close_transport(
        &self,
        peer_id: String,
        transport_id: String,
    ) -> Result<(), SfuError> {
        self.request(|respond_to| RoomMessage::CloseTransport {
            peer_id,
            transport_id,
            respond_to,
        })
        .await?
    }

    /// Create a producer. Every other peer is notified before this returns.
    pub async fn produce(
        &self,
        peer_id: String,
        request: ProduceRequest,
    ) -> Result<ProduceResult, SfuError> {
        self.request(|respond_to| RoomMessage::Produce {
            peer_id,
            request,
            respond_to,
        })
        .await?
    }

    pub async fn consume(
        &self,
        peer_id: String,
        request: ConsumeRequest,
    ) -> Result<ConsumeResult, SfuError> {
        self.request(|respond_to| RoomMessage::Consume {
            peer_id,
            request,
            respond_to,
        })
        .await?
    }

    pub async fn pause_producer(
        &self,
        peer_id: String,
        producer_id: String,
    ) -> Result<(), SfuError> {
        self.set_producer_paused(peer_id, producer_id, true).await
    }

    pub async fn resume_producer(
        &self,
        peer_id: String,
        producer_id: String,
    ) -> Result<(), SfuError> {
        self.set_producer_paused(peer_id, producer_id, false).await
    }

    async fn set_producer_paused(
        &self,
        peer_id: String,
        producer_id: String,
        paused: bool,
    ) -> Result<(), SfuError> {
        self.request(|respond_to| RoomMessage::SetProducerPaused {
            peer_id,
            producer_id,
            paused,
            respond_to,
        })
        .await?
    }

    pub async fn pause_consumer(
        &self,
        peer_id: String,
        consumer_id: String,
    ) -> Result<(), SfuError> {
        self.set_consumer_paused(peer_id, consumer_id, true).await
    }

    pub async fn resume_consumer(
        &self,
        peer_id: String,
        consumer_id: String,
    ) -> Result<(), SfuError> {
        self.set_consumer_paused(peer_id, consumer_id, false).await
    }

    async fn set_consumer_paused(
        &self,
        peer_id: String,
        consumer_id: String,
        paused: bool,
    ) -> Result<(), SfuError> {
        self.request(|respond_to| RoomMessage::SetConsumerPaused {
            peer_id,
            consumer_id,
            paused,
            respond_to,
        })
        .await?
    }

    /// Close a producer and every consumer of it. Closing an unknown id is a no-op.
    pub async fn close_producer(
        &self,
        peer_id: String,
        producer_id: String,
    ) -> Result<(), SfuError> {
        self.request(|respond_to| RoomMessage::CloseProducer {
            peer_id,
            producer_id,
            respond_to,
        })
        .await?
    }

    /// Close a consumer. The producer is unaffected.
    pub async fn close_consumer(
        &self,
        peer_id: String,
        consumer_id: String,
    ) -> Result<(), SfuError> {
        self.request(|respond_to| RoomMessage::CloseConsumer {
            peer_id,
            consumer_id,
            respond_to,
        })
        .await?
    }

    pub async fn get_state(&self) -> Result<RoomDetail, SfuError> {
        self.request(|respond_to| RoomMessage::GetState { respond_to })
            .await
    }

    pub async fn get_peer(&self, peer_id: String) -> Result<Option<PeerDetail>, SfuError> {
        self.request(|respond_to| RoomMessage::GetPeer {
            peer_id,
            respond_to,
        })
        .await
    }

    pub async fn screen_share(&self) -> Result<Option<ScreenShareSession>, SfuError> {
        self.request(|respond_to| RoomMessage::GetScreenShare { respond_to })
            .await
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// A cancelled room has been removed from the registry.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

#[derive(Debug)]
struct Transport {
    id: String,
    direction: TransportDirection,
    connected: bool,
    closed: bool,
}

#[derive(Debug)]
struct Producer {
    id: String,
    kind: MediaKind,
    source: MediaSource,
    paused: bool,
    producer_type: ProducerType,
    transport_id: String,
    rtp_parameters: RtpParameters,
}

#[derive(Debug)]
struct Consumer {
    id: String,
    kind: MediaKind,
    paused: bool,
    producer_type: ProducerType,
    producer_id: String,
    transport_id: String,
}

/// Operations that must not run twice at once for the same peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum InFlight {
    CreateTransport(TransportDirection),
    ConnectTransport(String),
    Produce {
        transport_id: String,
        source: MediaSource,
    },
    Consume(String),
}

impl InFlight {
    fn describe(&self) -> String {
        match self {
            InFlight::CreateTransport(direction) => format!("create-transport ({direction})"),
            InFlight::ConnectTransport(id) => format!("connect-transport for {id}"),
            InFlight::Produce {
                transport_id,
                source,
            } => format!("produce ({}) on {transport_id}", source.as_str()),
            InFlight::Consume(producer_id) => format!("consume of {producer_id}"),
        }
    }
}

#[derive(Debug)]
struct Peer {
    id: String,
    name: String,
    joined_at: DateTime<Utc>,
    epoch: u64,
    events: EventSink,
    transports: HashMap<String, Transport>,
    producers: HashMap<String, Producer>,
    consumers: HashMap<String, Consumer>,
    in_flight: HashSet<InFlight>,
}

impl Peer {
    fn notify(&self, event: ServerEvent) {
        // A dropped event means the connection is closing or being cut off
        // for falling behind; either way it leaves
        self.events.send(event);
    }

    fn own_transport(
        &self,
        transport_id: &str,
        direction: TransportDirection,
    ) -> Result<&Transport, SfuError> {
        let transport = self
            .transports
            .get(transport_id)
            .ok_or_else(|| SfuError::NotFound(format!("Transport {transport_id} not found")))?;
        if transport.direction != direction {
            return Err(SfuError::InvalidState(format!(
                "Transport {transport_id} is not a {direction} transport"
            )));
        }
        if transport.closed {
            return Err(SfuError::InvalidState(format!(
                "Transport {transport_id} is closed"
            )));
        }
        Ok(transport)
    }

    fn summary(&self) -> PeerSummary {
        PeerSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            producers: self
                .producers
                .values()
                .map(|p| ProducerSummary {
                    producer_id: p.id.clone(),
                    kind: p.kind,
                    source: p.source,
                    paused: p.paused,
                })
                .collect(),
        }
    }

    fn info(&self) -> PeerInfo {
        PeerInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            joined_at: self.joined_at,
            transports_count: self.transports.values().filter(|t| !t.closed).count(),
            producers_count: self.producers.len(),
            consumers_count: self.consumers.len(),
        }
    }

    fn detail(&self) -> PeerDetail {
        PeerDetail {
            id: self.id.clone(),
            name: self.name.clone(),
            joined_at: self.joined_at,
            transports: self
                .transports
                .values()
                .map(|t| TransportInfo {
                    id: t.id.clone(),
                    direction: t.direction,
                    connected: t.connected,
                    closed: t.closed,
                })
                .collect(),
            producers: self
                .producers
                .values()
                .map(|p| ProducerInfo {
                    id: p.id.clone(),
                    kind: p.kind,
                    source: p.source,
                    paused: p.paused,
                    producer_type: p.producer_type,
                })
                .collect(),
            consumers: self
                .consumers
                .values()
                .map(|c| ConsumerInfo {
                    id: c.id.clone(),
                    kind: c.kind,
                    paused: c.paused,
                    producer_type: c.producer_type,
                    producer_id: c.producer_id.clone(),
                })
                .collect(),
        }
    }
}

fn peer_not_found(peer_id: &str) -> SfuError {
    SfuError::NotFound(format!("Peer {peer_id} is not in this room"))
}

fn peer_gone(peer_id: &str) -> SfuError {
    SfuError::NotFound(format!("Peer {peer_id} left before the operation completed"))
}

/// Resource to close when an engine call does not come back.
enum Cleanup {
    Transport(String),
    Producer(String),
    Consumer(String),
}

impl Cleanup {
    fn run(&self, engine: &dyn MediaEngine) {
        match self {
            Cleanup::Transport(id) => engine.close_transport(id),
            Cleanup::Producer(id) => engine.close_producer(id),
            Cleanup::Consumer(id) => engine.close_consumer(id),
        }
    }
}

/// Outcome of a spawned engine call, applied back on the actor.
enum Completion {
    TransportCreated {
        peer_id: String,
        epoch: u64,
        direction: TransportDirection,
        transport_id: String,
        result: Result<TransportOptions, SfuError>,
        respond_to: oneshot::Sender<Result<TransportOptions, SfuError>>,
    },
    TransportConnected {
        peer_id: String,
        epoch: u64,
        transport_id: String,
        result: Result<(), SfuError>,
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    },
    Produced {
        peer_id: String,
        epoch: u64,
        producer_id: String,
        source: MediaSource,
        request: ProduceRequest,
        result: Result<ProducerType, SfuError>,
        respond_to: oneshot::Sender<Result<ProduceResult, SfuError>>,
    },
    Consumed {
        peer_id: String,
        epoch: u64,
        consumer_id: String,
        transport_id: String,
        producer_id: String,
        result: Result<ConsumerParameters, SfuError>,
        respond_to: oneshot::Sender<Result<ConsumeResult, SfuError>>,
    },
}

impl Completion {
    /// The room is gone: close whatever was created and fail the request.
    fn abandon(self, engine: &dyn MediaEngine) {
        let closed = || SfuError::NotFound("Room closed".to_string());
        match self {
            Completion::TransportCreated {
                transport_id,
                respond_to,
                ..
            } => {
                engine.close_transport(&transport_id);
                let _ = respond_to.send(Err(closed()));
            }
            Completion::TransportConnected { respond_to, .. } => {
                let _ = respond_to.send(Err(closed()));
            }
            Completion::Produced {
                producer_id,
                respond_to,
                ..
            } => {
                engine.close_producer(&producer_id);
                let _ = respond_to.send(Err(closed()));
            }
            Completion::Consumed {
                consumer_id,
                respond_to,
                ..
            } => {
                engine.close_consumer(&consumer_id);
                let _ = respond_to.send(Err(closed()));
            }
        }
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: String,
    receiver: mpsc::Receiver<RoomMessage>,
    completion_tx: mpsc::Sender<Completion>,
    completion_rx: mpsc::Receiver<Completion>,
    /// Child of the registry's token.
    cancel_token: CancellationToken,
    engine: Arc<dyn MediaEngine>,
    engine_timeout: Duration,
    rtp_capabilities: Arc<RtpCapabilities>,
    peers: HashMap<String, Peer>,
    next_epoch: u64,
    screen_share: Option<ScreenShareSession>,
    /// Producer id of a screen share whose engine call is still running.
    screen_share_pending: Option<String>,
    created_at: DateTime<Utc>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a room actor around an already created router.
    pub fn spawn(
        room_id: String,
        rtp_capabilities: RtpCapabilities,
        engine: Arc<dyn MediaEngine>,
        engine_timeout: Duration,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let (completion_tx, completion_rx) = mpsc::channel(ROOM_CHANNEL_BUFFER);
        let rtp_capabilities = Arc::new(rtp_capabilities);

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            completion_tx,
            completion_rx,
            cancel_token: cancel_token.clone(),
            engine,
            engine_timeout,
            rtp_capabilities: Arc::clone(&rtp_capabilities),
            peers: HashMap::new(),
            next_epoch: 1,
            screen_share: None,
            screen_share_pending: None,
            created_at: Utc::now(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, &room_id),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
            rtp_capabilities,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "sfu.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(target: "sfu.actor.room", room_id = %self.room_id, "RoomActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sfu.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                // The actor holds a sender, so this channel never closes
                Some(completion) = self.completion_rx.recv() => {
                    self.apply_completion(completion);
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "sfu.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            self.graceful_shutdown();
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sfu.actor.room",
            room_id = %self.room_id,
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "RoomActor stopped"
        );
    }

    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                peer_id,
                display_name,
                events,
                respond_to,
            } => {
                let result = self.handle_join(peer_id, display_name, events);
                let _ = respond_to.send(Ok(result));
            }

            RoomMessage::Leave {
                peer_id,
                respond_to,
            } => {
                let removed = self.remove_peer(&peer_id);
                let _ = respond_to.send(LeaveOutcome {
                    removed,
                    remaining_peers: self.peers.len(),
                });
            }

            RoomMessage::CloseRoom { respond_to } => {
                let removed = self.close_all_peers();
                let _ = respond_to.send(removed);
            }

            RoomMessage::CreateTransport {
                peer_id,
                direction,
                respond_to,
            } => self.start_create_transport(peer_id, direction, respond_to),

            RoomMessage::ConnectTransport {
                peer_id,
                transport_id,
                dtls_parameters,
                respond_to,
            } => self.start_connect_transport(peer_id, transport_id, dtls_parameters, respond_to),

            RoomMessage::CloseTransport {
                peer_id,
                transport_id,
                respond_to,
            } => {
                let result = if self.peers.contains_key(&peer_id) {
                    self.close_transport(&peer_id, &transport_id);
                    Ok(())
                } else {
                    Err(peer_not_found(&peer_id))
                };
                let _ = respond_to.send(result);
            }

            RoomMessage::Produce {
                peer_id,
                request,
                respond_to,
            } => self.start_produce(peer_id, request, respond_to),

            RoomMessage::Consume {
                peer_id,
                request,
                respond_to,
            } => self.start_consume(peer_id, request, respond_to),

            RoomMessage::SetProducerPaused {
                peer_id,
                producer_id,
                paused,
                respond_to,
            } => {
                let result = self.set_producer_paused(&peer_id, &producer_id, paused);
                let _ = respond_to.send(result);
            }

            RoomMessage::SetConsumerPaused {
                peer_id,
                consumer_id,
                paused,
                respond_to,
            } => {
                let result = self.set_consumer_paused(&peer_id, &consumer_id, paused);
                let _ = respond_to.send(result);
            }

            RoomMessage::CloseProducer {
                peer_id,
                producer_id,
                respond_to,
            } => {
                let result = if self.peers.contains_key(&peer_id) {
                    self.close_producer(&peer_id, &producer_id);
                    Ok(())
                } else {
                    Err(peer_not_found(&peer_id))
                };
                let _ = respond_to.send(result);
            }

            RoomMessage::CloseConsumer {
                peer_id,
                consumer_id,
                respond_to,
            } => {
                let result = match self.peers.get_mut(&peer_id) {
                    Some(peer) => {
                        if peer.consumers.remove(&consumer_id).is_some() {
                            self.engine.close_consumer(&consumer_id);
                        }
                        Ok(())
                    }
                    None => Err(peer_not_found(&peer_id)),
                };
                let _ = respond_to.send(result);
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.detail());
            }

            RoomMessage::GetPeer {
                peer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.peers.get(&peer_id).map(Peer::detail));
            }

            RoomMessage::GetScreenShare { respond_to } => {
                let _ = respond_to.send(self.screen_share.clone());
            }
        }
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    fn handle_join(&mut self, peer_id: String, name: String, events: EventSink) -> JoinResult {
        // Rejoin with the same id always starts from scratch
        if self.remove_peer(&peer_id) {
            debug!(
                target: "sfu.actor.room",
                room_id = %self.room_id,
                peer_id = %peer_id,
                "Peer rejoined, previous resources closed"
            );
        }

        let mut peers: Vec<&Peer> = self.peers.values().collect();
        peers.sort_by_key(|p| p.joined_at);
        let others = peers.into_iter().map(Peer::summary).collect();

        self.broadcast(
            &peer_id,
            &ServerEvent::PeerJoined {
                peer_id: peer_id.clone(),
                name: name.clone(),
            },
        );

        let epoch = self.next_epoch;
        self.next_epoch += 1;
        self.peers.insert(
            peer_id.clone(),
            Peer {
                id: peer_id.clone(),
                name,
                joined_at: Utc::now(),
                epoch,
                events,
                transports: HashMap::new(),
                producers: HashMap::new(),
                consumers: HashMap::new(),
                in_flight: HashSet::new(),
            },
        );

        info!(
            target: "sfu.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            peers = self.peers.len(),
            "Peer joined room"
        );

        JoinResult {
            room_id: self.room_id.clone(),
            peer_id,
            rtp_capabilities: (*self.rtp_capabilities).clone(),
            peers: others,
        }
    }

    /// Tear a peer down. Returns `false` if it was not in the room.
    fn remove_peer(&mut self, peer_id: &str) -> bool {
        let Some(peer) = self.peers.remove(peer_id) else {
            return false;
        };

        for producer_id in peer.producers.keys() {
            self.retire_producer(peer_id, producer_id);
        }
        for consumer_id in peer.consumers.keys() {
            self.engine.close_consumer(consumer_id);
        }
        for transport in peer.transports.values().filter(|t| !t.closed) {
            self.engine.close_transport(&transport.id);
        }

        self.broadcast(
            peer_id,
            &ServerEvent::PeerLeft {
                peer_id: peer_id.to_string(),
            },
        );

        info!(
            target: "sfu.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            producers = peer.producers.len(),
            consumers = peer.consumers.len(),
            remaining = self.peers.len(),
            "Peer left room"
        );
        true
    }

    fn close_all_peers(&mut self) -> Vec<String> {
        let peer_ids: Vec<String> = self.peers.keys().cloned().collect();
        for peer in self.peers.values() {
            peer.notify(ServerEvent::RoomClosed {
                room_id: self.room_id.clone(),
            });
        }
        for peer_id in &peer_ids {
            self.remove_peer(peer_id);
        }
        peer_ids
    }

    fn broadcast(&self, except_peer_id: &str, event: &ServerEvent) {
        for peer in self.peers.values() {
            if peer.id != except_peer_id {
                peer.notify(event.clone());
            }
        }
    }

    // ------------------------------------------------------------------
    // Engine call plumbing
    // ------------------------------------------------------------------

    /// Check a request against its peer and mark it in flight.
    /// Returns the peer's join epoch.
    fn begin_operation(
        &mut self,
        peer_id: &str,
        key: InFlight,
        check: impl FnOnce(&Peer) -> Result<(), SfuError>,
    ) -> Result<u64, SfuError> {
        let peer = self
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| peer_not_found(peer_id))?;
        if peer.in_flight.contains(&key) {
            return Err(SfuError::Conflict(format!(
                "{} is already in progress",
                key.describe()
            )));
        }
        check(&*peer)?;
        peer.in_flight.insert(key);
        Ok(peer.epoch)
    }

    /// Clear an in-flight key. Returns the peer only if it is still the same join.
    fn finish_operation(&mut self, peer_id: &str, epoch: u64, key: &InFlight) -> Option<&mut Peer> {
        let peer = self.peers.get_mut(peer_id)?;
        if peer.epoch != epoch {
            return None;
        }
        peer.in_flight.remove(key);
        Some(peer)
    }

    fn spawn_engine_call<T, F>(
        &self,
        operation: &'static str,
        call: F,
        cleanup: Cleanup,
        complete: impl FnOnce(Result<T, SfuError>) -> Completion + Send + 'static,
    ) where
        T: Send + 'static,
        F: Future<Output = Result<T, EngineError>> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        let completions = self.completion_tx.clone();
        let timeout = self.engine_timeout;
        let room_id = self.room_id.clone();

        tokio::spawn(async move {
            let result = call_engine(operation, timeout, call).await;
            if let Err(e @ (SfuError::EngineTimeout(_) | SfuError::Internal(_))) = &result {
                warn!(
                    target: "sfu.actor.room",
                    room_id = %room_id,
                    operation,
                    error = %e,
                    "Engine call did not complete, closing partial resource"
                );
                cleanup.run(engine.as_ref());
            }
            if let Err(mpsc::error::SendError(completion)) =
                completions.send(complete(result)).await
            {
                completion.abandon(engine.as_ref());
            }
        });
    }

    /// Apply an engine result. If the caller stopped waiting (its request
    /// timed out upstream), whatever the call created is closed again so the
    /// room holds nothing the client was told had failed.
    fn apply_completion(&mut self, completion: Completion) {
        match completion {
            Completion::TransportCreated {
                peer_id,
                epoch,
                direction,
                transport_id,
                result,
                respond_to,
            } => {
                let result = self.complete_create_transport(
                    &peer_id,
                    epoch,
                    direction,
                    transport_id.clone(),
                    result,
                );
                if let Err(Ok(_)) = respond_to.send(result) {
                    self.log_abandoned(&peer_id, "create_transport");
                    self.discard_transport(&peer_id, &transport_id);
                }
            }
            Completion::TransportConnected {
                peer_id,
                epoch,
                transport_id,
                result,
                respond_to,
            } => {
                let result =
                    self.complete_connect_transport(&peer_id, epoch, &transport_id, result);
                if let Err(Ok(())) = respond_to.send(result) {
                    // The client cannot know the handshake state, so the
                    // transport has to be recreated
                    self.log_abandoned(&peer_id, "connect_transport");
                    self.discard_transport(&peer_id, &transport_id);
                }
            }
            Completion::Produced {
                peer_id,
                epoch,
                producer_id,
                source,
                request,
                result,
                respond_to,
            } => {
                let result =
                    self.complete_produce(&peer_id, epoch, producer_id, source, request, result);
                if let Err(Ok(produced)) = respond_to.send(result) {
                    self.log_abandoned(&peer_id, "produce");
                    self.close_producer(&peer_id, &produced.id);
                }
            }
            Completion::Consumed {
                peer_id,
                epoch,
                consumer_id,
                transport_id,
                producer_id,
                result,
                respond_to,
            } => {
                let result = self.complete_consume(
                    &peer_id,
                    epoch,
                    consumer_id,
                    transport_id,
                    producer_id,
                    result,
                );
                if let Err(Ok(consumed)) = respond_to.send(result) {
                    self.log_abandoned(&peer_id, "consume");
                    if let Some(peer) = self.peers.get_mut(&peer_id) {
                        peer.consumers.remove(&consumed.id);
                    }
                    self.engine.close_consumer(&consumed.id);
                }
            }
        }
    }

    fn log_abandoned(&self, peer_id: &str, operation: &'static str) {
        warn!(
            target: "sfu.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            operation,
            "Caller gave up before the engine call finished, rolling back"
        );
    }

    fn log_internal(&self, peer_id: &str, result: &Result<impl Sized, SfuError>) {
        if let Err(SfuError::Internal(detail)) = result {
            error!(
                target: "sfu.actor.room",
                room_id = %self.room_id,
                peer_id = %peer_id,
                error = %detail,
                "Engine call failed unexpectedly"
            );
        }
    }

    // ------------------------------------------------------------------
    // Transports
    // ------------------------------------------------------------------

    fn start_create_transport(
        &mut self,
        peer_id: String,
        direction: TransportDirection,
        respond_to: oneshot::Sender<Result<TransportOptions, SfuError>>,
    ) {
        let check = |peer: &Peer| {
            let active = peer
                .transports
                .values()
                .any(|t| t.direction == direction && !t.closed);
            if active {
                return Err(SfuError::InvalidState(format!(
                    "Peer already has an active {direction} transport"
                )));
            }
            Ok(())
        };
        let in_flight = InFlight::CreateTransport(direction);
        let epoch = match self.begin_operation(&peer_id, in_flight, check) {
            Ok(epoch) => epoch,
            Err(e) => {
                let _ = respond_to.send(Err(e));
                return;
            }
        };

        let transport_id = Uuid::new_v4().to_string();
        let engine = Arc::clone(&self.engine);
        let room_id = self.room_id.clone();
        let id = transport_id.clone();
        self.spawn_engine_call(
            "create_transport",
            async move { engine.create_transport(&room_id, &id, direction).await },
            Cleanup::Transport(transport_id.clone()),
            move |result| Completion::TransportCreated {
                peer_id,
                epoch,
                direction,
                transport_id,
                result,
                respond_to,
            },
        );
    }

    fn complete_create_transport(
        &mut self,
        peer_id: &str,
        epoch: u64,
        direction: TransportDirection,
        transport_id: String,
        result: Result<TransportOptions, SfuError>,
    ) -> Result<TransportOptions, SfuError> {
        self.log_internal(peer_id, &result);
        let Some(peer) =
            self.finish_operation(peer_id, epoch, &InFlight::CreateTransport(direction))
        else {
            if result.is_ok() {
                self.engine.close_transport(&transport_id);
            }
            return Err(peer_gone(peer_id));
        };
        let options = result?;

        peer.transports.insert(
            transport_id.clone(),
            Transport {
                id: transport_id.clone(),
                direction,
                connected: false,
                closed: false,
            },
        );
        debug!(
            target: "sfu.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            transport_id = %transport_id,
            direction = direction.as_str(),
            "Transport created"
        );
        Ok(options)
    }

    fn start_connect_transport(
        &mut self,
        peer_id: String,
        transport_id: String,
        dtls_parameters: DtlsParameters,
        respond_to: oneshot::Sender<Result<(), SfuError>>,
    ) {
        let check = |peer: &Peer| {
            let transport = peer.transports.get(&transport_id).ok_or_else(|| {
                SfuError::NotFound(format!("Transport {transport_id} not found"))
            })?;
            if transport.closed {
                return Err(SfuError::InvalidState(format!(
                    "Transport {transport_id} is closed"
                )));
            }
            if transport.connected {
                return Err(SfuError::InvalidState(format!(
                    "Transport {transport_id} is already connected"
                )));
            }
            Ok(())
        };
        let key = InFlight::ConnectTransport(transport_id.clone());
        let epoch = match self.begin_operation(&peer_id, key, check) {
            Ok(epoch) => epoch,
            Err(e) => {
                let _ = respond_to.send(Err(e));
                return;
            }
        };

        let engine = Arc::clone(&self.engine);
        let id = transport_id.clone();
        self.spawn_engine_call(
            "connect_transport",
            async move { engine.connect_transport(&id, &dtls_parameters).await },
            Cleanup::Transport(transport_id.clone()),
            move |result| Completion::TransportConnected {
                peer_id,
                epoch,
                transport_id,
                result,
                respond_to,
            },
        );
    }

    fn complete_connect_transport(
        &mut self,
        peer_id: &str,
        epoch: u64,
        transport_id: &str,
        result: Result<(), SfuError>,
    ) -> Result<(), SfuError> {
        self.log_internal(peer_id, &result);
        let key = InFlight::ConnectTransport(transport_id.to_string());
        let Some(peer) = self.finish_operation(peer_id, epoch, &key) else {
            return Err(peer_gone(peer_id));
        };

        if let Err(e) = result {
            warn!(
                target: "sfu.actor.room",
                room_id = %self.room_id,
                peer_id = %peer_id,
                transport_id = %transport_id,
                error = %e,
                "Transport handshake failed, closing transport"
            );
            self.close_transport(peer_id, transport_id);
            return Err(e);
        }

        match peer.transports.get_mut(transport_id) {
            Some(transport) if !transport.closed => {
                transport.connected = true;
                debug!(
                    target: "sfu.actor.room",
                    room_id = %self.room_id,
                    peer_id = %peer_id,
                    transport_id = %transport_id,
                    "Transport connected"
                );
                Ok(())
            }
            _ => Err(SfuError::InvalidState(format!(
                "Transport {transport_id} was closed during the handshake"
            ))),
        }
    }

    /// Close a transport and the producers/consumers bound to it.
    fn close_transport(&mut self, peer_id: &str, transport_id: &str) {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return;
        };
        let Some(transport) = peer.transports.get_mut(transport_id) else {
            return;
        };
        if transport.closed {
            return;
        }
        transport.closed = true;

        let consumer_ids: Vec<String> = peer
            .consumers
            .values()
            .filter(|c| c.transport_id == transport_id)
            .map(|c| c.id.clone())
            .collect();
        for consumer_id in &consumer_ids {
            peer.consumers.remove(consumer_id);
        }
        let producer_ids: Vec<String> = peer
            .producers
            .values()
            .filter(|p| p.transport_id == transport_id)
            .map(|p| p.id.clone())
            .collect();

        self.engine.close_transport(transport_id);
        for consumer_id in &consumer_ids {
            self.engine.close_consumer(consumer_id);
        }
        for producer_id in &producer_ids {
            self.close_producer(peer_id, producer_id);
        }

        debug!(
            target: "sfu.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            transport_id = %transport_id,
            producers = producer_ids.len(),
            consumers = consumer_ids.len(),
            "Transport closed"
        );
    }

    /// Close a transport and forget it, so a new one of the same direction
    /// can be created.
    fn discard_transport(&mut self, peer_id: &str, transport_id: &str) {
        self.close_transport(peer_id, transport_id);
        if let Some(peer) = self.peers.get_mut(peer_id) {
            peer.transports.remove(transport_id);
        }
    }

    // ------------------------------------------------------------------
    // Producers
    // ------------------------------------------------------------------

    fn start_produce(
        &mut self,
        peer_id: String,
        request: ProduceRequest,
        respond_to: oneshot::Sender<Result<ProduceResult, SfuError>>,
    ) {
        let source = request
            .source
            .unwrap_or_else(|| MediaSource::default_for(request.kind));

        if source == MediaSource::Screen {
            if request.kind != MediaKind::Video {
                let _ = respond_to.send(Err(SfuError::BadRequest(
                    "Screen share must be a video track".to_string(),
                )));
                return;
            }
            if self.screen_share.is_some() || self.screen_share_pending.is_some() {
                let _ = respond_to.send(Err(SfuError::Conflict(
                    "Another screen share is already active in this room".to_string(),
                )));
                return;
            }
        }

        let transport_id = request.transport_id.clone();
        let check = |peer: &Peer| {
            let transport = peer.own_transport(&transport_id, TransportDirection::Send)?;
            if !transport.connected {
                return Err(SfuError::InvalidState(format!(
                    "Transport {transport_id} has not completed its handshake"
                )));
            }
            Ok(())
        };
        let key = InFlight::Produce {
            transport_id: request.transport_id.clone(),
            source,
        };
        let epoch = match self.begin_operation(&peer_id, key, check) {
            Ok(epoch) => epoch,
            Err(e) => {
                let _ = respond_to.send(Err(e));
                return;
            }
        };

        let producer_id = Uuid::new_v4().to_string();
        if source == MediaSource::Screen {
            self.screen_share_pending = Some(producer_id.clone());
        }

        let engine = Arc::clone(&self.engine);
        let id = producer_id.clone();
        let call_request = request.clone();
        self.spawn_engine_call(
            "produce",
            async move {
                engine
                    .produce(
                        &call_request.transport_id,
                        &id,
                        call_request.kind,
                        &call_request.rtp_parameters,
                    )
                    .await
            },
            Cleanup::Producer(producer_id.clone()),
            move |result| Completion::Produced {
                peer_id,
                epoch,
                producer_id,
                source,
                request,
                result,
                respond_to,
            },
        );
    }

    fn complete_produce(
        &mut self,
        peer_id: &str,
        epoch: u64,
        producer_id: String,
        source: MediaSource,
        request: ProduceRequest,
        result: Result<ProducerType, SfuError>,
    ) -> Result<ProduceResult, SfuError> {
        self.log_internal(peer_id, &result);
        if self.screen_share_pending.as_deref() == Some(producer_id.as_str()) {
            self.screen_share_pending = None;
        }

        let key = InFlight::Produce {
            transport_id: request.transport_id.clone(),
            source,
        };
        let Some(peer) = self.finish_operation(peer_id, epoch, &key) else {
            if result.is_ok() {
                self.engine.close_producer(&producer_id);
            }
            return Err(peer_gone(peer_id));
        };
        let producer_type = result?;

        let transport_open = peer
            .transports
            .get(&request.transport_id)
            .is_some_and(|t| !t.closed);
        if !transport_open {
            self.engine.close_producer(&producer_id);
            return Err(SfuError::InvalidState(format!(
                "Transport {} was closed while producing",
                request.transport_id
            )));
        }

        peer.producers.insert(
            producer_id.clone(),
            Producer {
                id: producer_id.clone(),
                kind: request.kind,
                source,
                paused: false,
                producer_type,
                transport_id: request.transport_id,
                rtp_parameters: request.rtp_parameters,
            },
        );

        if source == MediaSource::Screen {
            self.screen_share = Some(ScreenShareSession {
                producer_id: producer_id.clone(),
                peer_id: peer_id.to_string(),
                started_at: Utc::now(),
            });
        }

        // Other peers learn about the producer before its owner gets the ack
        self.broadcast(
            peer_id,
            &ServerEvent::NewProducerAvailable {
                producer_id: producer_id.clone(),
                peer_id: peer_id.to_string(),
                kind: request.kind,
                source,
            },
        );

        info!(
            target: "sfu.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            producer_id = %producer_id,
            kind = request.kind.as_str(),
            source = source.as_str(),
            producer_type = producer_type.as_str(),
            "Producer created"
        );

        Ok(ProduceResult {
            id: producer_id,
            kind: request.kind,
            source,
            producer_type,
        })
    }

    fn set_producer_paused(
        &mut self,
        peer_id: &str,
        producer_id: &str,
        paused: bool,
    ) -> Result<(), SfuError> {
        let peer = self
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| peer_not_found(peer_id))?;
        let producer = peer
            .producers
            .get_mut(producer_id)
            .ok_or_else(|| SfuError::NotFound(format!("Producer {producer_id} not found")))?;

        if paused {
            self.engine.pause_producer(producer_id)?;
        } else {
            self.engine.resume_producer(producer_id)?;
        }
        producer.paused = paused;

        let event = if paused {
            ServerEvent::ProducerPaused {
                producer_id: producer_id.to_string(),
            }
        } else {
            ServerEvent::ProducerResumed {
                producer_id: producer_id.to_string(),
            }
        };
        for holder in self
            .peers
            .values()
            .filter(|p| p.consumers.values().any(|c| c.producer_id == producer_id))
        {
            holder.notify(event.clone());
        }
        Ok(())
    }

    /// Close a producer owned by `owner_id`. Unknown ids are a no-op.
    fn close_producer(&mut self, owner_id: &str, producer_id: &str) {
        let removed = self
            .peers
            .get_mut(owner_id)
            .and_then(|peer| peer.producers.remove(producer_id));
        if removed.is_some() {
            self.retire_producer(owner_id, producer_id);
        }
    }

    /// Close a producer that is no longer in its owner's map and cascade to
    /// every consumer of it.
    fn retire_producer(&mut self, owner_id: &str, producer_id: &str) {
        self.engine.close_producer(producer_id);

        for peer in self.peers.values_mut() {
            let consumer_ids: Vec<String> = peer
                .consumers
                .values()
                .filter(|c| c.producer_id == producer_id)
                .map(|c| c.id.clone())
                .collect();
            for consumer_id in consumer_ids {
                peer.consumers.remove(&consumer_id);
                self.engine.close_consumer(&consumer_id);
                peer.notify(ServerEvent::ConsumerClosed {
                    consumer_id,
                    producer_id: producer_id.to_string(),
                });
            }
        }

        if self
            .screen_share
            .as_ref()
            .is_some_and(|s| s.producer_id == producer_id)
        {
            self.screen_share = None;
            debug!(
                target: "sfu.actor.room",
                room_id = %self.room_id,
                producer_id = %producer_id,
                "Screen share ended"
            );
        }

        self.broadcast(
            owner_id,
            &ServerEvent::ProducerClosed {
                producer_id: producer_id.to_string(),
                peer_id: owner_id.to_string(),
            },
        );
    }

    // ------------------------------------------------------------------
    // Consumers
    // ------------------------------------------------------------------

    fn find_producer(&self, producer_id: &str) -> Option<&Producer> {
        self.peers
            .values()
            .find_map(|peer| peer.producers.get(producer_id))
    }

    fn start_consume(
        &mut self,
        peer_id: String,
        request: ConsumeRequest,
        respond_to: oneshot::Sender<Result<ConsumeResult, SfuError>>,
    ) {
        let producer_id = request.producer_id.clone();
        let compatible = match self.find_producer(&producer_id) {
            Some(producer) => !capabilities::consumable_codecs(
                &producer.rtp_parameters,
                &request.rtp_capabilities,
            )
            .is_empty(),
            None => {
                let _ = respond_to.send(Err(SfuError::NotFound(format!(
                    "Producer {producer_id} not found"
                ))));
                return;
            }
        };
        if !compatible {
            let _ = respond_to.send(Err(SfuError::EngineFailure(format!(
                "Cannot consume producer {producer_id}: no codec in common"
            ))));
            return;
        }

        let transport_id = request.transport_id.clone();
        let check = |peer: &Peer| {
            if peer.consumers.values().any(|c| c.producer_id == producer_id) {
                return Err(SfuError::Conflict(format!(
                    "Already consuming producer {producer_id}"
                )));
            }
            peer.own_transport(&transport_id, TransportDirection::Recv)?;
            Ok(())
        };
        let in_flight = InFlight::Consume(producer_id.clone());
        let epoch = match self.begin_operation(&peer_id, in_flight, check) {
            Ok(epoch) => epoch,
            Err(e) => {
                let _ = respond_to.send(Err(e));
                return;
            }
        };

        let consumer_id = Uuid::new_v4().to_string();
        let engine = Arc::clone(&self.engine);
        let id = consumer_id.clone();
        let call_transport_id = transport_id.clone();
        let call_producer_id = producer_id.clone();
        self.spawn_engine_call(
            "consume",
            async move {
                engine
                    .consume(
                        &call_transport_id,
                        &id,
                        &call_producer_id,
                        &request.rtp_capabilities,
                    )
                    .await
            },
            Cleanup::Consumer(consumer_id.clone()),
            move |result| Completion::Consumed {
                peer_id,
                epoch,
                consumer_id,
                transport_id,
                producer_id,
                result,
                respond_to,
            },
        );
    }

    fn complete_consume(
        &mut self,
        peer_id: &str,
        epoch: u64,
        consumer_id: String,
        transport_id: String,
        producer_id: String,
        result: Result<ConsumerParameters, SfuError>,
    ) -> Result<ConsumeResult, SfuError> {
        self.log_internal(peer_id, &result);
        let producer_alive = self.find_producer(&producer_id).is_some();

        let key = InFlight::Consume(producer_id.clone());
        let Some(peer) = self.finish_operation(peer_id, epoch, &key) else {
            if result.is_ok() {
                self.engine.close_consumer(&consumer_id);
            }
            return Err(peer_gone(peer_id));
        };
        let parameters = result?;

        if !producer_alive {
            self.engine.close_consumer(&consumer_id);
            return Err(SfuError::NotFound(format!(
                "Producer {producer_id} was closed"
            )));
        }
        if !peer.transports.get(&transport_id).is_some_and(|t| !t.closed) {
            self.engine.close_consumer(&consumer_id);
            return Err(SfuError::InvalidState(format!(
                "Transport {transport_id} was closed while consuming"
            )));
        }

        peer.consumers.insert(
            consumer_id.clone(),
            Consumer {
                id: consumer_id.clone(),
                kind: parameters.kind,
                paused: true,
                producer_type: parameters.producer_type,
                producer_id: producer_id.clone(),
                transport_id,
            },
        );

        debug!(
            target: "sfu.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            consumer_id = %consumer_id,
            producer_id = %producer_id,
            "Consumer created"
        );

        Ok(ConsumeResult {
            id: consumer_id,
            producer_id,
            kind: parameters.kind,
            rtp_parameters: parameters.rtp_parameters,
            producer_type: parameters.producer_type,
            paused: true,
        })
    }

    fn set_consumer_paused(
        &mut self,
        peer_id: &str,
        consumer_id: &str,
        paused: bool,
    ) -> Result<(), SfuError> {
        let peer = self
            .peers
            .get_mut(peer_id)
            .ok_or_else(|| peer_not_found(peer_id))?;
        let consumer = peer
            .consumers
            .get_mut(consumer_id)
            .ok_or_else(|| SfuError::NotFound(format!("Consumer {consumer_id} not found")))?;

        if paused {
            self.engine.pause_consumer(consumer_id)?;
        } else {
            self.engine.resume_consumer(consumer_id)?;
        }
        consumer.paused = paused;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Introspection & shutdown
    // ------------------------------------------------------------------

    fn detail(&self) -> RoomDetail {
        let mut peers: Vec<PeerInfo> = self.peers.values().map(Peer::info).collect();
        peers.sort_by_key(|p| p.joined_at);
        RoomDetail {
            id: self.room_id.clone(),
            peers_count: self.peers.len(),
            created_at: self.created_at,
            peers,
            screen_share: self.screen_share.clone(),
        }
    }

    fn graceful_shutdown(&mut self) {
        info!(
            target: "sfu.actor.room",
            room_id = %self.room_id,
            peers = self.peers.len(),
            "Performing graceful shutdown"
        );

        for peer in self.peers.values() {
            peer.notify(ServerEvent::RoomClosed {
                room_id: self.room_id.clone(),
            });
            for consumer_id in peer.consumers.keys() {
                self.engine.close_consumer(consumer_id);
            }
            for producer_id in peer.producers.keys() {
                self.engine.close_producer(producer_id);
            }
            for transport in peer.transports.values().filter(|t| !t.closed) {
                self.engine.close_transport(&transport.id);
            }
        }
        self.peers.clear();
        self.screen_share = None;
    }
}
