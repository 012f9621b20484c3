//! `RoomRegistry` - process-wide owner of room actors.
//!
//! The registry is the single entry point for room creation, lookup and
//! deletion:
//!
//! - Explicitly constructed with a media engine and passed to every consumer
//! - Creates rooms lazily and removes them once their last peer leaves
//! - Keeps a peer -> room index so a leave needs only the peer id
//! - Owns the root `CancellationToken`; each room runs on a child token
//! - Monitors room actor health (panic detection via `JoinHandle`)
//!
//! Membership changes are serialised through the registry mailbox. Media
//! operations go straight to the room handle returned by a join.

use super::messages::{
    JoinResult, PeerDetail, RegistryMessage, RegistryStats, RoomDetail, RoomSummary,
    ScreenShareSession,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{call_engine, RoomActor, RoomActorHandle};
use crate::engine::{MediaEngine, RtpCapabilities};
use crate::errors::SfuError;
use crate::signaling::EventSink;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// How long a removed room actor gets to finish.
const ROOM_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry tuning.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Timeout applied to every media engine call.
    pub engine_timeout: Duration,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            engine_timeout: Duration::from_secs(10),
        }
    }
}

/// Handle to the `RoomRegistry`.
#[derive(Debug, Clone)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RoomRegistryHandle {
    /// Spawn a registry and return a handle to it.
    #[must_use]
    pub fn new(
        engine: Arc<dyn MediaEngine>,
        settings: RegistrySettings,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomRegistry {
            receiver,
            cancel_token: cancel_token.clone(),
            engine,
            settings,
            rooms: HashMap::new(),
            peer_index: HashMap::new(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Registry, "registry"),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, SfuError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|e| SfuError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SfuError::Internal(format!("response receive failed: {e}")))
    }

    /// Create a room, or return the existing one's capability context.
    pub async fn create_room(&self, room_id: String) -> Result<RtpCapabilities, SfuError> {
        self.request(|respond_to| RegistryMessage::CreateRoom {
            room_id,
            respond_to,
        })
        .await?
    }

    pub async fn get_room(&self, room_id: String) -> Result<Option<RoomActorHandle>, SfuError> {
        self.request(|respond_to| RegistryMessage::GetRoom {
            room_id,
            respond_to,
        })
        .await
    }

    /// Join a peer to a room, creating the room if needed.
    pub async fn join_room(
        &self,
        room_id: String,
        peer_id: String,
        display_name: String,
        events: EventSink,
    ) -> Result<(RoomActorHandle, JoinResult), SfuError> {
        self.request(|respond_to| RegistryMessage::JoinRoom {
            room_id,
            peer_id,
            display_name,
            events,
            respond_to,
        })
        .await?
    }

    /// Remove a peer from whatever room it is in. Idempotent.
    pub async fn leave_room(&self, peer_id: String) -> Result<bool, SfuError> {
        self.request(|respond_to| RegistryMessage::LeaveRoom {
            peer_id,
            respond_to,
        })
        .await?
    }

    /// Force-delete a room and every peer in it.
    pub async fn delete_room(&self, room_id: String) -> Result<(), SfuError> {
        self.request(|respond_to| RegistryMessage::DeleteRoom {
            room_id,
            respond_to,
        })
        .await?
    }

    pub async fn rooms_info(&self) -> Result<Vec<RoomSummary>, SfuError> {
        self.request(|respond_to| RegistryMessage::ListRooms { respond_to })
            .await
    }

    pub async fn stats(&self) -> Result<RegistryStats, SfuError> {
        self.request(|respond_to| RegistryMessage::GetStats { respond_to })
            .await
    }

    /// Room detail, `None` if the room does not exist.
    pub async fn room_detail(&self, room_id: String) -> Result<Option<RoomDetail>, SfuError> {
        match self.live_room(room_id).await? {
            Some(room) => room.get_state().await.map(Some),
            None => Ok(None),
        }
    }

    /// Peer detail, `None` if the room or the peer does not exist.
    pub async fn peer_detail(
        &self,
        room_id: String,
        peer_id: String,
    ) -> Result<Option<PeerDetail>, SfuError> {
        match self.live_room(room_id).await? {
            Some(room) => room.get_peer(peer_id).await,
            None => Ok(None),
        }
    }

    /// Active screen share, `None` if the room does not exist or nobody shares.
    pub async fn screen_share(
        &self,
        room_id: String,
    ) -> Result<Option<ScreenShareSession>, SfuError> {
        match self.live_room(room_id).await? {
            Some(room) => room.screen_share().await,
            None => Ok(None),
        }
    }

    async fn live_room(&self, room_id: String) -> Result<Option<RoomActorHandle>, SfuError> {
        Ok(self
            .get_room(room_id)
            .await?
            .filter(|room| !room.is_cancelled()))
    }

    /// Close every room and stop the registry. Returns once rooms have drained.
    pub async fn shutdown(&self) -> Result<(), SfuError> {
        self.request(|respond_to| RegistryMessage::Shutdown { respond_to })
            .await?
    }

    /// Cancel the registry and every room (no drain).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    handle: RoomActorHandle,
    /// Join handle for monitoring the actor task.
    task_handle: JoinHandle<()>,
    created_at: DateTime<Utc>,
    peers: HashSet<String>,
}

/// The `RoomRegistry` implementation.
pub struct RoomRegistry {
    receiver: mpsc::Receiver<RegistryMessage>,
    /// Root token; rooms get child tokens.
    cancel_token: CancellationToken,
    engine: Arc<dyn MediaEngine>,
    settings: RegistrySettings,
    rooms: HashMap<String, ManagedRoom>,
    /// Peer id -> room id.
    peer_index: HashMap<String, String>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomRegistry {
    #[instrument(skip_all, name = "sfu.actor.registry")]
    async fn run(mut self) {
        info!(target: "sfu.actor.registry", "RoomRegistry started");

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sfu.actor.registry",
                        "RoomRegistry received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let flow = self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                            if flow.is_break() {
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "sfu.actor.registry",
                                "RoomRegistry channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sfu.actor.registry",
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "RoomRegistry stopped"
        );
    }

    async fn handle_message(&mut self, message: RegistryMessage) -> ControlFlow<()> {
        match message {
            RegistryMessage::CreateRoom {
                room_id,
                respond_to,
            } => {
                let result = self
                    .ensure_room(&room_id)
                    .await
                    .map(|room| room.rtp_capabilities().clone());
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let room = self.rooms.get(&room_id).map(|m| m.handle.clone());
                let _ = respond_to.send(room);
            }

            RegistryMessage::JoinRoom {
                room_id,
                peer_id,
                display_name,
                events,
                respond_to,
            } => {
                let result = self
                    .join_room(room_id, peer_id, display_name, events)
                    .await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::LeaveRoom {
                peer_id,
                respond_to,
            } => {
                let result = self.leave_room(&peer_id).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::DeleteRoom {
                room_id,
                respond_to,
            } => {
                let result = self.delete_room(&room_id).await;
                let _ = respond_to.send(result);
            }

            RegistryMessage::ListRooms { respond_to } => {
                let _ = respond_to.send(self.rooms_info());
            }

            RegistryMessage::GetStats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }

            RegistryMessage::Shutdown { respond_to } => {
                self.graceful_shutdown().await;
                self.cancel_token.cancel();
                let _ = respond_to.send(Ok(()));
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Return the room, creating it (and its router) if unseen.
    async fn ensure_room(&mut self, room_id: &str) -> Result<RoomActorHandle, SfuError> {
        if let Some(managed) = self.rooms.get(room_id) {
            return Ok(managed.handle.clone());
        }

        let engine = Arc::clone(&self.engine);
        let capabilities = call_engine(
            "create_router",
            self.settings.engine_timeout,
            engine.create_router(room_id),
        )
        .await
        .inspect_err(|e| {
            if matches!(e, SfuError::EngineTimeout(_) | SfuError::Internal(_)) {
                self.engine.close_router(room_id);
            }
        })?;

        let (handle, task_handle) = RoomActor::spawn(
            room_id.to_string(),
            capabilities,
            Arc::clone(&self.engine),
            self.settings.engine_timeout,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.rooms.insert(
            room_id.to_string(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
                created_at: Utc::now(),
                peers: HashSet::new(),
            },
        );
        self.metrics.room_created();

        info!(
            target: "sfu.actor.registry",
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room created"
        );

        Ok(handle)
    }

    async fn join_room(
        &mut self,
        room_id: String,
        peer_id: String,
        display_name: String,
        events: EventSink,
    ) -> Result<(RoomActorHandle, JoinResult), SfuError> {
        // A peer lives in one room at a time
        let current_room = self.peer_index.get(&peer_id).cloned();
        if current_room.as_deref().is_some_and(|current| current != room_id) {
            self.leave_room(&peer_id).await?;
        }

        let room = self.ensure_room(&room_id).await?;
        let result = match room.join(peer_id.clone(), display_name, events).await {
            Ok(result) => result,
            Err(e) => {
                if self.rooms.get(&room_id).is_some_and(|m| m.peers.is_empty()) {
                    self.remove_room(&room_id);
                }
                return Err(e);
            }
        };

        if let Some(managed) = self.rooms.get_mut(&room_id) {
            if managed.peers.insert(peer_id.clone()) {
                self.metrics.peer_joined();
            }
        }
        self.peer_index.insert(peer_id, room_id);

        Ok((room, result))
    }

    async fn leave_room(&mut self, peer_id: &str) -> Result<bool, SfuError> {
        let Some(room_id) = self.peer_index.remove(peer_id) else {
            return Ok(false);
        };
        let Some(managed) = self.rooms.get_mut(&room_id) else {
            return Ok(false);
        };
        managed.peers.remove(peer_id);
        self.metrics.peer_left();

        let remaining = match managed.handle.leave(peer_id.to_string()).await {
            Ok(outcome) => outcome.remaining_peers,
            Err(e) => {
                warn!(
                    target: "sfu.actor.registry",
                    room_id = %room_id,
                    peer_id = %peer_id,
                    error = %e,
                    "Room did not answer leave"
                );
                managed.peers.len()
            }
        };

        debug!(
            target: "sfu.actor.registry",
            room_id = %room_id,
            peer_id = %peer_id,
            remaining,
            "Peer left"
        );

        if remaining == 0 {
            self.remove_room(&room_id);
        }
        Ok(true)
    }

    async fn delete_room(&mut self, room_id: &str) -> Result<(), SfuError> {
        let Some(managed) = self.rooms.get(room_id) else {
            return Err(SfuError::NotFound(format!("Room {room_id} not found")));
        };

        if let Err(e) = managed.handle.close_room().await {
            warn!(
                target: "sfu.actor.registry",
                room_id = %room_id,
                error = %e,
                "Room did not answer close, removing anyway"
            );
        }
        self.remove_room(room_id);
        Ok(())
    }

    /// Drop a room: cancel its actor, close its router, forget its peers.
    fn remove_room(&mut self, room_id: &str) {
        let Some(managed) = self.rooms.remove(room_id) else {
            return;
        };

        for peer_id in &managed.peers {
            self.peer_index.remove(peer_id);
            self.metrics.peer_left();
        }

        managed.handle.cancel();
        self.engine.close_router(room_id);
        self.metrics.room_removed();

        let room_id_owned = room_id.to_string();
        tokio::spawn(async move {
            match tokio::time::timeout(ROOM_DRAIN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "sfu.actor.registry",
                        room_id = %room_id_owned,
                        "Room actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "sfu.actor.registry",
                        room_id = %room_id_owned,
                        error = ?e,
                        "Room actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sfu.actor.registry",
                        room_id = %room_id_owned,
                        "Room actor task cleanup timed out"
                    );
                }
            }
        });

        info!(
            target: "sfu.actor.registry",
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Room removed"
        );
    }

    fn rooms_info(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .rooms
            .iter()
            .map(|(id, managed)| RoomSummary {
                id: id.clone(),
                peers_count: managed.peers.len(),
                created_at: managed.created_at,
            })
            .collect();
        rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rooms
    }

    fn stats(&self) -> RegistryStats {
        let total_rooms = self.rooms.len();
        let total_peers: usize = self.rooms.values().map(|m| m.peers.len()).sum();
        let rooms_with_peers = self.rooms.values().filter(|m| !m.peers.is_empty()).count();

        #[allow(clippy::cast_precision_loss)]
        let average_peers_per_room = if total_rooms == 0 {
            0.0
        } else {
            (total_peers as f64 / total_rooms as f64 * 100.0).round() / 100.0
        };

        RegistryStats {
            total_rooms,
            total_peers,
            rooms_with_peers,
            empty_rooms: total_rooms - rooms_with_peers,
            average_peers_per_room,
            oldest_room_created_at: self.rooms.values().map(|m| m.created_at).min(),
        }
    }

    async fn graceful_shutdown(&mut self) {
        info!(
            target: "sfu.actor.registry",
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(ROOM_DRAIN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "sfu.actor.registry",
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "sfu.actor.registry",
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sfu.actor.registry",
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.engine.close_router(&room_id);
            for _ in &managed.peers {
                self.metrics.peer_left();
            }
            self.metrics.room_removed();
        }
        self.peer_index.clear();

        info!(target: "sfu.actor.registry", "Graceful shutdown complete");
    }

    /// Reap room actors whose task ended on its own.
    async fn check_room_health(&mut self) {
        let finished: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            let Some(managed) = self.rooms.remove(&room_id) else {
                continue;
            };
            warn!(
                target: "sfu.actor.registry",
                room_id = %room_id,
                "Room actor task finished unexpectedly"
            );

            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "sfu.actor.registry",
                        room_id = %room_id,
                        "Room actor exited cleanly"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "sfu.actor.registry",
                            room_id = %room_id,
                            error = ?join_error,
                            "Room actor panicked - triggering investigation"
                        );
                        self.metrics.record_panic(ActorType::Room);
                    }
                }
            }

            for peer_id in &managed.peers {
                self.peer_index.remove(peer_id);
                self.metrics.peer_left();
            }
            self.engine.close_router(&room_id);
            self.metrics.room_removed();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::LocalEngine;
    use crate::signaling::{event_channel, EventStream, ServerEvent};

    fn registry() -> (RoomRegistryHandle, Arc<ActorMetrics>) {
        let metrics = ActorMetrics::new();
        let handle = RoomRegistryHandle::new(
            Arc::new(LocalEngine::default()),
            RegistrySettings::default(),
            Arc::clone(&metrics),
        );
        (handle, metrics)
    }

    async fn join(
        registry: &RoomRegistryHandle,
        room_id: &str,
        peer_id: &str,
    ) -> (RoomActorHandle, JoinResult, EventStream) {
        let (tx, rx) = event_channel();
        let (room, result) = registry
            .join_room(
                room_id.to_string(),
                peer_id.to_string(),
                peer_id.to_string(),
                tx,
            )
            .await
            .unwrap();
        (room, result, rx)
    }

    #[tokio::test]
    async fn test_create_room_is_idempotent() {
        let (registry, metrics) = registry();

        let first = registry.create_room("r1".to_string()).await.unwrap();
        let second = registry.create_room("r1".to_string()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(metrics.room_count(), 1);
        assert!(registry.get_room("r1".to_string()).await.unwrap().is_some());

        registry.cancel();
    }

    #[tokio::test]
    async fn test_get_unknown_room_is_none() {
        let (registry, _) = registry();
        assert!(registry.get_room("nope".to_string()).await.unwrap().is_none());
        assert!(registry
            .room_detail("nope".to_string())
            .await
            .unwrap()
            .is_none());
        registry.cancel();
    }

    #[tokio::test]
    async fn test_last_leave_removes_room() {
        let (registry, metrics) = registry();
        join(&registry, "r1", "p1").await;
        join(&registry, "r1", "p2").await;
        assert_eq!(metrics.peer_count(), 2);

        assert!(registry.leave_room("p1".to_string()).await.unwrap());
        assert!(registry.get_room("r1".to_string()).await.unwrap().is_some());

        assert!(registry.leave_room("p2".to_string()).await.unwrap());
        assert!(registry.get_room("r1".to_string()).await.unwrap().is_none());
        assert_eq!(metrics.room_count(), 0);
        assert_eq!(metrics.peer_count(), 0);

        // Second leave has no effect
        assert!(!registry.leave_room("p2".to_string()).await.unwrap());
        registry.cancel();
    }

    #[tokio::test]
    async fn test_join_other_room_leaves_previous() {
        let (registry, _) = registry();
        join(&registry, "r1", "p1").await;
        join(&registry, "r2", "p1").await;

        assert!(registry.get_room("r1".to_string()).await.unwrap().is_none());
        let stats = registry.stats().await.unwrap();
        assert_eq!(stats.total_rooms, 1);
        assert_eq!(stats.total_peers, 1);
        registry.cancel();
    }

    #[tokio::test]
    async fn test_delete_room_notifies_peers() {
        let (registry, metrics) = registry();
        let (_, _, mut events) = join(&registry, "r1", "p1").await;

        registry.delete_room("r1".to_string()).await.unwrap();

        assert_eq!(
            events.recv().await,
            Some(ServerEvent::RoomClosed {
                room_id: "r1".to_string()
            })
        );
        assert!(registry.get_room("r1".to_string()).await.unwrap().is_none());
        assert!(!registry.leave_room("p1".to_string()).await.unwrap());
        assert_eq!(metrics.peer_count(), 0);

        let missing = registry.delete_room("r1".to_string()).await;
        assert!(matches!(missing, Err(SfuError::NotFound(_))));
        registry.cancel();
    }

    #[tokio::test]
    async fn test_stats_and_listing() {
        let (registry, _) = registry();
        join(&registry, "r1", "p1").await;
        join(&registry, "r1", "p2").await;
        join(&registry, "r2", "p3").await;
        registry.create_room("r3".to_string()).await.unwrap();

        let stats = registry.stats().await.unwrap();
        assert_eq!(stats.total_rooms, 3);
        assert_eq!(stats.total_peers, 3);
        assert_eq!(stats.rooms_with_peers, 2);
        assert_eq!(stats.empty_rooms, 1);
        assert!((stats.average_peers_per_room - 1.0).abs() < f64::EPSILON);
        assert!(stats.oldest_room_created_at.is_some());

        let rooms = registry.rooms_info().await.unwrap();
        assert_eq!(rooms.len(), 3);
        let r1 = rooms.iter().find(|r| r.id == "r1").unwrap();
        assert_eq!(r1.peers_count, 2);
        registry.cancel();
    }

    #[tokio::test]
    async fn test_shutdown_drains_rooms() {
        let (registry, metrics) = registry();
        let (_, _, mut events) = join(&registry, "r1", "p1").await;

        registry.shutdown().await.unwrap();

        assert_eq!(
            events.recv().await,
            Some(ServerEvent::RoomClosed {
                room_id: "r1".to_string()
            })
        );
        assert_eq!(metrics.room_count(), 0);
        assert!(registry.is_cancelled());
    }
}
