//! Test server harness for E2E testing
//!
//! Provides `TestSfuServer` for spawning real SFU server instances in tests.

use chat_store::ChatRoomSettings;
use metrics_exporter_prometheus::PrometheusBuilder;
use sfu_service::actors::{ActorMetrics, RegistrySettings, RoomRegistryHandle};
use sfu_service::chat::ChatHub;
use sfu_service::engine::{LocalEngine, MediaEngine};
use sfu_service::observability::HealthState;
use sfu_service::routes::{self, AppState};
use sfu_service::signaling::SessionSettings;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Test harness for spawning the SFU server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_signaling_e2e() -> Result<(), anyhow::Error> {
///     let server = TestSfuServer::spawn().await?;
///     let (socket, _) = tokio_tungstenite::connect_async(server.ws_url()).await?;
///     // ...
///     Ok(())
/// }
/// ```
pub struct TestSfuServer {
    addr: SocketAddr,
    registry: RoomRegistryHandle,
    chat: ChatHub,
    connections: Arc<AtomicUsize>,
    _handle: JoinHandle<()>,
}

impl TestSfuServer {
    /// Spawn a server backed by the in-process engine.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with_engine(Arc::new(LocalEngine::default())).await
    }

    /// Spawn a server backed by `engine`.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn_with_engine(engine: Arc<dyn MediaEngine>) -> Result<Self, anyhow::Error> {
        let registry = RoomRegistryHandle::new(
            engine,
            RegistrySettings {
                engine_timeout: Duration::from_secs(2),
            },
            ActorMetrics::new(),
        );
        let chat = ChatHub::new(ChatRoomSettings::default());

        let state = Arc::new(AppState::new(
            registry.clone(),
            chat.clone(),
            SessionSettings::default(),
        ));
        let connections = Arc::clone(&state.connections);

        // Not installed globally: several servers may run in one test binary
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let health_state = Arc::new(HealthState::new());
        health_state.set_ready();

        let app = routes::build_routes(
            state,
            metrics_handle,
            health_state,
            Duration::from_secs(10),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            registry,
            chat,
            connections,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the signaling WebSocket URL.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Registry behind the server, for direct assertions.
    pub fn registry(&self) -> &RoomRegistryHandle {
        &self.registry
    }

    pub fn chat(&self) -> &ChatHub {
        &self.chat
    }

    /// Signaling connections currently open on this server.
    pub fn open_connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

impl Drop for TestSfuServer {
    fn drop(&mut self) {
        self._handle.abort();
        self.registry.cancel();
    }
}
