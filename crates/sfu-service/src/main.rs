//! SFU Service
//!
//! Room orchestration and WebSocket signaling for a selective forwarding unit.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (text or JSON)
//! 3. Initialize Prometheus metrics recorder
//! 4. Start the media engine and the room registry
//! 5. Bind the HTTP listener, then mark ready
//! 6. Serve until SIGINT/SIGTERM, then drain rooms

use anyhow::Context;
use chat_store::ChatRoomSettings;
use sfu_service::actors::{ActorMetrics, RegistrySettings, RoomRegistryHandle};
use sfu_service::chat::ChatHub;
use sfu_service::config::{Config, LogFormat};
use sfu_service::engine::LocalEngine;
use sfu_service::observability::{init_metrics_recorder, HealthState};
use sfu_service::routes::{self, AppState};
use sfu_service::signaling::SessionSettings;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration first: it selects the log format
    let config = Config::from_env().context("Failed to load configuration")?;

    init_tracing(config.log_format);

    info!(
        sfu_id = %config.sfu_id,
        bind_address = %config.bind_address,
        announced_ip = %config.announced_ip,
        rtc_min_port = config.rtc_min_port,
        rtc_max_port = config.rtc_max_port,
        engine_timeout_ms = config.engine_timeout.as_millis(),
        request_timeout_ms = config.request_timeout.as_millis(),
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        anyhow::anyhow!(e)
    })?;

    let health_state = Arc::new(HealthState::new());

    let engine = Arc::new(LocalEngine::new(config.engine_settings()));
    let registry = RoomRegistryHandle::new(
        engine,
        RegistrySettings {
            engine_timeout: config.engine_timeout,
        },
        ActorMetrics::new(),
    );
    let chat = ChatHub::new(ChatRoomSettings {
        max_messages: config.chat_max_messages,
        ..ChatRoomSettings::default()
    });

    let state = Arc::new(AppState::new(
        registry.clone(),
        chat,
        SessionSettings {
            request_timeout: config.request_timeout,
            typing_timeout: config.chat_typing_timeout,
        },
    ));
    let app = routes::build_routes(
        state,
        metrics_handle,
        Arc::clone(&health_state),
        config.http_timeout,
    );

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.bind_address))?;

    // Bind before marking ready to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    health_state.set_ready();
    info!(addr = %addr, "SFU service listening");

    let shutdown_health = Arc::clone(&health_state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Stop receiving traffic before connections drain
            shutdown_health.set_not_ready();
        })
        .await
        .context("HTTP server failed")?;

    info!("HTTP server stopped, closing rooms");
    if let Err(e) = registry.shutdown().await {
        warn!(error = %e, "Room registry shutdown error");
    }

    info!("SFU service shutdown complete");
    Ok(())
}

fn init_tracing(log_format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sfu_service=debug,tower_http=debug".into());

    let (text_layer, json_layer) = match log_format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .init();
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => {
                error!("Failed to listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
