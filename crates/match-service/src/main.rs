//! Blind Date Matchmaking Service
//!
//! # Servers
//!
//! - HTTP server for the WebSocket gateway and admin API (default: 0.0.0.0:3000)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect the shared store and the broadcast relay (Redis)
//! 4. Build the engine and start one consumer per queue lane
//! 5. Start health HTTP server (liveness, readiness, metrics)
//! 6. Start gateway HTTP server
//! 7. Wait for shutdown signal, then drain running choreographies

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use common::secret::ExposeSecret;
use match_service::broadcast::BroadcastSink;
use match_service::chatroom::HttpChatroomClient;
use match_service::config::Config;
use match_service::engine::Engine;
use match_service::gateway::{build_routes, AppState, ConnectionHub, RedisRelay};
use match_service::observability::metrics::init_metrics_recorder;
use match_service::observability::{health_router, HealthState};
use match_service::queue::{EventQueue, Lane, LaneConsumer};
use match_service::store::{KeySpace, RedisStore, SharedStore};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time allowed for running choreographies to end their rooms on shutdown.
const CHOREOGRAPHY_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "match_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Matchmaking Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        http_bind_address = %config.http_bind_address,
        health_bind_address = %config.health_bind_address,
        key_prefix = %config.key_prefix,
        room_ttl_secs = config.room_ttl.as_secs(),
        prompt_count = config.choreography.prompt_count,
        "Configuration loaded successfully"
    );

    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::with_lanes(Lane::ALL.len()));

    info!("Connecting to Redis...");
    let store = RedisStore::new(config.redis_url.expose_secret())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to Redis");
            e
        })?;
    let store: Arc<dyn SharedStore> = Arc::new(store);
    let keys = KeySpace::new(config.key_prefix.clone());

    let relay = RedisRelay::connect(config.redis_url.expose_secret(), keys.broadcast_channel())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect broadcast relay");
            e
        })?;
    info!("Redis connection established");

    let chatroom = HttpChatroomClient::new(
        config.chatroom_endpoint.clone(),
        config.chatroom_token.clone(),
        config.chatroom_title.clone(),
    )?;

    let shutdown_token = CancellationToken::new();
    let hub = Arc::new(ConnectionHub::new());

    let engine = Arc::new(Engine::new(
        Arc::clone(&store),
        keys.clone(),
        config.room_ttl,
        Arc::new(relay.clone()) as Arc<dyn BroadcastSink>,
        Arc::new(chatroom),
        config.choreography.clone(),
        shutdown_token.child_token(),
    ));

    // Relay subscription must be live before any socket is accepted
    tokio::spawn(relay.run(Arc::clone(&hub), shutdown_token.child_token()));

    let queue = EventQueue::new(Arc::clone(&store), keys);
    for lane in Lane::ALL {
        let consumer = LaneConsumer::new(
            lane,
            queue.clone(),
            Arc::clone(&engine),
            shutdown_token.child_token(),
        )
        .with_health(Arc::clone(&health_state));
        tokio::spawn(consumer.run());
    }
    info!("Lane consumers started");

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Start gateway HTTP server
    let http_addr: SocketAddr = config.http_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.http_bind_address, "Invalid HTTP bind address");
        format!("Invalid HTTP bind address: {e}")
    })?;

    let app = build_routes(Arc::new(AppState {
        hub,
        queue,
        engine: Arc::clone(&engine),
    }));

    let http_listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %http_addr, "Failed to bind gateway server");
            format!("Failed to bind gateway server to {http_addr}: {e}")
        })?;

    let http_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %http_addr, "Gateway server starting");
        let server = axum::serve(http_listener, app).with_graceful_shutdown(async move {
            http_shutdown_token.cancelled().await;
            info!("Gateway server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Gateway server failed");
        }
    });

    health_state.set_ready();
    info!("Matchmaking Service running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so k8s stops sending traffic
    health_state.set_not_ready();

    // Propagates to lane consumers, choreographies, relay and both servers
    shutdown_token.cancel();

    engine.shutdown(CHOREOGRAPHY_DRAIN_TIMEOUT).await;

    // Give servers time to close their listeners
    tokio::time::sleep(Duration::from_secs(1)).await;

    info!("Matchmaking Service shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
