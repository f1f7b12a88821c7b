//! Client-facing HTTP surface.
//!
//! - `GET /ws?memberId=N` - real-time connection
//! - `/api/v1/window` - event window administration
//!
//! The gateway only turns socket activity into queue jobs and delivers
//! outbound events. Matchmaking decisions are taken by the engine.

pub mod admin;
pub mod hub;
pub mod relay;
pub mod ws;

pub use hub::ConnectionHub;
pub use relay::RedisRelay;

use crate::engine::Engine;
use crate::queue::EventQueue;
use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Request timeout for admin calls; upgraded sockets are not affected.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connections held by this instance.
    pub hub: Arc<ConnectionHub>,

    /// Producer side of the queue lanes.
    pub queue: EventQueue,

    pub engine: Arc<Engine>,
}

/// Build the application routes.
///
/// Layer order (bottom-to-top execution):
/// 1. `TimeoutLayer` - Timeout the request (innermost)
/// 2. `TraceLayer` - Log request details
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route(
            "/api/v1/window",
            get(admin::get_window)
                .post(admin::open_window)
                .delete(admin::close_window),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}

/// State over an in-memory store with the hub as the sink.
#[cfg(test)]
pub(crate) fn test_state() -> Arc<AppState> {
    use crate::broadcast::BroadcastSink;
    use crate::chatroom::mock::MockChatroomCreator;
    use crate::config::ChoreographyConfig;
    use crate::store::{InMemoryStore, KeySpace, SharedStore};
    use tokio_util::sync::CancellationToken;

    let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
    let keys = KeySpace::new("test");
    let hub = Arc::new(ConnectionHub::new());
    let engine = Arc::new(Engine::new(
        Arc::clone(&store),
        keys.clone(),
        Duration::from_secs(3600),
        Arc::clone(&hub) as Arc<dyn BroadcastSink>,
        Arc::new(MockChatroomCreator::new()),
        ChoreographyConfig::default(),
        CancellationToken::new(),
    ));
    Arc::new(AppState {
        hub,
        queue: EventQueue::new(store, keys),
        engine,
    })
}
