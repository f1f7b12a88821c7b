//! Test server harness.
//!
//! Provides `TestMatchServer`, the gateway and admin routes served on a
//! random local port over in-memory collaborators.

use crate::fixtures::{fast_choreography, TEST_KEY_PREFIX};
use match_service::broadcast::BroadcastSink;
use match_service::chatroom::mock::MockChatroomCreator;
use match_service::engine::Engine;
use match_service::gateway::{build_routes, AppState, ConnectionHub};
use match_service::queue::EventQueue;
use match_service::store::{InMemoryStore, KeySpace, SharedStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Running gateway for HTTP-level tests.
///
/// # Example
/// ```rust,ignore
/// let server = TestMatchServer::spawn().await?;
/// let response = reqwest::get(format!("{}/api/v1/window", server.url())).await?;
/// assert_eq!(response.status(), 200);
/// ```
pub struct TestMatchServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    store: Arc<InMemoryStore>,
    cancel: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestMatchServer {
    /// Bind to 127.0.0.1:0 and serve in the background.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        let store = Arc::new(InMemoryStore::new());
        let shared: Arc<dyn SharedStore> = Arc::clone(&store) as Arc<dyn SharedStore>;
        let keys = KeySpace::new(TEST_KEY_PREFIX);
        let hub = Arc::new(ConnectionHub::new());
        let cancel = CancellationToken::new();

        let engine = Arc::new(Engine::new(
            Arc::clone(&shared),
            keys.clone(),
            Duration::from_secs(3600),
            Arc::clone(&hub) as Arc<dyn BroadcastSink>,
            Arc::new(MockChatroomCreator::new()),
            fast_choreography(),
            cancel.child_token(),
        ));

        let state = Arc::new(AppState {
            hub,
            queue: EventQueue::new(shared, keys),
            engine,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to read local address: {}", e))?;

        let app = build_routes(Arc::clone(&state));
        let shutdown = cancel.child_token();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
        });

        Ok(Self {
            addr,
            state,
            store,
            cancel,
            _handle: handle,
        })
    }

    /// Base URL, e.g. `http://127.0.0.1:54321`.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }
}

impl Drop for TestMatchServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
