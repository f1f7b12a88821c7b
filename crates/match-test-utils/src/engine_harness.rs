//! Engine harness.
//!
//! Provides `EngineHarness`, an `Engine` over `InMemoryStore` whose outbound
//! events are recorded instead of delivered.

use crate::fixtures::{connection_of, enter_job, fast_choreography, member, TEST_KEY_PREFIX};
use chrono::{Duration as ChronoDuration, Utc};
use common::types::{ConnectionId, MemberId, RoomId};
use match_service::broadcast::mock::RecordingSink;
use match_service::broadcast::{BroadcastSink, Group, OutboundEvent};
use match_service::chatroom::mock::MockChatroomCreator;
use match_service::config::ChoreographyConfig;
use match_service::engine::Engine;
use match_service::errors::MatchError;
use match_service::queue::Job;
use match_service::store::{InMemoryStore, KeySpace, SharedStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retention used for room records in tests.
const TEST_ROOM_TTL: Duration = Duration::from_secs(3600);

/// Engine wired to in-memory collaborators.
///
/// # Example
/// ```rust,ignore
/// let harness = EngineHarness::new().await;
/// harness.open_window(3).await;
/// harness.enter(1).await?;
/// assert_eq!(harness.occupancy_of(1).await, 1);
/// ```
pub struct EngineHarness {
    pub store: Arc<InMemoryStore>,
    pub keys: KeySpace,
    pub sink: Arc<RecordingSink>,
    pub chatroom: Arc<MockChatroomCreator>,
    pub engine: Arc<Engine>,
    pub cancel: CancellationToken,
}

impl EngineHarness {
    /// Harness with fast choreography timings and a working chatroom mock.
    pub async fn new() -> Self {
        Self::build(fast_choreography(), MockChatroomCreator::new())
    }

    /// Harness whose chatroom creation always fails.
    pub async fn with_failing_chatroom() -> Self {
        Self::build(fast_choreography(), MockChatroomCreator::failing())
    }

    /// Harness with custom choreography timings.
    pub async fn with_choreography(config: ChoreographyConfig) -> Self {
        Self::build(config, MockChatroomCreator::new())
    }

    fn build(config: ChoreographyConfig, chatroom: MockChatroomCreator) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let shared: Arc<dyn SharedStore> = Arc::clone(&store) as Arc<dyn SharedStore>;
        let keys = KeySpace::new(TEST_KEY_PREFIX);
        let sink = Arc::new(RecordingSink::new());
        let chatroom = Arc::new(chatroom);
        let cancel = CancellationToken::new();

        let engine = Arc::new(Engine::new(
            shared,
            keys.clone(),
            TEST_ROOM_TTL,
            Arc::clone(&sink) as Arc<dyn BroadcastSink>,
            Arc::clone(&chatroom) as Arc<dyn match_service::chatroom::ChatroomCreator>,
            config,
            cancel.clone(),
        ));

        Self {
            store,
            keys,
            sink,
            chatroom,
            engine,
            cancel,
        }
    }

    /// Open the event window for an hour with the given room capacity.
    pub async fn open_window(&self, capacity: usize) {
        self.engine
            .windows()
            .open(Utc::now() + ChronoDuration::hours(1), capacity)
            .await
            .expect("open event window");
    }

    pub async fn close_window(&self) {
        self.engine
            .windows()
            .close()
            .await
            .expect("close event window");
    }

    /// Apply an ENTER for member `n` on its default connection.
    pub async fn enter(&self, n: u64) -> Result<(), MatchError> {
        self.engine.handle(&enter_job(n)).await
    }

    /// Apply an arbitrary job.
    pub async fn apply(&self, job: &Job) -> Result<(), MatchError> {
        self.engine.handle(job).await
    }

    /// Apply a CHOICE from `choicer` for `target`.
    pub async fn choose(&self, choicer: u64, target: u64) -> Result<(), MatchError> {
        self.engine
            .handle_choice(member(choicer), &connection_of(choicer), member(target), None)
            .await
    }

    pub async fn room_of(&self, n: u64) -> Option<RoomId> {
        self.engine
            .registry()
            .room_of(member(n))
            .await
            .expect("read member index")
    }

    /// Occupancy of the room member `n` is seated in.
    pub async fn occupancy_of(&self, n: u64) -> usize {
        let room = self.room_of(n).await.expect("member is seated");
        self.engine
            .registry()
            .get_occupancy(&room)
            .await
            .expect("read occupancy")
    }

    /// Event names broadcast to a room, in order.
    pub fn room_events(&self, room_id: &RoomId) -> Vec<&'static str> {
        self.sink.group_event_names(&Group::Room(room_id.clone()))
    }

    /// Events delivered to member `n`'s private group in a room.
    pub fn member_events(&self, room_id: &RoomId, member_id: MemberId) -> Vec<OutboundEvent> {
        self.sink
            .group_events(&Group::Member(room_id.clone(), member_id))
    }

    /// Events sent straight to a connection.
    pub fn connection_events(&self, connection_id: &ConnectionId) -> Vec<OutboundEvent> {
        self.sink.connection_events(connection_id)
    }

    /// Wait until every launched choreography has finished.
    pub async fn wait_for_choreographies(&self) {
        self.engine.shutdown(Duration::from_secs(3600)).await;
    }
}
