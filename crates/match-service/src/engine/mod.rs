//! Matchmaking engine.
//!
//! Applies queue jobs to the room registry, allocator and matching ledger,
//! pushes the resulting events to the broadcast sink, and launches one
//! choreography task per room when it fills.
//!
//! Correctness rests on the store's guarded commits, not on this process
//! being the only consumer: several instances may run the same lanes.

pub mod choreography;
pub mod script;

use crate::broadcast::{BroadcastSink, ChatMessage, Group, OutboundEvent};
use crate::chatroom::ChatroomCreator;
use crate::config::ChoreographyConfig;
use crate::engine::choreography::{scripted_duration, Choreography};
use crate::errors::MatchError;
use crate::observability::metrics;
use crate::queue::Job;
use crate::room::{Admission, Allocator, JoinStatus, MatchingLedger, RoomRegistry, RoomState};
use crate::store::{KeySpace, SharedStore};
use crate::window::EventWindowStore;
use chrono::Utc;
use common::types::{ConnectionId, MemberId, RoomId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

/// Allocate-and-admit rounds per ENTER before a contended entry is dropped.
/// Each round retries its own commit up to `store::MAX_CAS_ATTEMPTS` times.
const ENTER_ATTEMPTS: usize = 10;

pub struct Engine {
    registry: RoomRegistry,
    allocator: Allocator,
    ledger: MatchingLedger,
    windows: EventWindowStore,
    sink: Arc<dyn BroadcastSink>,
    chatroom: Arc<dyn ChatroomCreator>,
    choreography: ChoreographyConfig,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        store: Arc<dyn SharedStore>,
        keys: KeySpace,
        room_ttl: Duration,
        sink: Arc<dyn BroadcastSink>,
        chatroom: Arc<dyn ChatroomCreator>,
        choreography: ChoreographyConfig,
        cancel: CancellationToken,
    ) -> Self {
        let registry = RoomRegistry::new(Arc::clone(&store), keys.clone(), room_ttl);
        Self {
            allocator: Allocator::new(Arc::clone(&store), registry.clone()),
            ledger: MatchingLedger::new(Arc::clone(&store), registry.clone()),
            windows: EventWindowStore::new(store, keys),
            registry,
            sink,
            chatroom,
            choreography,
            tracker: TaskTracker::new(),
            cancel,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &MatchingLedger {
        &self.ledger
    }

    pub fn windows(&self) -> &EventWindowStore {
        &self.windows
    }

    /// Number of choreographies currently running in this process.
    pub fn active_choreographies(&self) -> usize {
        self.tracker.len()
    }

    /// Apply one job.
    pub async fn handle(&self, job: &Job) -> Result<(), MatchError> {
        match job {
            Job::Enter {
                member_id,
                connection_id,
                ..
            } => self.handle_enter(*member_id, connection_id).await,
            Job::Leave {
                member_id,
                connection_id,
                room_id,
                ..
            } => {
                self.handle_leave(*member_id, connection_id, room_id.as_ref())
                    .await
            }
            Job::Choice {
                member_id,
                connection_id,
                target_id,
                room_id,
                ..
            } => {
                self.handle_choice(*member_id, connection_id, *target_id, room_id.as_ref())
                    .await
            }
        }
    }

    /// Seat a member and announce it; start the room when it fills.
    #[instrument(skip_all, fields(member_id = %member_id, connection_id = %connection_id))]
    pub async fn handle_enter(
        &self,
        member_id: MemberId,
        connection_id: &ConnectionId,
    ) -> Result<(), MatchError> {
        let capacity = match self.windows.require_open().await {
            Ok(capacity) => capacity,
            Err(MatchError::WindowNotOpen) => {
                info!(target: "mm.queue", member_id = %member_id, "Entry rejected, event window closed");
                metrics::record_error("enter", MatchError::WindowNotOpen.error_type_label());
                self.notify(
                    connection_id,
                    OutboundEvent::exception(&MatchError::WindowNotOpen),
                )
                .await;
                self.reject(connection_id).await;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut attempt = 0;
        let (room_id, admission) = loop {
            attempt += 1;
            let (room_id, status) = match self.allocator.assign(member_id, capacity).await {
                Ok(assigned) => assigned,
                Err(MatchError::Conflict(detail)) if attempt < ENTER_ATTEMPTS => {
                    debug!(target: "mm.queue", detail = %detail, attempt, "Open room contended, reallocating");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if status == JoinStatus::Duplicate
                && self.registry.get_state(&room_id).await? == RoomState::Ended
            {
                info!(target: "mm.queue", member_id = %member_id, room_id = %room_id, "Reconnect to ended room");
                self.reject(connection_id).await;
                return Ok(());
            }

            match self
                .registry
                .add_member(&room_id, member_id, connection_id, capacity)
                .await
            {
                Ok(admission) => break (room_id, admission),
                Err(MatchError::RoomUnavailable(detail) | MatchError::Conflict(detail))
                    if attempt < ENTER_ATTEMPTS =>
                {
                    debug!(target: "mm.queue", room_id = %room_id, detail = %detail, attempt, "Room changed underneath, reallocating");
                }
                Err(e) => return Err(e),
            }
        };

        self.join_groups(connection_id, &room_id, member_id).await;
        self.announce(connection_id, &room_id, &admission, capacity)
            .await
    }

    async fn join_groups(
        &self,
        connection_id: &ConnectionId,
        room_id: &RoomId,
        member_id: MemberId,
    ) {
        for group in [
            Group::Room(room_id.clone()),
            Group::Member(room_id.clone(), member_id),
        ] {
            match self.sink.join_group(connection_id, &group).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(target: "mm.queue", connection_id = %connection_id, "Connection not held by this sink");
                }
                Err(e) => {
                    warn!(target: "mm.queue", connection_id = %connection_id, error = %e, "Failed to join broadcast group");
                }
            }
        }
    }

    async fn announce(
        &self,
        connection_id: &ConnectionId,
        room_id: &RoomId,
        admission: &Admission,
        capacity: usize,
    ) -> Result<(), MatchError> {
        self.notify(
            connection_id,
            OutboundEvent::Join {
                display_name: admission.display_name.clone(),
                room_id: room_id.clone(),
            },
        )
        .await;

        let joined = OutboundEvent::Joined {
            room_id: room_id.clone(),
            occupancy: admission.occupancy,
        };

        if admission.status == JoinStatus::Duplicate {
            self.notify(connection_id, joined).await;
        } else {
            self.broadcast(&Group::Room(room_id.clone()), joined).await;
        }

        // A reconnect into a full room that is still WAITING re-claims the
        // start a failed fill left behind. `start` is a no-op once claimed.
        if admission.occupancy >= capacity && self.registry.start(room_id).await? {
            self.launch_choreography(room_id.clone());
        }
        Ok(())
    }

    fn launch_choreography(&self, room_id: RoomId) {
        let prompts =
            script::pick_prompts(&mut rand::thread_rng(), self.choreography.prompt_count);
        info!(
            target: "mm.choreography",
            room_id = %room_id,
            scripted_secs = scripted_duration(&self.choreography, prompts.len()).as_secs(),
            "Room full, launching choreography"
        );

        let choreography = Choreography::new(
            room_id,
            self.registry.clone(),
            self.ledger.clone(),
            Arc::clone(&self.sink),
            self.choreography.clone(),
            prompts,
            self.cancel.child_token(),
        );
        self.tracker.spawn(choreography.run());
    }

    /// Remove a connection and re-announce occupancy if the member left.
    ///
    /// # Errors
    ///
    /// `MemberIdNotAvailable` when neither the connection binding nor the
    /// job names a room to leave.
    #[instrument(skip_all, fields(member_id = %member_id, connection_id = %connection_id))]
    pub async fn handle_leave(
        &self,
        member_id: MemberId,
        connection_id: &ConnectionId,
        fallback_room: Option<&RoomId>,
    ) -> Result<(), MatchError> {
        let (member_id, room_id) = match self.registry.binding(connection_id).await? {
            Some(binding) => (binding.member_id, binding.room_id),
            None => match fallback_room {
                Some(room_id) => (member_id, room_id.clone()),
                None => {
                    debug!(target: "mm.queue", connection_id = %connection_id, "Leave for a connection that was never seated");
                    return Err(MatchError::MemberIdNotAvailable);
                }
            },
        };

        let occupancy = match self.registry.leave(&room_id, member_id, connection_id).await {
            Ok(occupancy) => occupancy,
            Err(MatchError::RoomNotFound(_)) => {
                debug!(target: "mm.queue", room_id = %room_id, "Leave for an expired room");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if let Some(occupancy) = occupancy {
            self.broadcast(
                &Group::Room(room_id.clone()),
                OutboundEvent::Joined { room_id, occupancy },
            )
            .await;
        }
        Ok(())
    }

    /// Record a choice; on a fresh mutual match open a chatroom for the pair.
    #[instrument(skip_all, fields(member_id = %choicer_id, target_id = %target_id))]
    pub async fn handle_choice(
        &self,
        choicer_id: MemberId,
        connection_id: &ConnectionId,
        target_id: MemberId,
        fallback_room: Option<&RoomId>,
    ) -> Result<(), MatchError> {
        let room_id = match self.registry.binding(connection_id).await? {
            Some(binding) => binding.room_id,
            None => fallback_room
                .cloned()
                .ok_or_else(|| MatchError::RoomNotFound(format!("no room for {connection_id}")))?,
        };

        let room = self.registry.get(&room_id).await?;
        if choicer_id == target_id {
            return Err(MatchError::InvalidChoice(format!("{choicer_id} chose themselves")));
        }
        if room.participant(choicer_id).is_none() {
            return Err(MatchError::InvalidChoice(format!("{choicer_id} is not in {room_id}")));
        }
        if room.participant(target_id).is_none() {
            return Err(MatchError::InvalidChoice(format!("{target_id} is not in {room_id}")));
        }

        if !self.ledger.choice(&room_id, choicer_id, target_id).await? {
            return Ok(());
        }
        metrics::record_match();

        let chatroom_id = self.chatroom.create_chatroom(choicer_id, target_id).await?;
        for member in [choicer_id, target_id] {
            self.broadcast(
                &Group::Member(room_id.clone(), member),
                OutboundEvent::CreateChat {
                    room_id: chatroom_id.clone(),
                },
            )
            .await;
        }
        info!(target: "mm.queue", room_id = %room_id, choicer_id = %choicer_id, target_id = %target_id, "Chatroom delivered to matched pair");
        Ok(())
    }

    /// Re-broadcast a chat line to the sender's room.
    ///
    /// Room and sender come from the connection binding, never from the
    /// client.
    ///
    /// # Errors
    ///
    /// - `RoomNotFound` if the connection has not been seated
    /// - `MemberNameNotFound` if the sender has no display name in the room
    #[instrument(skip_all, fields(connection_id = %connection_id))]
    pub async fn handle_message(
        &self,
        connection_id: &ConnectionId,
        text: String,
    ) -> Result<(), MatchError> {
        let binding = self
            .registry
            .binding(connection_id)
            .await?
            .ok_or_else(|| MatchError::RoomNotFound(format!("no room for {connection_id}")))?;
        let display_name = self
            .registry
            .display_name(&binding.room_id, binding.member_id)
            .await?;

        self.sink
            .to_group(
                &Group::Room(binding.room_id),
                OutboundEvent::Broadcast(ChatMessage {
                    text,
                    sender_id: binding.member_id,
                    display_name,
                    sent_at: Utc::now(),
                }),
            )
            .await
    }

    /// Best-effort `exception` to the connection a failed job came from.
    pub async fn report_exception(&self, connection_id: &ConnectionId, error: &MatchError) {
        self.notify(connection_id, OutboundEvent::exception(error))
            .await;
    }

    /// Wait for running choreographies, up to `timeout`.
    pub async fn shutdown(&self, timeout: Duration) {
        self.tracker.close();
        if tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                target: "mm.choreography",
                remaining = self.tracker.len(),
                "Choreographies still running at shutdown deadline"
            );
        }
    }

    async fn reject(&self, connection_id: &ConnectionId) {
        self.notify(connection_id, OutboundEvent::Ended).await;
        if let Err(e) = self.sink.disconnect(connection_id).await {
            warn!(target: "mm.queue", connection_id = %connection_id, error = %e, "Disconnect failed");
        }
    }

    async fn notify(&self, connection_id: &ConnectionId, event: OutboundEvent) {
        let name = event.name();
        if let Err(e) = self.sink.to_connection(connection_id, event).await {
            warn!(target: "mm.queue", connection_id = %connection_id, event = name, error = %e, "Delivery failed");
        }
    }

    async fn broadcast(&self, group: &Group, event: OutboundEvent) {
        let name = event.name();
        if let Err(e) = self.sink.to_group(group, event).await {
            warn!(target: "mm.queue", group = ?group, event = name, error = %e, "Broadcast failed");
        }
    }
}
