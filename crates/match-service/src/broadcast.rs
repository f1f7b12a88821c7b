//! Outbound events and the broadcast sink.
//!
//! The engine never talks to sockets. It addresses *groups* (everyone in a
//! room, or every connection of one member in a room) and single connections
//! through `BroadcastSink`, which the transport layer implements.
//!
//! Events are serialized as `{"event": "<name>", "data": {...}}`.

use crate::errors::MatchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{ConnectionId, MemberId, RoomId};
use serde::{Deserialize, Serialize};

/// Sender id used for system messages.
pub const SYSTEM_SENDER_ID: MemberId = MemberId(0);

/// A delivery group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Group {
    /// Everyone connected to a room.
    Room(RoomId),
    /// All connections of one member in a room.
    Member(RoomId, MemberId),
}

/// Chat line, from a member or from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub text: String,
    pub sender_id: MemberId,
    pub display_name: String,
    pub sent_at: DateTime<Utc>,
}

/// One line of the participant roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub member_id: MemberId,
    pub display_name: String,
}

/// Server-to-client events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// Sent to the joining connection with its assigned name.
    #[serde(rename_all = "camelCase")]
    Join {
        display_name: String,
        room_id: RoomId,
    },
    /// Room occupancy changed.
    #[serde(rename_all = "camelCase")]
    Joined { room_id: RoomId, occupancy: usize },
    #[serde(rename_all = "camelCase")]
    Start { room_id: RoomId },
    /// Chat input disabled.
    Freeze,
    /// Chat input enabled.
    Thaw,
    System(ChatMessage),
    Broadcast(ChatMessage),
    Participants { roster: Vec<RosterEntry> },
    /// Private chatroom created for a mutual match.
    #[serde(rename_all = "camelCase")]
    CreateChat { room_id: String },
    /// No match this time.
    Failed,
    /// Connection rejected or room already over.
    Ended,
    Exception {
        error: String,
        message: String,
        time: DateTime<Utc>,
    },
}

impl OutboundEvent {
    /// `exception` event for an error, with a client-safe message.
    #[must_use]
    pub fn exception(error: &MatchError) -> Self {
        OutboundEvent::Exception {
            error: error.error_name().to_string(),
            message: error.client_message(),
            time: Utc::now(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::Join { .. } => "join",
            OutboundEvent::Joined { .. } => "joined",
            OutboundEvent::Start { .. } => "start",
            OutboundEvent::Freeze => "freeze",
            OutboundEvent::Thaw => "thaw",
            OutboundEvent::System(_) => "system",
            OutboundEvent::Broadcast(_) => "broadcast",
            OutboundEvent::Participants { .. } => "participants",
            OutboundEvent::CreateChat { .. } => "create_chat",
            OutboundEvent::Failed => "failed",
            OutboundEvent::Ended => "ended",
            OutboundEvent::Exception { .. } => "exception",
        }
    }
}

/// Where the engine pushes outbound events.
#[async_trait]
pub trait BroadcastSink: Send + Sync {
    /// Add a connection to a group.
    ///
    /// Returns `false` if this sink does not hold the connection.
    async fn join_group(&self, connection: &ConnectionId, group: &Group)
        -> Result<bool, MatchError>;

    /// Deliver to every connection in a group.
    async fn to_group(&self, group: &Group, event: OutboundEvent) -> Result<(), MatchError>;

    /// Deliver to one connection.
    async fn to_connection(
        &self,
        connection: &ConnectionId,
        event: OutboundEvent,
    ) -> Result<(), MatchError>;

    /// Close a connection.
    async fn disconnect(&self, connection: &ConnectionId) -> Result<(), MatchError>;
}

/// Recording sink for tests.
pub mod mock {
    use super::{BroadcastSink, Group, OutboundEvent};
    use crate::errors::MatchError;
    use async_trait::async_trait;
    use common::types::ConnectionId;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Target of a recorded delivery.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Target {
        Group(Group),
        Connection(ConnectionId),
    }

    #[derive(Debug, Default)]
    struct Recorded {
        deliveries: Vec<(Target, OutboundEvent)>,
        memberships: Vec<(ConnectionId, Group)>,
        disconnected: Vec<ConnectionId>,
    }

    /// Sink that records everything it is asked to do.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        recorded: Mutex<Recorded>,
        failing: AtomicBool,
    }

    impl RecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every delivery fail (memberships still succeed).
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn with<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> Result<T, MatchError> {
            self.recorded
                .lock()
                .map(|mut r| f(&mut r))
                .map_err(|_| MatchError::Internal("recording sink poisoned".to_string()))
        }

        /// Every delivery in order.
        pub fn deliveries(&self) -> Vec<(Target, OutboundEvent)> {
            self.with(|r| r.deliveries.clone()).unwrap_or_default()
        }

        /// Events delivered to a group, in order.
        pub fn group_events(&self, group: &Group) -> Vec<OutboundEvent> {
            self.deliveries()
                .into_iter()
                .filter(|(t, _)| *t == Target::Group(group.clone()))
                .map(|(_, e)| e)
                .collect()
        }

        /// Events delivered directly to a connection, in order.
        pub fn connection_events(&self, connection: &ConnectionId) -> Vec<OutboundEvent> {
            self.deliveries()
                .into_iter()
                .filter(|(t, _)| *t == Target::Connection(connection.clone()))
                .map(|(_, e)| e)
                .collect()
        }

        /// Event names delivered to a group, in order.
        pub fn group_event_names(&self, group: &Group) -> Vec<&'static str> {
            self.group_events(group).iter().map(OutboundEvent::name).collect()
        }

        pub fn groups_of(&self, connection: &ConnectionId) -> Vec<Group> {
            self.with(|r| {
                r.memberships
                    .iter()
                    .filter(|(c, _)| c == connection)
                    .map(|(_, g)| g.clone())
                    .collect()
            })
            .unwrap_or_default()
        }

        pub fn is_disconnected(&self, connection: &ConnectionId) -> bool {
            self.with(|r| r.disconnected.contains(connection))
                .unwrap_or(false)
        }

        fn deliver(&self, target: Target, event: OutboundEvent) -> Result<(), MatchError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(MatchError::Broadcast("recording sink set to fail".to_string()));
            }
            self.with(|r| r.deliveries.push((target, event)))
        }
    }

    #[async_trait]
    impl BroadcastSink for RecordingSink {
        async fn join_group(
            &self,
            connection: &ConnectionId,
            group: &Group,
        ) -> Result<bool, MatchError> {
            self.with(|r| r.memberships.push((connection.clone(), group.clone())))?;
            Ok(true)
        }

        async fn to_group(&self, group: &Group, event: OutboundEvent) -> Result<(), MatchError> {
            self.deliver(Target::Group(group.clone()), event)
        }

        async fn to_connection(
            &self,
            connection: &ConnectionId,
            event: OutboundEvent,
        ) -> Result<(), MatchError> {
            self.deliver(Target::Connection(connection.clone()), event)
        }

        async fn disconnect(&self, connection: &ConnectionId) -> Result<(), MatchError> {
            self.with(|r| r.disconnected.push(connection.clone()))
        }
    }
}
