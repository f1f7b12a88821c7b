//! Event queue.
//!
//! Jobs travel from the gateway to the engine over two FIFO lanes in the
//! shared store, so joins and leaves never wait behind a burst of votes.
//!
//! Wire shape (JSON):
//! `{type: "ENTER"|"LEAVE"|"CHOICE", timestamp, memberId, connectionId, targetId?, roomId?}`

pub mod consumer;

use crate::errors::MatchError;
use crate::store::{KeySpace, SharedStore};
use chrono::Utc;
use common::types::{ConnectionId, MemberId, RoomId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

pub use consumer::LaneConsumer;

/// A queue lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// ENTER and LEAVE.
    Membership,
    /// CHOICE.
    Choice,
}

impl Lane {
    pub const ALL: [Lane; 2] = [Lane::Membership, Lane::Choice];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Lane::Membership => "membership",
            Lane::Choice => "choice",
        }
    }

    #[must_use]
    pub fn key(self, keys: &KeySpace) -> String {
        match self {
            Lane::Membership => keys.membership_lane(),
            Lane::Choice => keys.choice_lane(),
        }
    }
}

/// A queued job.
///
/// `room_id` on LEAVE and CHOICE is filled from the connection binding at
/// enqueue time, never from client payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Job {
    #[serde(rename_all = "camelCase")]
    Enter {
        timestamp: i64,
        member_id: MemberId,
        connection_id: ConnectionId,
    },
    #[serde(rename_all = "camelCase")]
    Leave {
        timestamp: i64,
        member_id: MemberId,
        connection_id: ConnectionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },
    #[serde(rename_all = "camelCase")]
    Choice {
        timestamp: i64,
        member_id: MemberId,
        connection_id: ConnectionId,
        target_id: MemberId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },
}

impl Job {
    #[must_use]
    pub fn enter(member_id: MemberId, connection_id: ConnectionId) -> Self {
        Job::Enter {
            timestamp: Utc::now().timestamp_millis(),
            member_id,
            connection_id,
        }
    }

    #[must_use]
    pub fn leave(
        member_id: MemberId,
        connection_id: ConnectionId,
        room_id: Option<RoomId>,
    ) -> Self {
        Job::Leave {
            timestamp: Utc::now().timestamp_millis(),
            member_id,
            connection_id,
            room_id,
        }
    }

    #[must_use]
    pub fn choice(
        member_id: MemberId,
        connection_id: ConnectionId,
        target_id: MemberId,
        room_id: Option<RoomId>,
    ) -> Self {
        Job::Choice {
            timestamp: Utc::now().timestamp_millis(),
            member_id,
            connection_id,
            target_id,
            room_id,
        }
    }

    #[must_use]
    pub fn lane(&self) -> Lane {
        match self {
            Job::Enter { .. } | Job::Leave { .. } => Lane::Membership,
            Job::Choice { .. } => Lane::Choice,
        }
    }

    /// Metric label.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Job::Enter { .. } => "enter",
            Job::Leave { .. } => "leave",
            Job::Choice { .. } => "choice",
        }
    }

    #[must_use]
    pub fn member_id(&self) -> MemberId {
        match self {
            Job::Enter { member_id, .. }
            | Job::Leave { member_id, .. }
            | Job::Choice { member_id, .. } => *member_id,
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        match self {
            Job::Enter { connection_id, .. }
            | Job::Leave { connection_id, .. }
            | Job::Choice { connection_id, .. } => connection_id,
        }
    }

    /// Decode a payload popped from a lane.
    ///
    /// # Errors
    ///
    /// `MalformedJob` for anything that is not a well-formed job.
    pub fn decode(raw: &str) -> Result<Self, MatchError> {
        serde_json::from_str(raw).map_err(|e| MatchError::MalformedJob(e.to_string()))
    }

    /// # Errors
    ///
    /// `Internal` if serialization fails.
    pub fn encode(&self) -> Result<String, MatchError> {
        serde_json::to_string(self)
            .map_err(|e| MatchError::Internal(format!("job serialization failed: {e}")))
    }
}

/// Producer and raw consumer side of the lanes.
#[derive(Clone)]
pub struct EventQueue {
    store: Arc<dyn SharedStore>,
    keys: KeySpace,
}

impl EventQueue {
    pub fn new(store: Arc<dyn SharedStore>, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    /// Append a job to the tail of its lane.
    #[instrument(skip_all, fields(kind = job.kind(), member_id = %job.member_id()))]
    pub async fn enqueue(&self, job: &Job) -> Result<(), MatchError> {
        let lane = job.lane();
        self.store
            .push(&lane.key(&self.keys), job.encode()?)
            .await?;
        debug!(target: "mm.queue", lane = lane.as_str(), kind = job.kind(), "Job enqueued");
        Ok(())
    }

    /// Next raw payload from a lane; waits until one is available.
    pub async fn pop_raw(&self, lane: Lane) -> Result<String, MatchError> {
        self.store.pop_blocking(&lane.key(&self.keys)).await
    }
}
