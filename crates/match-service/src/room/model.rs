//! Room records and the room lifecycle.
//!
//! A room moves `WAITING -> PROCESSING -> ENDED` and never skips a state.
//! Structural membership (who is in the room) only changes while WAITING;
//! afterwards only connection bookkeeping on existing participants changes.

use crate::errors::MatchError;
use common::types::{ConnectionId, MemberId, RoomId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Display names are minted as `{DISPLAY_NAME_PREFIX}{n}`.
pub const DISPLAY_NAME_PREFIX: &str = "Anonymous-";

/// Lifecycle state of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomState {
    /// Accepting joins.
    Waiting,
    /// Choreography running, membership frozen.
    Processing,
    /// Terminal, kept until its TTL runs out.
    Ended,
}

impl RoomState {
    /// State after `start`, or `None` if `start` does not apply.
    #[must_use]
    pub fn started(self) -> Option<Self> {
        match self {
            RoomState::Waiting => Some(RoomState::Processing),
            RoomState::Processing | RoomState::Ended => None,
        }
    }

    /// State after `terminate`, or `None` if already ended.
    #[must_use]
    pub fn terminated(self) -> Option<Self> {
        match self {
            RoomState::Waiting | RoomState::Processing => Some(RoomState::Ended),
            RoomState::Ended => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RoomState::Waiting => "WAITING",
            RoomState::Processing => "PROCESSING",
            RoomState::Ended => "ENDED",
        }
    }
}

/// Whether an admission added a participant or re-bound an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStatus {
    First,
    Duplicate,
}

/// A member seated in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub member_id: MemberId,
    pub display_name: String,
    /// Live transport connections (one per tab).
    pub connections: BTreeSet<ConnectionId>,
}

/// Result of admitting a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub display_name: String,
    pub occupancy: usize,
    pub status: JoinStatus,
}

/// Result of removing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// Room not WAITING or member not seated; nothing changed.
    NotApplied,
    /// The member still has other connections.
    ConnectionClosed,
    /// The member left the room; new occupancy.
    Left { occupancy: usize },
}

/// Room record as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub state: RoomState,
    pub participants: Vec<Participant>,
    /// Next display-name number; starts at 1 and only grows.
    pub name_counter: u32,
    pub created_at: i64,
}

impl Room {
    #[must_use]
    pub fn new(id: RoomId) -> Self {
        Self {
            id,
            state: RoomState::Waiting,
            participants: Vec::new(),
            name_counter: 1,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, MatchError> {
        serde_json::from_str(raw)
            .map_err(|e| MatchError::Internal(format!("corrupt room record: {e}")))
    }

    pub fn to_json(&self) -> Result<String, MatchError> {
        serde_json::to_string(self)
            .map_err(|e| MatchError::Internal(format!("room serialization failed: {e}")))
    }

    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn participant(&self, member_id: MemberId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.member_id == member_id)
    }

    #[must_use]
    pub fn member_ids(&self) -> Vec<MemberId> {
        self.participants.iter().map(|p| p.member_id).collect()
    }

    /// Whether a new member could be seated right now.
    #[must_use]
    pub fn has_vacancy(&self, capacity: usize) -> bool {
        self.state == RoomState::Waiting && self.occupancy() < capacity
    }

    /// Seat a member, or register another connection for a seated member.
    ///
    /// # Errors
    ///
    /// `RoomUnavailable` if a new member arrives when the room is full or no
    /// longer WAITING.
    pub fn admit(
        &mut self,
        member_id: MemberId,
        connection_id: &ConnectionId,
        capacity: usize,
    ) -> Result<Admission, MatchError> {
        if let Some(existing) = self
            .participants
            .iter_mut()
            .find(|p| p.member_id == member_id)
        {
            existing.connections.insert(connection_id.clone());
            let display_name = existing.display_name.clone();
            return Ok(Admission {
                display_name,
                occupancy: self.participants.len(),
                status: JoinStatus::Duplicate,
            });
        }

        if !self.has_vacancy(capacity) {
            return Err(MatchError::RoomUnavailable(format!(
                "{} ({}, {}/{capacity})",
                self.id,
                self.state.as_str(),
                self.occupancy()
            )));
        }

        let display_name = format!("{DISPLAY_NAME_PREFIX}{}", self.name_counter);
        self.name_counter = self.name_counter.saturating_add(1);
        self.participants.push(Participant {
            member_id,
            display_name: display_name.clone(),
            connections: BTreeSet::from([connection_id.clone()]),
        });

        Ok(Admission {
            display_name,
            occupancy: self.participants.len(),
            status: JoinStatus::First,
        })
    }

    /// Drop one connection of a member; the member leaves with their last one.
    pub fn depart(&mut self, member_id: MemberId, connection_id: &ConnectionId) -> Departure {
        if self.state != RoomState::Waiting {
            return Departure::NotApplied;
        }

        let Some(index) = self
            .participants
            .iter()
            .position(|p| p.member_id == member_id)
        else {
            return Departure::NotApplied;
        };

        let Some(participant) = self.participants.get_mut(index) else {
            return Departure::NotApplied;
        };
        participant.connections.remove(connection_id);
        if !participant.connections.is_empty() {
            return Departure::ConnectionClosed;
        }

        self.participants.remove(index);
        Departure::Left {
            occupancy: self.participants.len(),
        }
    }

    /// WAITING -> PROCESSING. Returns whether the transition happened.
    pub fn start(&mut self) -> bool {
        match self.state.started() {
            Some(next) => {
                self.state = next;
                true
            }
            None => false,
        }
    }

    /// Any state -> ENDED. Returns whether the transition happened.
    pub fn terminate(&mut self) -> bool {
        match self.state.terminated() {
            Some(next) => {
                self.state = next;
                true
            }
            None => false,
        }
    }
}

/// Which member and room a transport connection belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionBinding {
    pub member_id: MemberId,
    pub room_id: RoomId,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::from(id)
    }

    #[test]
    fn test_state_transitions() {
        assert_eq!(RoomState::Waiting.started(), Some(RoomState::Processing));
        assert_eq!(RoomState::Processing.started(), None);
        assert_eq!(RoomState::Ended.started(), None);

        assert_eq!(RoomState::Waiting.terminated(), Some(RoomState::Ended));
        assert_eq!(RoomState::Processing.terminated(), Some(RoomState::Ended));
        assert_eq!(RoomState::Ended.terminated(), None);
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&RoomState::Processing).unwrap(),
            "\"PROCESSING\""
        );
        let parsed: RoomState = serde_json::from_str("\"WAITING\"").unwrap();
        assert_eq!(parsed, RoomState::Waiting);
    }

    #[test]
    fn test_admit_mints_sequential_names() {
        let mut room = Room::new(RoomId::from("r"));

        let a = room.admit(MemberId(10), &conn("c1"), 4).unwrap();
        let b = room.admit(MemberId(20), &conn("c2"), 4).unwrap();

        assert_eq!(a.display_name, "Anonymous-1");
        assert_eq!(a.occupancy, 1);
        assert_eq!(a.status, JoinStatus::First);
        assert_eq!(b.display_name, "Anonymous-2");
        assert_eq!(b.occupancy, 2);
        assert_eq!(room.name_counter, 3);
    }

    #[test]
    fn test_readmit_keeps_name_and_occupancy() {
        let mut room = Room::new(RoomId::from("r"));
        let first = room.admit(MemberId(10), &conn("c1"), 4).unwrap();
        let again = room.admit(MemberId(10), &conn("c2"), 4).unwrap();

        assert_eq!(again.display_name, first.display_name);
        assert_eq!(again.occupancy, 1);
        assert_eq!(again.status, JoinStatus::Duplicate);
        assert_eq!(room.participant(MemberId(10)).unwrap().connections.len(), 2);
    }

    #[test]
    fn test_admit_rejects_new_member_when_full() {
        let mut room = Room::new(RoomId::from("r"));
        room.admit(MemberId(1), &conn("c1"), 2).unwrap();
        room.admit(MemberId(2), &conn("c2"), 2).unwrap();

        let result = room.admit(MemberId(3), &conn("c3"), 2);
        assert!(matches!(result, Err(MatchError::RoomUnavailable(_))));
        assert_eq!(room.occupancy(), 2);

        // A seated member can still add a tab
        assert!(room.admit(MemberId(2), &conn("c4"), 2).is_ok());
    }

    #[test]
    fn test_admit_after_start_only_rebinds() {
        let mut room = Room::new(RoomId::from("r"));
        room.admit(MemberId(1), &conn("c1"), 4).unwrap();
        assert!(room.start());

        assert!(matches!(
            room.admit(MemberId(2), &conn("c2"), 4),
            Err(MatchError::RoomUnavailable(_))
        ));
        let rebound = room.admit(MemberId(1), &conn("c3"), 4).unwrap();
        assert_eq!(rebound.status, JoinStatus::Duplicate);
    }

    #[test]
    fn test_names_are_not_reused_after_leave() {
        let mut room = Room::new(RoomId::from("r"));
        room.admit(MemberId(1), &conn("c1"), 4).unwrap();
        assert_eq!(
            room.depart(MemberId(1), &conn("c1")),
            Departure::Left { occupancy: 0 }
        );

        let next = room.admit(MemberId(2), &conn("c2"), 4).unwrap();
        assert_eq!(next.display_name, "Anonymous-2");
    }

    #[test]
    fn test_depart_with_other_tabs_open() {
        let mut room = Room::new(RoomId::from("r"));
        room.admit(MemberId(1), &conn("c1"), 4).unwrap();
        room.admit(MemberId(1), &conn("c2"), 4).unwrap();

        assert_eq!(
            room.depart(MemberId(1), &conn("c1")),
            Departure::ConnectionClosed
        );
        assert_eq!(room.occupancy(), 1);
        assert_eq!(
            room.depart(MemberId(1), &conn("c2")),
            Departure::Left { occupancy: 0 }
        );
    }

    #[test]
    fn test_depart_is_frozen_once_processing() {
        let mut room = Room::new(RoomId::from("r"));
        room.admit(MemberId(1), &conn("c1"), 4).unwrap();
        room.start();

        assert_eq!(room.depart(MemberId(1), &conn("c1")), Departure::NotApplied);
        assert_eq!(room.occupancy(), 1);
    }

    #[test]
    fn test_depart_unknown_member() {
        let mut room = Room::new(RoomId::from("r"));
        assert_eq!(room.depart(MemberId(9), &conn("c9")), Departure::NotApplied);
    }

    #[test]
    fn test_start_and_terminate_are_idempotent() {
        let mut room = Room::new(RoomId::from("r"));
        assert!(room.start());
        assert!(!room.start());
        assert!(room.terminate());
        assert!(!room.terminate());
        assert!(!room.start());
        assert_eq!(room.state, RoomState::Ended);
    }

    #[test]
    fn test_room_json_shape() {
        let mut room = Room::new(RoomId::from("r1"));
        room.admit(MemberId(7), &conn("c1"), 4).unwrap();

        let json: serde_json::Value = serde_json::from_str(&room.to_json().unwrap()).unwrap();
        assert_eq!(json["id"], "r1");
        assert_eq!(json["state"], "WAITING");
        assert_eq!(json["nameCounter"], 2);
        assert_eq!(json["participants"][0]["memberId"], 7);
        assert_eq!(json["participants"][0]["displayName"], "Anonymous-1");

        let parsed = Room::from_json(&room.to_json().unwrap()).unwrap();
        assert_eq!(parsed, room);
    }

    #[test]
    fn test_corrupt_record_is_internal_error() {
        assert!(matches!(
            Room::from_json("not json"),
            Err(MatchError::Internal(_))
        ));
    }
}
