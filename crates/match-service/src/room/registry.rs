//! Room registry.
//!
//! CRUD over room records in the shared store. Every mutation is a guarded
//! read-modify-commit through `update_with_retry`, so concurrent admissions
//! and departures on one room (from any instance) serialize on the record.
//! Admission and departure also maintain the member index and connection
//! bindings in the same commit.

use crate::errors::MatchError;
use crate::room::model::{Admission, ConnectionBinding, Departure, Participant, Room, RoomState};
use crate::store::{update_with_retry, KeySpace, SharedStore, Transaction, Update, Write};
use common::types::{ConnectionId, MemberId, RoomId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Room registry over the shared store. Cheap to clone.
#[derive(Clone)]
pub struct RoomRegistry {
    store: Arc<dyn SharedStore>,
    keys: KeySpace,
    ttl: Duration,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn SharedStore>, keys: KeySpace, ttl: Duration) -> Self {
        Self { store, keys, ttl }
    }

    #[must_use]
    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create an empty WAITING room.
    #[instrument(skip_all)]
    pub async fn create(&self) -> Result<RoomId, MatchError> {
        let room = Room::new(RoomId::new());
        let key = self.keys.room(&room.id);
        let transaction = Transaction::new()
            .guard(&key, None)
            .set(key, room.to_json()?, self.ttl);

        if !self.store.commit(transaction).await? {
            return Err(MatchError::Conflict(format!("room id collision: {}", room.id)));
        }
        info!(target: "mm.registry", room_id = %room.id, "Room created");
        Ok(room.id)
    }

    /// Create a room and make it the open room, if the open-room pointer
    /// still holds `expected_pointer`.
    ///
    /// Returns `None` when another writer moved the pointer first.
    pub(crate) async fn create_as_open(
        &self,
        expected_pointer: Option<String>,
    ) -> Result<Option<RoomId>, MatchError> {
        let room = Room::new(RoomId::new());
        let key = self.keys.room(&room.id);
        let pointer = self.keys.pointer();
        let transaction = Transaction::new()
            .guard(&key, None)
            .guard(&pointer, expected_pointer)
            .set(key, room.to_json()?, self.ttl)
            .set(pointer, room.id.to_string(), self.ttl);

        if self.store.commit(transaction).await? {
            info!(target: "mm.registry", room_id = %room.id, "Room created and opened");
            Ok(Some(room.id))
        } else {
            Ok(None)
        }
    }

    /// Load a room, `None` if it does not exist.
    pub async fn find(&self, room_id: &RoomId) -> Result<Option<Room>, MatchError> {
        self.store
            .get(&self.keys.room(room_id))
            .await?
            .map(|raw| Room::from_json(&raw))
            .transpose()
    }

    /// Load a room.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` if the room does not exist.
    pub async fn get(&self, room_id: &RoomId) -> Result<Room, MatchError> {
        self.find(room_id)
            .await?
            .ok_or_else(|| MatchError::RoomNotFound(room_id.to_string()))
    }

    pub async fn get_state(&self, room_id: &RoomId) -> Result<RoomState, MatchError> {
        Ok(self.get(room_id).await?.state)
    }

    pub async fn get_occupancy(&self, room_id: &RoomId) -> Result<usize, MatchError> {
        Ok(self.get(room_id).await?.occupancy())
    }

    pub async fn participants(&self, room_id: &RoomId) -> Result<Vec<Participant>, MatchError> {
        Ok(self.get(room_id).await?.participants)
    }

    /// Display name of a seated member.
    ///
    /// # Errors
    ///
    /// `MemberNameNotFound` if the member has no name in this room.
    pub async fn display_name(
        &self,
        room_id: &RoomId,
        member_id: MemberId,
    ) -> Result<String, MatchError> {
        self.get(room_id)
            .await?
            .participant(member_id)
            .map(|p| p.display_name.clone())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| MatchError::MemberNameNotFound(format!("{room_id}/{member_id}")))
    }

    /// Room the member index maps this member to.
    pub async fn room_of(&self, member_id: MemberId) -> Result<Option<RoomId>, MatchError> {
        Ok(self
            .store
            .get(&self.keys.member(member_id))
            .await?
            .map(RoomId))
    }

    /// Member and room a connection was admitted with.
    pub async fn binding(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Option<ConnectionBinding>, MatchError> {
        self.store
            .get(&self.keys.connection(connection_id))
            .await?
            .map(|raw| {
                serde_json::from_str(&raw)
                    .map_err(|e| MatchError::Internal(format!("corrupt connection binding: {e}")))
            })
            .transpose()
    }

    /// Admit a member, or register another connection for a seated member.
    ///
    /// # Errors
    ///
    /// - `RoomNotFound` if the room does not exist
    /// - `RoomUnavailable` if a new member arrives at a full or started room
    /// - `Conflict` if the record kept changing underneath
    #[instrument(skip_all, fields(room_id = %room_id, member_id = %member_id))]
    pub async fn add_member(
        &self,
        room_id: &RoomId,
        member_id: MemberId,
        connection_id: &ConnectionId,
        capacity: usize,
    ) -> Result<Admission, MatchError> {
        let key = self.keys.room(room_id);
        let binding = serde_json::to_string(&ConnectionBinding {
            member_id,
            room_id: room_id.clone(),
        })
        .map_err(|e| MatchError::Internal(format!("binding serialization failed: {e}")))?;

        let admission = update_with_retry(self.store.as_ref(), &key, |current| {
            let raw = current.ok_or_else(|| MatchError::RoomNotFound(room_id.to_string()))?;
            let mut room = Room::from_json(raw)?;
            let admission = room.admit(member_id, connection_id, capacity)?;

            Ok(Update::write(
                admission,
                vec![
                    Write::Set {
                        key: key.clone(),
                        value: room.to_json()?,
                        ttl: Some(self.ttl),
                    },
                    Write::Set {
                        key: self.keys.member(member_id),
                        value: room_id.to_string(),
                        ttl: Some(self.ttl),
                    },
                    Write::Set {
                        key: self.keys.connection(connection_id),
                        value: binding.clone(),
                        ttl: Some(self.ttl),
                    },
                ],
            ))
        })
        .await?;

        debug!(
            target: "mm.registry",
            room_id = %room_id,
            member_id = %member_id,
            display_name = %admission.display_name,
            occupancy = admission.occupancy,
            status = ?admission.status,
            "Member admitted"
        );
        Ok(admission)
    }

    /// Remove one connection of a member.
    ///
    /// Returns the new occupancy when the member left the room, `None` when
    /// nothing structural changed (room not WAITING, member still has other
    /// connections, or member not seated).
    #[instrument(skip_all, fields(room_id = %room_id, member_id = %member_id))]
    pub async fn leave(
        &self,
        room_id: &RoomId,
        member_id: MemberId,
        connection_id: &ConnectionId,
    ) -> Result<Option<usize>, MatchError> {
        let key = self.keys.room(room_id);

        let departure = update_with_retry(self.store.as_ref(), &key, |current| {
            let raw = current.ok_or_else(|| MatchError::RoomNotFound(room_id.to_string()))?;
            let mut room = Room::from_json(raw)?;
            let departure = room.depart(member_id, connection_id);

            let mut writes = match departure {
                Departure::NotApplied => return Ok(Update::unchanged(departure)),
                Departure::ConnectionClosed => Vec::new(),
                Departure::Left { .. } => vec![Write::Delete {
                    key: self.keys.member(member_id),
                }],
            };
            writes.push(Write::Set {
                key: key.clone(),
                value: room.to_json()?,
                ttl: Some(self.ttl),
            });
            writes.push(Write::Delete {
                key: self.keys.connection(connection_id),
            });
            Ok(Update::write(departure, writes))
        })
        .await?;

        match departure {
            Departure::Left { occupancy } => {
                info!(target: "mm.registry", room_id = %room_id, member_id = %member_id, occupancy, "Member left room");
                Ok(Some(occupancy))
            }
            Departure::ConnectionClosed | Departure::NotApplied => Ok(None),
        }
    }

    /// WAITING -> PROCESSING. Returns whether this call made the transition.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn start(&self, room_id: &RoomId) -> Result<bool, MatchError> {
        self.transition(room_id, Room::start).await
    }

    /// Move the room to ENDED. Returns whether this call made the transition.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn terminate(&self, room_id: &RoomId) -> Result<bool, MatchError> {
        self.transition(room_id, Room::terminate).await
    }

    async fn transition(
        &self,
        room_id: &RoomId,
        apply: fn(&mut Room) -> bool,
    ) -> Result<bool, MatchError> {
        let key = self.keys.room(room_id);
        let changed = update_with_retry(self.store.as_ref(), &key, |current| {
            let raw = current.ok_or_else(|| MatchError::RoomNotFound(room_id.to_string()))?;
            let mut room = Room::from_json(raw)?;
            if !apply(&mut room) {
                return Ok(Update::unchanged(None));
            }
            Ok(Update::write(
                Some(room.state),
                vec![Write::Set {
                    key: key.clone(),
                    value: room.to_json()?,
                    ttl: Some(self.ttl),
                }],
            ))
        })
        .await?;

        if let Some(state) = changed {
            info!(target: "mm.registry", room_id = %room_id, state = state.as_str(), "Room state changed");
        }
        Ok(changed.is_some())
    }
}
