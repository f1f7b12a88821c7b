//! Assignment allocator.
//!
//! Decides which room an arriving member belongs to. Reconnecting members are
//! routed back through the member index before capacity is consulted, so a
//! seated member is never double-counted. Everyone else goes to the room the
//! shared open-room pointer names, or to a new room when that one is full.
//! Moving the pointer is a guarded commit, so concurrent allocators on
//! different instances agree on a single new room.

use crate::errors::MatchError;
use crate::observability::metrics;
use crate::room::model::JoinStatus;
use crate::room::registry::RoomRegistry;
use crate::store::{SharedStore, MAX_CAS_ATTEMPTS};
use common::types::{MemberId, RoomId};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

#[derive(Clone)]
pub struct Allocator {
    store: Arc<dyn SharedStore>,
    registry: RoomRegistry,
}

impl Allocator {
    pub fn new(store: Arc<dyn SharedStore>, registry: RoomRegistry) -> Self {
        Self { store, registry }
    }

    /// Pick the room for `member_id`.
    ///
    /// Returns `Duplicate` when the member index already seats the member,
    /// `First` otherwise.
    ///
    /// # Errors
    ///
    /// `Conflict` if the open-room pointer kept moving for every attempt.
    #[instrument(skip_all, fields(member_id = %member_id, capacity = capacity))]
    pub async fn assign(
        &self,
        member_id: MemberId,
        capacity: usize,
    ) -> Result<(RoomId, JoinStatus), MatchError> {
        if let Some(room_id) = self.registry.room_of(member_id).await? {
            if self.registry.find(&room_id).await?.is_some() {
                debug!(target: "mm.allocator", member_id = %member_id, room_id = %room_id, "Member already seated");
                return Ok((room_id, JoinStatus::Duplicate));
            }
        }

        let pointer_key = self.registry.keys().pointer();
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let pointer = self.store.get(&pointer_key).await?;

            if let Some(open) = &pointer {
                let room_id = RoomId::from(open.as_str());
                if let Some(room) = self.registry.find(&room_id).await? {
                    if room.has_vacancy(capacity) {
                        return Ok((room_id, JoinStatus::First));
                    }
                }
            }

            if let Some(room_id) = self.registry.create_as_open(pointer).await? {
                metrics::record_room_created();
                return Ok((room_id, JoinStatus::First));
            }

            metrics::record_store_conflict();
            debug!(target: "mm.allocator", attempt, "Open-room pointer moved, retrying");
        }

        warn!(target: "mm.allocator", member_id = %member_id, "Could not claim an open room");
        Err(MatchError::Conflict(pointer_key))
    }
}
