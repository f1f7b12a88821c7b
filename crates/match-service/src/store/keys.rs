//! Key naming for the shared store.
//!
//! # Key Patterns
//!
//! - `{prefix}:room:{room_id}` - room record (JSON)
//! - `{prefix}:member:{member_id}` - member index (room id)
//! - `{prefix}:connection:{connection_id}` - connection binding (JSON)
//! - `{prefix}:pointer` - currently open room
//! - `{prefix}:choice:{room_id}:{choicer_id}` - choice target
//! - `{prefix}:matches:{room_id}` - matched member ids (JSON array)
//! - `{prefix}:window` - event window (JSON)
//! - `{prefix}:queue:membership`, `{prefix}:queue:choice` - job lanes

use common::types::{ConnectionId, MemberId, RoomId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    #[must_use]
    pub fn room(&self, room_id: &RoomId) -> String {
        format!("{}:room:{room_id}", self.prefix)
    }

    #[must_use]
    pub fn member(&self, member_id: MemberId) -> String {
        format!("{}:member:{member_id}", self.prefix)
    }

    #[must_use]
    pub fn connection(&self, connection_id: &ConnectionId) -> String {
        format!("{}:connection:{connection_id}", self.prefix)
    }

    #[must_use]
    pub fn pointer(&self) -> String {
        format!("{}:pointer", self.prefix)
    }

    #[must_use]
    pub fn choice(&self, room_id: &RoomId, choicer_id: MemberId) -> String {
        format!("{}:choice:{room_id}:{choicer_id}", self.prefix)
    }

    #[must_use]
    pub fn matches(&self, room_id: &RoomId) -> String {
        format!("{}:matches:{room_id}", self.prefix)
    }

    #[must_use]
    pub fn window(&self) -> String {
        format!("{}:window", self.prefix)
    }

    #[must_use]
    pub fn membership_lane(&self) -> String {
        format!("{}:queue:membership", self.prefix)
    }

    #[must_use]
    pub fn choice_lane(&self) -> String {
        format!("{}:queue:choice", self.prefix)
    }

    /// Pub/sub channel carrying sink commands between instances.
    #[must_use]
    pub fn broadcast_channel(&self) -> String {
        format!("{}:broadcast", self.prefix)
    }
}
