//! Rooms: records, lifecycle, allocation and matching.
//!
//! - `model` - room record, participant, lifecycle state machine
//! - `registry` - guarded CRUD over room records
//! - `allocator` - picks a room for an arriving member
//! - `ledger` - choices, mutual matches, unmatched members

pub mod allocator;
pub mod ledger;
pub mod model;
pub mod registry;

pub use allocator::Allocator;
pub use ledger::MatchingLedger;
pub use model::{
    Admission, ConnectionBinding, Departure, JoinStatus, Participant, Room, RoomState,
};
pub use registry::RoomRegistry;
