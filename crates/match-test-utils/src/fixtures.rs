//! Ids, jobs and timings for matchmaking tests.

use common::types::{ConnectionId, MemberId, RoomId};
use match_service::config::ChoreographyConfig;
use match_service::queue::Job;
use std::time::Duration;

/// Key prefix used by every harness.
pub const TEST_KEY_PREFIX: &str = "test";

/// Member id from a plain number.
#[must_use]
pub fn member(n: u64) -> MemberId {
    MemberId(n)
}

/// The default connection of member `n` ("conn-{n}").
#[must_use]
pub fn connection_of(n: u64) -> ConnectionId {
    ConnectionId::from(format!("conn-{n}").as_str())
}

/// A further connection of member `n`, e.g. a second browser tab.
#[must_use]
pub fn tab_of(n: u64, tab: u32) -> ConnectionId {
    ConnectionId::from(format!("conn-{n}-tab-{tab}").as_str())
}

#[must_use]
pub fn enter_job(n: u64) -> Job {
    Job::enter(member(n), connection_of(n))
}

#[must_use]
pub fn leave_job(n: u64, room_id: Option<RoomId>) -> Job {
    Job::leave(member(n), connection_of(n), room_id)
}

#[must_use]
pub fn choice_job(choicer: u64, target: u64) -> Job {
    Job::choice(member(choicer), connection_of(choicer), member(target), None)
}

/// Choreography timings short enough for paused-clock tests.
#[must_use]
pub fn fast_choreography() -> ChoreographyConfig {
    ChoreographyConfig {
        intro_delay: Duration::from_millis(10),
        prompt_settle: Duration::from_millis(20),
        chat_duration: Duration::from_millis(200),
        choice_window: Duration::from_millis(500),
        prompt_count: 2,
        host_name: "Cupid".to_string(),
    }
}
