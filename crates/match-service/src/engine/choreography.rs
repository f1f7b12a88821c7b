//! Per-room choreography.
//!
//! Runs once per room, launched by the engine when the room fills:
//!
//! 1. `start`, WAITING -> PROCESSING, `freeze`
//! 2. introductory system messages, each followed by the intro delay
//! 3. for each prompt: `freeze` + prompt, settle delay, `thaw`, chat duration
//! 4. roster of participants
//! 5. choice window
//! 6. `failed` to every member without a match
//! 7. room -> ENDED
//!
//! Broadcast failures are logged and the sequence carries on. A store failure
//! aborts the remaining steps and ends the room. Cancellation (shutdown) ends
//! the room as well, so no room stays PROCESSING.

use crate::broadcast::{
    BroadcastSink, ChatMessage, Group, OutboundEvent, RosterEntry, SYSTEM_SENDER_ID,
};
use crate::config::ChoreographyConfig;
use crate::engine::script::INTRO_MESSAGES;
use crate::errors::MatchError;
use crate::observability::metrics;
use crate::room::{MatchingLedger, RoomRegistry};
use chrono::Utc;
use common::types::RoomId;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Aborted,
    Cancelled,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Completed => "completed",
            Outcome::Aborted => "aborted",
            Outcome::Cancelled => "cancelled",
        }
    }
}

pub struct Choreography {
    room_id: RoomId,
    registry: RoomRegistry,
    ledger: MatchingLedger,
    sink: Arc<dyn BroadcastSink>,
    config: ChoreographyConfig,
    prompts: Vec<String>,
    cancel: CancellationToken,
}

impl Choreography {
    pub fn new(
        room_id: RoomId,
        registry: RoomRegistry,
        ledger: MatchingLedger,
        sink: Arc<dyn BroadcastSink>,
        config: ChoreographyConfig,
        prompts: Vec<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            room_id,
            registry,
            ledger,
            sink,
            config,
            prompts,
            cancel,
        }
    }

    /// Drive the room to ENDED.
    #[instrument(skip_all, name = "choreography", fields(room_id = %self.room_id))]
    pub async fn run(self) {
        metrics::choreography_started();
        info!(target: "mm.choreography", room_id = %self.room_id, "Choreography started");

        let outcome = tokio::select! {
            () = self.cancel.cancelled() => Outcome::Cancelled,
            result = self.steps() => match result {
                Ok(()) => Outcome::Completed,
                Err(e) => {
                    error!(
                        target: "mm.choreography",
                        room_id = %self.room_id,
                        error = %e,
                        "Choreography aborted"
                    );
                    Outcome::Aborted
                }
            },
        };

        if outcome != Outcome::Completed {
            if let Err(e) = self.registry.terminate(&self.room_id).await {
                warn!(
                    target: "mm.choreography",
                    room_id = %self.room_id,
                    error = %e,
                    "Failed to end room after interruption"
                );
            }
        }

        metrics::choreography_finished(outcome.as_str());
        info!(
            target: "mm.choreography",
            room_id = %self.room_id,
            outcome = outcome.as_str(),
            "Choreography finished"
        );
    }

    async fn steps(&self) -> Result<(), MatchError> {
        let room = Group::Room(self.room_id.clone());

        self.send(
            &room,
            OutboundEvent::Start {
                room_id: self.room_id.clone(),
            },
        )
        .await;
        // The engine already claimed the transition; this is a no-op then.
        self.registry.start(&self.room_id).await?;
        self.send(&room, OutboundEvent::Freeze).await;

        for text in INTRO_MESSAGES {
            self.send(&room, self.system_message(text)).await;
            tokio::time::sleep(self.config.intro_delay).await;
        }

        for prompt in &self.prompts {
            self.send(&room, OutboundEvent::Freeze).await;
            self.send(&room, self.system_message(prompt)).await;
            tokio::time::sleep(self.config.prompt_settle).await;
            self.send(&room, OutboundEvent::Thaw).await;
            tokio::time::sleep(self.config.chat_duration).await;
        }

        let roster = self
            .registry
            .participants(&self.room_id)
            .await?
            .into_iter()
            .map(|p| RosterEntry {
                member_id: p.member_id,
                display_name: p.display_name,
            })
            .collect();
        self.send(&room, OutboundEvent::Participants { roster }).await;

        tokio::time::sleep(self.config.choice_window).await;

        let not_matched = self.ledger.not_matched(&self.room_id).await?;
        debug!(
            target: "mm.choreography",
            room_id = %self.room_id,
            unmatched = not_matched.len(),
            "Choice window closed"
        );
        for member_id in not_matched {
            self.send(
                &Group::Member(self.room_id.clone(), member_id),
                OutboundEvent::Failed,
            )
            .await;
        }

        self.registry.terminate(&self.room_id).await?;
        Ok(())
    }

    fn system_message(&self, text: &str) -> OutboundEvent {
        OutboundEvent::System(ChatMessage {
            text: text.to_string(),
            sender_id: SYSTEM_SENDER_ID,
            display_name: self.config.host_name.clone(),
            sent_at: Utc::now(),
        })
    }

    /// Best-effort group delivery.
    async fn send(&self, group: &Group, event: OutboundEvent) {
        let name = event.name();
        if let Err(e) = self.sink.to_group(group, event).await {
            metrics::record_error("choreography_broadcast", e.error_type_label());
            warn!(
                target: "mm.choreography",
                room_id = %self.room_id,
                event = name,
                error = %e,
                "Broadcast failed, continuing"
            );
        }
    }
}

/// Total scripted time of one room, for logs and sizing.
#[must_use]
pub fn scripted_duration(config: &ChoreographyConfig, prompt_count: usize) -> Duration {
    let intro = config
        .intro_delay
        .saturating_mul(u32::try_from(INTRO_MESSAGES.len()).unwrap_or(u32::MAX));
    let per_prompt = config.prompt_settle.saturating_add(config.chat_duration);
    let prompts = per_prompt.saturating_mul(u32::try_from(prompt_count).unwrap_or(u32::MAX));
    intro
        .saturating_add(prompts)
        .saturating_add(config.choice_window)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::broadcast::mock::RecordingSink;
    use crate::room::RoomState;
    use crate::store::{InMemoryStore, KeySpace, SharedStore};
    use common::types::{ConnectionId, MemberId};

    fn fast_config() -> ChoreographyConfig {
        ChoreographyConfig {
            intro_delay: Duration::from_millis(10),
            prompt_settle: Duration::from_millis(20),
            chat_duration: Duration::from_millis(100),
            choice_window: Duration::from_millis(50),
            prompt_count: 2,
            host_name: "Cupid".to_string(),
        }
    }

    struct Fixture {
        registry: RoomRegistry,
        ledger: MatchingLedger,
        sink: Arc<RecordingSink>,
        room_id: RoomId,
    }

    async fn full_room(members: &[u64]) -> Fixture {
        let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let registry = RoomRegistry::new(
            Arc::clone(&store),
            KeySpace::new("test"),
            Duration::from_secs(3600),
        );
        let ledger = MatchingLedger::new(store, registry.clone());
        let room_id = registry.create().await.unwrap();
        for m in members {
            registry
                .add_member(
                    &room_id,
                    MemberId(*m),
                    &ConnectionId::from(format!("c{m}").as_str()),
                    members.len(),
                )
                .await
                .unwrap();
        }
        registry.start(&room_id).await.unwrap();
        Fixture {
            registry,
            ledger,
            sink: Arc::new(RecordingSink::new()),
            room_id,
        }
    }

    fn choreography(f: &Fixture, cancel: CancellationToken) -> Choreography {
        Choreography::new(
            f.room_id.clone(),
            f.registry.clone(),
            f.ledger.clone(),
            Arc::clone(&f.sink) as Arc<dyn BroadcastSink>,
            fast_config(),
            vec!["Q1".to_string(), "Q2".to_string()],
            cancel,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_sequence_in_order() {
        let f = full_room(&[1, 2]).await;
        choreography(&f, CancellationToken::new()).run().await;

        let names = f.sink.group_event_names(&Group::Room(f.room_id.clone()));
        let mut expected = vec!["start", "freeze"];
        expected.extend(std::iter::repeat("system").take(INTRO_MESSAGES.len()));
        for _ in 0..2 {
            expected.extend(["freeze", "system", "thaw"]);
        }
        expected.push("participants");
        assert_eq!(names, expected);

        assert_eq!(
            f.registry.get_state(&f.room_id).await.unwrap(),
            RoomState::Ended
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_messages_carry_host_identity() {
        let f = full_room(&[1, 2]).await;
        choreography(&f, CancellationToken::new()).run().await;

        let events = f.sink.group_events(&Group::Room(f.room_id.clone()));
        let OutboundEvent::System(first) = events.get(2).unwrap() else {
            unreachable!("third room event is the first intro message");
        };
        assert_eq!(first.sender_id, MemberId(0));
        assert_eq!(first.display_name, "Cupid");
        assert_eq!(first.text, *INTRO_MESSAGES.first().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unmatched_members_get_failed() {
        let f = full_room(&[1, 2, 3]).await;
        f.ledger.choice(&f.room_id, MemberId(1), MemberId(2)).await.unwrap();
        f.ledger.choice(&f.room_id, MemberId(2), MemberId(1)).await.unwrap();

        choreography(&f, CancellationToken::new()).run().await;

        let failed = |m: u64| {
            f.sink
                .group_event_names(&Group::Member(f.room_id.clone(), MemberId(m)))
                .contains(&"failed")
        };
        assert!(!failed(1));
        assert!(!failed(2));
        assert!(failed(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_failures_do_not_abort() {
        let f = full_room(&[1, 2]).await;
        f.sink.set_failing(true);

        choreography(&f, CancellationToken::new()).run().await;

        assert_eq!(
            f.registry.get_state(&f.room_id).await.unwrap(),
            RoomState::Ended
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_ends_room() {
        let f = full_room(&[1, 2]).await;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(choreography(&f, cancel.clone()).run());

        tokio::time::sleep(Duration::from_millis(15)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(
            f.registry.get_state(&f.room_id).await.unwrap(),
            RoomState::Ended
        );
        let names = f.sink.group_event_names(&Group::Room(f.room_id.clone()));
        assert!(!names.contains(&"participants"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_room_aborts() {
        let f = full_room(&[1, 2]).await;
        let orphan = Choreography::new(
            RoomId::from("gone"),
            f.registry.clone(),
            f.ledger.clone(),
            Arc::clone(&f.sink) as Arc<dyn BroadcastSink>,
            fast_config(),
            vec![],
            CancellationToken::new(),
        );

        orphan.run().await;

        let names = f.sink.group_event_names(&Group::Room(RoomId::from("gone")));
        assert_eq!(names, vec!["start"]);
    }

    #[test]
    fn test_scripted_duration_defaults() {
        let config = ChoreographyConfig::default();
        // 7 intros x 2s + 3 x (5s + 180s) + 12s
        assert_eq!(
            scripted_duration(&config, 3),
            Duration::from_secs(14 + 555 + 12)
        );
    }
}
