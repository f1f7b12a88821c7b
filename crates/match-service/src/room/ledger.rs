//! Matching ledger.
//!
//! Each participant nominates one counterpart per room. A choice record is
//! write-once (guarded on absence). A pair matches when both records point at
//! each other; the match set only grows, and only the call that adds the pair
//! reports `true`, so side effects of a match happen exactly once even when
//! both halves of the pair are processed concurrently.

use crate::errors::MatchError;
use crate::room::registry::RoomRegistry;
use crate::store::{update_with_retry, SharedStore, Transaction, Update, Write};
use common::types::{MemberId, RoomId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct MatchingLedger {
    store: Arc<dyn SharedStore>,
    registry: RoomRegistry,
}

fn parse_match_set(raw: Option<&str>) -> Result<BTreeSet<MemberId>, MatchError> {
    raw.map_or_else(
        || Ok(BTreeSet::new()),
        |raw| {
            serde_json::from_str(raw)
                .map_err(|e| MatchError::Internal(format!("corrupt match set: {e}")))
        },
    )
}

impl MatchingLedger {
    pub fn new(store: Arc<dyn SharedStore>, registry: RoomRegistry) -> Self {
        Self { store, registry }
    }

    /// Record `choicer_id`'s choice of `target_id`.
    ///
    /// Returns `true` only for the call that establishes a mutual match.
    /// A second choice by the same choicer is ignored and returns `false`.
    #[instrument(skip_all, fields(room_id = %room_id, choicer_id = %choicer_id, target_id = %target_id))]
    pub async fn choice(
        &self,
        room_id: &RoomId,
        choicer_id: MemberId,
        target_id: MemberId,
    ) -> Result<bool, MatchError> {
        let keys = self.registry.keys();
        let ttl = self.registry.ttl();
        let choice_key = keys.choice(room_id, choicer_id);

        let recorded = self
            .store
            .commit(
                Transaction::new()
                    .guard(&choice_key, None)
                    .set(&choice_key, target_id.to_string(), ttl),
            )
            .await?;
        if !recorded {
            debug!(target: "mm.ledger", room_id = %room_id, choicer_id = %choicer_id, "Choice already cast");
            return Ok(false);
        }

        let target_choice = self.choice_of(room_id, target_id).await?;
        if target_choice != Some(choicer_id) {
            debug!(target: "mm.ledger", room_id = %room_id, choicer_id = %choicer_id, target_id = %target_id, "Choice recorded, not reciprocated yet");
            return Ok(false);
        }

        let matches_key = keys.matches(room_id);
        let matched = update_with_retry(self.store.as_ref(), &matches_key, |current| {
            let mut set = parse_match_set(current)?;
            if set.contains(&choicer_id) || set.contains(&target_id) {
                return Ok(Update::unchanged(false));
            }
            set.insert(choicer_id);
            set.insert(target_id);
            let value = serde_json::to_string(&set)
                .map_err(|e| MatchError::Internal(format!("match set serialization failed: {e}")))?;
            Ok(Update::write(
                true,
                vec![Write::Set {
                    key: matches_key.clone(),
                    value,
                    ttl: Some(ttl),
                }],
            ))
        })
        .await?;

        if matched {
            info!(target: "mm.ledger", room_id = %room_id, choicer_id = %choicer_id, target_id = %target_id, "Mutual match");
        }
        Ok(matched)
    }

    /// The member `choicer_id` chose in this room, if any.
    pub async fn choice_of(
        &self,
        room_id: &RoomId,
        choicer_id: MemberId,
    ) -> Result<Option<MemberId>, MatchError> {
        let raw = self
            .store
            .get(&self.registry.keys().choice(room_id, choicer_id))
            .await?;
        raw.map(|value| {
            value
                .parse()
                .map_err(|e| MatchError::Internal(format!("corrupt choice record: {e}")))
        })
        .transpose()
    }

    /// Members with a confirmed mutual match in this room.
    pub async fn matched(&self, room_id: &RoomId) -> Result<BTreeSet<MemberId>, MatchError> {
        let raw = self
            .store
            .get(&self.registry.keys().matches(room_id))
            .await?;
        parse_match_set(raw.as_deref())
    }

    /// Current participants without a match, in roster order.
    pub async fn not_matched(&self, room_id: &RoomId) -> Result<Vec<MemberId>, MatchError> {
        let matched = self.matched(room_id).await?;
        let participants = self.registry.participants(room_id).await?;
        Ok(participants
            .into_iter()
            .map(|p| p.member_id)
            .filter(|id| !matched.contains(id))
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::faults::YieldingStore;
    use crate::store::{InMemoryStore, KeySpace};
    use common::types::ConnectionId;
    use std::time::Duration;

    async fn room_with(members: &[u64]) -> (MatchingLedger, RoomId) {
        let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let registry = RoomRegistry::new(
            Arc::clone(&store),
            KeySpace::new("test"),
            Duration::from_secs(3600),
        );
        let room_id = registry.create().await.unwrap();
        for member in members {
            registry
                .add_member(
                    &room_id,
                    MemberId(*member),
                    &ConnectionId::from(format!("c{member}").as_str()),
                    members.len(),
                )
                .await
                .unwrap();
        }
        (MatchingLedger::new(store, registry), room_id)
    }

    #[tokio::test]
    async fn test_one_sided_choice() {
        let (ledger, room) = room_with(&[10, 20]).await;

        assert!(!ledger.choice(&room, MemberId(10), MemberId(20)).await.unwrap());

        let not_matched = ledger.not_matched(&room).await.unwrap();
        assert_eq!(not_matched, vec![MemberId(10), MemberId(20)]);
    }

    #[tokio::test]
    async fn test_reciprocal_choice_matches_once() {
        let (ledger, room) = room_with(&[10, 20]).await;

        let first = ledger.choice(&room, MemberId(10), MemberId(20)).await.unwrap();
        let second = ledger.choice(&room, MemberId(20), MemberId(10)).await.unwrap();

        assert!(!first);
        assert!(second);
        let matched = ledger.matched(&room).await.unwrap();
        assert!(matched.contains(&MemberId(10)));
        assert!(matched.contains(&MemberId(20)));
        assert!(ledger.not_matched(&room).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reciprocal_choices_match_once() {
        for _ in 0..20 {
            let store: Arc<dyn SharedStore> = Arc::new(YieldingStore::new());
            let registry = RoomRegistry::new(
                Arc::clone(&store),
                KeySpace::new("test"),
                Duration::from_secs(3600),
            );
            let room = registry.create().await.unwrap();
            for member in [1u64, 2] {
                registry
                    .add_member(
                        &room,
                        MemberId(member),
                        &ConnectionId::from(format!("c{member}").as_str()),
                        2,
                    )
                    .await
                    .unwrap();
            }
            let ledger = MatchingLedger::new(store, registry);

            let forward = {
                let ledger = ledger.clone();
                let room = room.clone();
                tokio::spawn(async move { ledger.choice(&room, MemberId(1), MemberId(2)).await })
            };
            let backward = {
                let ledger = ledger.clone();
                let room = room.clone();
                tokio::spawn(async move { ledger.choice(&room, MemberId(2), MemberId(1)).await })
            };
            let results = [
                forward.await.unwrap().unwrap(),
                backward.await.unwrap().unwrap(),
            ];

            assert_eq!(results.iter().filter(|matched| **matched).count(), 1);
            assert_eq!(ledger.matched(&room).await.unwrap().len(), 2);
        }
    }

    #[tokio::test]
    async fn test_match_symmetry_in_either_order() {
        let (ledger, room) = room_with(&[1, 2]).await;

        let results = [
            ledger.choice(&room, MemberId(2), MemberId(1)).await.unwrap(),
            ledger.choice(&room, MemberId(1), MemberId(2)).await.unwrap(),
        ];
        assert_eq!(results.iter().filter(|m| **m).count(), 1);
    }

    #[tokio::test]
    async fn test_choice_is_write_once() {
        let (ledger, room) = room_with(&[1, 2, 3]).await;

        assert!(!ledger.choice(&room, MemberId(1), MemberId(2)).await.unwrap());
        assert!(!ledger.choice(&room, MemberId(1), MemberId(3)).await.unwrap());
        assert_eq!(
            ledger.choice_of(&room, MemberId(1)).await.unwrap(),
            Some(MemberId(2))
        );

        // 3 choosing 1 does not match, 1 is committed to 2
        assert!(!ledger.choice(&room, MemberId(3), MemberId(1)).await.unwrap());
    }

    #[tokio::test]
    async fn test_repeated_reciprocal_detection_does_not_rematch() {
        let (ledger, room) = room_with(&[1, 2]).await;

        assert!(!ledger.choice(&room, MemberId(1), MemberId(2)).await.unwrap());
        assert!(ledger.choice(&room, MemberId(2), MemberId(1)).await.unwrap());
        assert!(!ledger.choice(&room, MemberId(2), MemberId(1)).await.unwrap());
        assert!(!ledger.choice(&room, MemberId(1), MemberId(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_not_matched_partitions_participants() {
        let (ledger, room) = room_with(&[1, 2, 3, 4, 5]).await;

        ledger.choice(&room, MemberId(1), MemberId(2)).await.unwrap();
        ledger.choice(&room, MemberId(2), MemberId(1)).await.unwrap();
        ledger.choice(&room, MemberId(3), MemberId(4)).await.unwrap();
        ledger.choice(&room, MemberId(4), MemberId(5)).await.unwrap();

        let matched = ledger.matched(&room).await.unwrap();
        let not_matched: BTreeSet<MemberId> =
            ledger.not_matched(&room).await.unwrap().into_iter().collect();

        assert!(matched.is_disjoint(&not_matched));
        let union: BTreeSet<MemberId> = matched.union(&not_matched).copied().collect();
        let expected: BTreeSet<MemberId> = (1..=5).map(MemberId).collect();
        assert_eq!(union, expected);
    }

    #[tokio::test]
    async fn test_choices_are_scoped_to_room() {
        let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
        let registry = RoomRegistry::new(
            Arc::clone(&store),
            KeySpace::new("test"),
            Duration::from_secs(3600),
        );
        let ledger = MatchingLedger::new(store, registry);
        let a = RoomId::from("a");
        let b = RoomId::from("b");

        assert!(!ledger.choice(&a, MemberId(1), MemberId(2)).await.unwrap());
        assert!(!ledger.choice(&b, MemberId(2), MemberId(1)).await.unwrap());
    }
}
