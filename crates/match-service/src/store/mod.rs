//! Shared state store.
//!
//! Every room, member, choice and match record lives in a keyed store shared
//! by all service instances. Components never hold authoritative state in
//! process memory; they read, decide, and commit guarded transactions.
//!
//! # Components
//!
//! - `SharedStore` - the operations the engine needs from the store
//! - `RedisStore` - production implementation (Lua compare-and-set commits)
//! - `InMemoryStore` - single-process implementation for tests and local runs
//! - `KeySpace` - key naming under a configurable prefix
//! - `update_with_retry` - read/modify/commit loop with a bounded retry

#[cfg(test)]
pub(crate) mod faults;
mod keys;
mod lua_scripts;
mod memory;
mod redis;

pub use keys::KeySpace;
pub use memory::InMemoryStore;
pub use self::redis::RedisStore;

use crate::errors::MatchError;
use crate::observability::metrics;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum commit attempts before a conflicting update is reported.
pub const MAX_CAS_ATTEMPTS: usize = 3;

/// Precondition on a key at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guard {
    pub key: String,
    /// Expected current value; `None` requires the key to be absent.
    pub expected: Option<String>,
}

/// A write applied when every guard of a transaction holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
}

impl Write {
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Write::Set { key, .. } | Write::Delete { key } => key,
        }
    }
}

/// Multi-key optimistic transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    pub guards: Vec<Guard>,
    pub writes: Vec<Write>,
}

impl Transaction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn guard(mut self, key: impl Into<String>, expected: Option<String>) -> Self {
        self.guards.push(Guard {
            key: key.into(),
            expected,
        });
        self
    }

    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Self {
        self.writes.push(Write::Set {
            key: key.into(),
            value: value.into(),
            ttl: Some(ttl),
        });
        self
    }

    #[must_use]
    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.writes.push(Write::Delete { key: key.into() });
        self
    }
}

/// Operations the matchmaking engine requires from the shared store.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Read a value. Expired keys read as absent.
    async fn get(&self, key: &str) -> Result<Option<String>, MatchError>;

    /// Apply all writes atomically if every guard holds.
    ///
    /// Returns `false` without writing anything when a guard fails.
    async fn commit(&self, transaction: Transaction) -> Result<bool, MatchError>;

    /// Push a value onto the head of a list.
    async fn push(&self, list: &str, value: String) -> Result<(), MatchError>;

    /// Pop from the tail of a list, waiting as long as it takes for a value.
    async fn pop_blocking(&self, list: &str) -> Result<String, MatchError>;
}

/// Outcome of one `update_with_retry` attempt.
#[derive(Debug)]
pub struct Update<T> {
    result: T,
    writes: Vec<Write>,
    guards: Vec<Guard>,
}

impl<T> Update<T> {
    /// Nothing to write; return `result` without committing.
    pub fn unchanged(result: T) -> Self {
        Self {
            result,
            writes: Vec::new(),
            guards: Vec::new(),
        }
    }

    /// Commit `writes` guarded on the value that was read.
    pub fn write(result: T, writes: Vec<Write>) -> Self {
        Self {
            result,
            writes,
            guards: Vec::new(),
        }
    }

    /// Add a guard on another key to the same commit.
    #[must_use]
    pub fn also_guard(mut self, key: impl Into<String>, expected: Option<String>) -> Self {
        self.guards.push(Guard {
            key: key.into(),
            expected,
        });
        self
    }
}

/// Compare-and-set on `key` with a bounded retry.
///
/// Reads the current value, hands it to `apply`, and commits the returned
/// writes guarded on the value read. A conflicting commit re-reads and
/// re-applies, up to [`MAX_CAS_ATTEMPTS`] times, then fails with
/// `MatchError::Conflict`. Errors from `apply` abort immediately.
pub async fn update_with_retry<T, F>(
    store: &dyn SharedStore,
    key: &str,
    mut apply: F,
) -> Result<T, MatchError>
where
    T: Send,
    F: FnMut(Option<&str>) -> Result<Update<T>, MatchError> + Send,
{
    for attempt in 1..=MAX_CAS_ATTEMPTS {
        let current = store.get(key).await?;
        let update = apply(current.as_deref())?;
        if update.writes.is_empty() {
            return Ok(update.result);
        }

        let mut transaction = Transaction::new().guard(key, current);
        transaction.guards.extend(update.guards);
        transaction.writes = update.writes;

        if store.commit(transaction).await? {
            return Ok(update.result);
        }

        metrics::record_store_conflict();
        debug!(target: "mm.store", key = %key, attempt, "Commit conflicted, retrying");
    }

    warn!(
        target: "mm.store",
        key = %key,
        attempts = MAX_CAS_ATTEMPTS,
        "Giving up after repeated commit conflicts"
    );
    Err(MatchError::Conflict(key.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_update_with_retry_writes_new_value() {
        let store = InMemoryStore::new();

        let result = update_with_retry(&store, "counter", |current| {
            let next = current.map_or(0, |v| v.parse::<u32>().unwrap()) + 1;
            Ok(Update::write(
                next,
                vec![Write::Set {
                    key: "counter".to_string(),
                    value: next.to_string(),
                    ttl: Some(TTL),
                }],
            ))
        })
        .await
        .unwrap();

        assert_eq!(result, 1);
        assert_eq!(store.get("counter").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_update_with_retry_unchanged_skips_commit() {
        let store = InMemoryStore::new();

        let result = update_with_retry(&store, "missing", |current| {
            assert!(current.is_none());
            Ok(Update::unchanged("nothing"))
        })
        .await
        .unwrap();

        assert_eq!(result, "nothing");
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_with_retry_retries_after_conflict() {
        let store = Arc::new(InMemoryStore::new());
        let attempts = AtomicUsize::new(0);
        let interfering = Arc::clone(&store);

        let result = update_with_retry(&*store, "k", |current| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                // Simulate another writer landing between read and commit.
                interfering.put_raw("k", "other");
            }
            Ok(Update::write(
                current.map(str::to_string),
                vec![Write::Set {
                    key: "k".to_string(),
                    value: "mine".to_string(),
                    ttl: None,
                }],
            ))
        })
        .await
        .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(result.as_deref(), Some("other"));
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("mine"));
    }

    #[tokio::test]
    async fn test_update_with_retry_gives_up_after_bound() {
        let store = Arc::new(InMemoryStore::new());
        let attempts = AtomicUsize::new(0);
        let interfering = Arc::clone(&store);

        let result: Result<(), MatchError> = update_with_retry(&*store, "k", |_| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            interfering.put_raw("k", &format!("other-{n}"));
            Ok(Update::write(
                (),
                vec![Write::Delete {
                    key: "k".to_string(),
                }],
            ))
        })
        .await;

        assert!(matches!(result, Err(MatchError::Conflict(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_CAS_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_update_with_retry_apply_error_aborts() {
        let store = InMemoryStore::new();

        let result: Result<(), MatchError> = update_with_retry(&store, "k", |_| {
            Err(MatchError::RoomNotFound("k".to_string()))
        })
        .await;

        assert!(matches!(result, Err(MatchError::RoomNotFound(_))));
    }

    #[tokio::test]
    async fn test_extra_guard_blocks_commit() {
        let store = InMemoryStore::new();
        store.put_raw("pointer", "room-b");

        let result: Result<(), MatchError> = update_with_retry(&store, "k", |_| {
            Ok(Update::write(
                (),
                vec![Write::Set {
                    key: "k".to_string(),
                    value: "v".to_string(),
                    ttl: None,
                }],
            )
            .also_guard("pointer", Some("room-a".to_string())))
        })
        .await;

        assert!(matches!(result, Err(MatchError::Conflict(_))));
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[test]
    fn test_transaction_builder() {
        let txn = Transaction::new()
            .guard("a", None)
            .set("b", "1", TTL)
            .delete("c");

        assert_eq!(txn.guards.len(), 1);
        assert_eq!(txn.writes.len(), 2);
        assert_eq!(txn.writes.first().map(Write::key), Some("b"));
        assert_eq!(txn.writes.last().map(Write::key), Some("c"));
    }
}
