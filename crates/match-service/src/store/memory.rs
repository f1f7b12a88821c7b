//! In-memory shared store.
//!
//! Implements the same semantics as `RedisStore` inside one process: guarded
//! commits are atomic under a mutex, TTLs are measured on tokio's clock (so
//! paused-time tests can expire keys with `tokio::time::advance`), and blocking
//! pops wait on a per-list `Notify`. Expired values and drained lists are
//! swept on commit, at most once per [`SWEEP_INTERVAL`].
//!
//! State is not shared across processes. Use it for tests and local runs only.

use crate::errors::MatchError;
use crate::store::{SharedStore, Transaction, Write};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use std::time::Duration;
use tokio::time::Instant;

/// Minimum time between sweeps of expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    values: HashMap<String, Entry>,
    lists: HashMap<String, VecDeque<String>>,
    notifiers: HashMap<String, Arc<Notify>>,
    last_sweep: Option<Instant>,
}

impl Inner {
    fn live_value(&self, key: &str, now: Instant) -> Option<&str> {
        self.values
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.as_str())
    }

    fn notifier(&mut self, list: &str) -> Arc<Notify> {
        Arc::clone(self.notifiers.entry(list.to_string()).or_default())
    }

    fn sweep_if_due(&mut self, now: Instant) {
        match self.last_sweep {
            Some(at) if now.saturating_duration_since(at) < SWEEP_INTERVAL => return,
            Some(_) => {}
            None => {
                self.last_sweep = Some(now);
                return;
            }
        }
        self.last_sweep = Some(now);

        self.values.retain(|_, entry| entry.is_live(now));
        self.lists.retain(|_, list| !list.is_empty());
        // A notifier still referenced elsewhere has a popper parked on it
        let lists = &self.lists;
        self.notifiers
            .retain(|name, notify| lists.contains_key(name) || Arc::strong_count(notify) > 1);
    }
}

/// Shared store held in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, MatchError> {
        self.inner
            .lock()
            .map_err(|_| MatchError::Store("in-memory store lock poisoned".to_string()))
    }

    /// Overwrite a key without a TTL, bypassing guards.
    ///
    /// Lets tests stage state or simulate a concurrent writer.
    pub fn put_raw(&self, key: &str, value: &str) {
        if let Ok(mut inner) = self.lock() {
            inner.values.insert(
                key.to_string(),
                Entry {
                    value: value.to_string(),
                    expires_at: None,
                },
            );
        }
    }

    /// Number of values held, including expired ones not yet swept.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.lock().map(|inner| inner.values.len()).unwrap_or(0)
    }

    /// Number of values queued on a list.
    #[must_use]
    pub fn list_len(&self, list: &str) -> usize {
        self.lock()
            .map(|inner| inner.lists.get(list).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MatchError> {
        let inner = self.lock()?;
        Ok(inner.live_value(key, Instant::now()).map(str::to_string))
    }

    async fn commit(&self, transaction: Transaction) -> Result<bool, MatchError> {
        let mut inner = self.lock()?;
        let now = Instant::now();
        inner.sweep_if_due(now);

        let guards_hold = transaction
            .guards
            .iter()
            .all(|guard| inner.live_value(&guard.key, now) == guard.expected.as_deref());
        if !guards_hold {
            return Ok(false);
        }

        for write in transaction.writes {
            match write {
                Write::Set { key, value, ttl } => {
                    let expires_at = ttl.map(|ttl| now + ttl);
                    inner.values.insert(key, Entry { value, expires_at });
                }
                Write::Delete { key } => {
                    inner.values.remove(&key);
                }
            }
        }
        Ok(true)
    }

    async fn push(&self, list: &str, value: String) -> Result<(), MatchError> {
        let notify = {
            let mut inner = self.lock()?;
            inner
                .lists
                .entry(list.to_string())
                .or_default()
                .push_front(value);
            inner.notifier(list)
        };
        notify.notify_one();
        Ok(())
    }

    async fn pop_blocking(&self, list: &str) -> Result<String, MatchError> {
        loop {
            let notify = {
                let mut inner = self.lock()?;
                if let Some(value) = inner.lists.get_mut(list).and_then(VecDeque::pop_back) {
                    return Ok(value);
                }
                inner.notifier(list)
            };
            // notify_one stores a permit when nobody is waiting, so a push
            // between releasing the lock and awaiting here is not lost.
            notify.notified().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_absent_then_present() {
        let store = InMemoryStore::new();

        let first = Transaction::new()
            .guard("k", None)
            .set("k", "v1", Duration::from_secs(60));
        assert!(store.commit(first).await.unwrap());

        let second = Transaction::new()
            .guard("k", None)
            .set("k", "v2", Duration::from_secs(60));
        assert!(!store.commit(second).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v1"));

        let third = Transaction::new()
            .guard("k", Some("v1".to_string()))
            .set("k", "v3", Duration::from_secs(60));
        assert!(store.commit(third).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v3"));
    }

    #[tokio::test]
    async fn test_failed_guard_writes_nothing() {
        let store = InMemoryStore::new();
        store.put_raw("a", "1");

        let txn = Transaction::new()
            .guard("a", Some("2".to_string()))
            .set("b", "x", Duration::from_secs(60))
            .delete("a");
        assert!(!store.commit(txn).await.unwrap());

        assert!(store.get("b").await.unwrap().is_none());
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let store = InMemoryStore::new();
        let txn = Transaction::new().set("k", "v", Duration::from_secs(10));
        assert!(store.commit(txn).await.unwrap());

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("k").await.unwrap().is_none());

        // An expired key satisfies an absent guard
        let txn = Transaction::new()
            .guard("k", None)
            .set("k", "again", Duration::from_secs(10));
        assert!(store.commit(txn).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_sweeps_expired_values() {
        let store = InMemoryStore::new();
        for n in 0..5 {
            let txn = Transaction::new().set(format!("short-{n}"), "v", Duration::from_secs(10));
            assert!(store.commit(txn).await.unwrap());
        }
        let txn = Transaction::new().set("long", "v", Duration::from_secs(3600));
        assert!(store.commit(txn).await.unwrap());
        store.put_raw("pinned", "v");
        assert_eq!(store.value_count(), 7);

        // Expired but inside the sweep interval: hidden, still held
        tokio::time::advance(Duration::from_secs(11)).await;
        let txn = Transaction::new().set("k", "v", Duration::from_secs(10));
        assert!(store.commit(txn).await.unwrap());
        assert!(store.get("short-0").await.unwrap().is_none());
        assert_eq!(store.value_count(), 8);

        tokio::time::advance(SWEEP_INTERVAL).await;
        assert!(store.commit(Transaction::new().delete("absent")).await.unwrap());
        assert_eq!(store.value_count(), 2);
        assert!(store.get("long").await.unwrap().is_some());
        assert!(store.get("pinned").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_parked_popper() {
        let store = InMemoryStore::new();
        assert!(store.commit(Transaction::new().delete("warmup")).await.unwrap());

        let popper = store.clone();
        let handle = tokio::spawn(async move { popper.pop_blocking("lane").await });
        tokio::time::sleep(SWEEP_INTERVAL + Duration::from_secs(1)).await;
        assert!(store.commit(Transaction::new().delete("sweep")).await.unwrap());

        store.push("lane", "job".to_string()).await.unwrap();
        let value = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("pop should complete")
            .unwrap()
            .unwrap();
        assert_eq!(value, "job");
    }

    #[tokio::test]
    async fn test_list_is_fifo() {
        let store = InMemoryStore::new();
        store.push("lane", "1".to_string()).await.unwrap();
        store.push("lane", "2".to_string()).await.unwrap();
        store.push("lane", "3".to_string()).await.unwrap();
        assert_eq!(store.list_len("lane"), 3);

        assert_eq!(store.pop_blocking("lane").await.unwrap(), "1");
        assert_eq!(store.pop_blocking("lane").await.unwrap(), "2");
        assert_eq!(store.pop_blocking("lane").await.unwrap(), "3");
        assert_eq!(store.list_len("lane"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pop_blocking_waits_for_push() {
        let store = InMemoryStore::new();
        let popper = store.clone();
        let handle = tokio::spawn(async move { popper.pop_blocking("lane").await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        store.push("lane", "job".to_string()).await.unwrap();
        let value = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("pop should complete")
            .unwrap()
            .unwrap();
        assert_eq!(value, "job");
    }

    #[tokio::test]
    async fn test_lists_are_independent() {
        let store = InMemoryStore::new();
        store.push("a", "from-a".to_string()).await.unwrap();
        store.push("b", "from-b".to_string()).await.unwrap();

        assert_eq!(store.pop_blocking("b").await.unwrap(), "from-b");
        assert_eq!(store.pop_blocking("a").await.unwrap(), "from-a");
    }
}
