//! Store wrappers that perturb an `InMemoryStore` for tests.

use crate::errors::MatchError;
use crate::store::{InMemoryStore, SharedStore, Transaction, Write};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Yields to the scheduler around every read and commit, so concurrent
/// read-modify-commit loops interleave on a multi-thread runtime.
#[derive(Debug, Default)]
pub struct YieldingStore {
    inner: InMemoryStore,
}

impl YieldingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedStore for YieldingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MatchError> {
        let value = self.inner.get(key).await;
        tokio::task::yield_now().await;
        value
    }

    async fn commit(&self, transaction: Transaction) -> Result<bool, MatchError> {
        tokio::task::yield_now().await;
        self.inner.commit(transaction).await
    }

    async fn push(&self, list: &str, value: String) -> Result<(), MatchError> {
        self.inner.push(list, value).await
    }

    async fn pop_blocking(&self, list: &str) -> Result<String, MatchError> {
        self.inner.pop_blocking(list).await
    }
}

/// Fails the first commit that writes a value containing `needle`.
#[derive(Debug)]
pub struct FlakyStore {
    inner: InMemoryStore,
    needle: String,
    tripped: AtomicBool,
}

impl FlakyStore {
    pub fn failing_once_on(needle: &str) -> Self {
        Self {
            inner: InMemoryStore::new(),
            needle: needle.to_string(),
            tripped: AtomicBool::new(false),
        }
    }

    pub fn tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SharedStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MatchError> {
        self.inner.get(key).await
    }

    async fn commit(&self, transaction: Transaction) -> Result<bool, MatchError> {
        let matches = transaction.writes.iter().any(|write| match write {
            Write::Set { value, .. } => value.contains(&self.needle),
            Write::Delete { .. } => false,
        });
        if matches && !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(MatchError::Store("transient".to_string()));
        }
        self.inner.commit(transaction).await
    }

    async fn push(&self, list: &str, value: String) -> Result<(), MatchError> {
        self.inner.push(list, value).await
    }

    async fn pop_blocking(&self, list: &str) -> Result<String, MatchError> {
        self.inner.pop_blocking(list).await
    }
}

/// Fails the next `failures` blocking pops, then delegates.
#[derive(Debug)]
pub struct PopFailingStore {
    inner: InMemoryStore,
    failures: AtomicUsize,
}

impl PopFailingStore {
    pub fn new(inner: InMemoryStore, failures: usize) -> Self {
        Self {
            inner,
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl SharedStore for PopFailingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, MatchError> {
        self.inner.get(key).await
    }

    async fn commit(&self, transaction: Transaction) -> Result<bool, MatchError> {
        self.inner.commit(transaction).await
    }

    async fn push(&self, list: &str, value: String) -> Result<(), MatchError> {
        self.inner.push(list, value).await
    }

    async fn pop_blocking(&self, list: &str) -> Result<String, MatchError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(MatchError::Store("connection reset".to_string()));
        }
        self.inner.pop_blocking(list).await
    }
}
