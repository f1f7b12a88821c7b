//! Event window.
//!
//! Global on/off switch for the matching event, with the room capacity in
//! force while it is open. Stored as one key whose TTL ends at `expiresAt`,
//! so the window closes on schedule on every instance without a timer task.

use crate::errors::MatchError;
use crate::store::{KeySpace, SharedStore, Transaction};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// Smallest room that can produce a pair.
pub const MIN_ROOM_CAPACITY: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventWindow {
    pub available: bool,
    pub max_room_capacity: usize,
    pub expires_at: DateTime<Utc>,
}

impl EventWindow {
    #[must_use]
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.available && self.expires_at > now
    }
}

#[derive(Clone)]
pub struct EventWindowStore {
    store: Arc<dyn SharedStore>,
    keys: KeySpace,
}

impl EventWindowStore {
    pub fn new(store: Arc<dyn SharedStore>, keys: KeySpace) -> Self {
        Self { store, keys }
    }

    /// Open the window until `expires_at`.
    ///
    /// # Errors
    ///
    /// - `MinimumPeriodNotMet` if `expires_at` is not in the future
    /// - `InvalidCapacity` if `max_room_capacity` is below 2
    #[instrument(skip_all, fields(expires_at = %expires_at, max_room_capacity = max_room_capacity))]
    pub async fn open(
        &self,
        expires_at: DateTime<Utc>,
        max_room_capacity: usize,
    ) -> Result<EventWindow, MatchError> {
        if max_room_capacity < MIN_ROOM_CAPACITY {
            return Err(MatchError::InvalidCapacity(max_room_capacity));
        }

        let ttl = (expires_at - Utc::now())
            .to_std()
            .ok()
            .filter(|ttl| !ttl.is_zero())
            .ok_or(MatchError::MinimumPeriodNotMet)?;

        let window = EventWindow {
            available: true,
            max_room_capacity,
            expires_at,
        };
        let value = serde_json::to_string(&window)
            .map_err(|e| MatchError::Internal(format!("window serialization failed: {e}")))?;

        self.store
            .commit(Transaction::new().set(self.keys.window(), value, ttl))
            .await?;

        info!(
            target: "mm.window",
            expires_at = %expires_at,
            max_room_capacity,
            "Event window opened"
        );
        Ok(window)
    }

    /// Close the window now.
    pub async fn close(&self) -> Result<(), MatchError> {
        self.store
            .commit(Transaction::new().delete(self.keys.window()))
            .await?;
        info!(target: "mm.window", "Event window closed");
        Ok(())
    }

    /// The window if it is currently open.
    pub async fn current(&self) -> Result<Option<EventWindow>, MatchError> {
        let Some(raw) = self.store.get(&self.keys.window()).await? else {
            return Ok(None);
        };
        let window: EventWindow = serde_json::from_str(&raw)
            .map_err(|e| MatchError::Internal(format!("corrupt event window: {e}")))?;
        Ok(Some(window).filter(|w| w.is_open_at(Utc::now())))
    }

    /// Room capacity if the window is open.
    ///
    /// # Errors
    ///
    /// `WindowNotOpen` when closed.
    pub async fn require_open(&self) -> Result<usize, MatchError> {
        self.current()
            .await?
            .map(|w| w.max_room_capacity)
            .ok_or(MatchError::WindowNotOpen)
    }
}
