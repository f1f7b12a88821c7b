//! Redis-backed shared store.
//!
//! # Connection Pattern
//!
//! Reads, commits and pushes clone one `MultiplexedConnection` per call; the
//! connection is cheap to clone and safe to use concurrently. Blocking pops
//! are different: `BRPOP` with no timeout parks the connection it runs on, so
//! each lane gets its own dedicated connection, opened lazily and reused.

use crate::errors::MatchError;
use crate::store::lua_scripts;
use crate::store::{Guard, SharedStore, Transaction, Write};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, instrument, warn};

/// Shared store over Redis.
///
/// Cheaply cloneable; clones share the multiplexed connection and the lane
/// connections.
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
    connection: MultiplexedConnection,
    /// Dedicated connections for blocking pops, keyed by list.
    lane_connections: Arc<Mutex<HashMap<String, MultiplexedConnection>>>,
    guarded_commit_script: Script,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `MatchError::Store` if the URL is invalid or the connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, MatchError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Do not log redis_url, it may contain credentials
            error!(target: "mm.store.redis", error = %e, "Failed to open Redis client");
            MatchError::Store(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "mm.store.redis", error = %e, "Failed to connect to Redis");
                MatchError::Store(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            client,
            connection,
            lane_connections: Arc::new(Mutex::new(HashMap::new())),
            guarded_commit_script: Script::new(lua_scripts::GUARDED_COMMIT),
        })
    }

    async fn lane_connection(&self, list: &str) -> Result<MultiplexedConnection, MatchError> {
        let mut connections = self.lane_connections.lock().await;
        if let Some(conn) = connections.get(list) {
            return Ok(conn.clone());
        }

        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                warn!(target: "mm.store.redis", error = %e, list = %list, "Failed to open lane connection");
                MatchError::Store(format!("Failed to open lane connection: {e}"))
            })?;
        connections.insert(list.to_string(), conn.clone());
        Ok(conn)
    }

    async fn drop_lane_connection(&self, list: &str) {
        self.lane_connections.lock().await.remove(list);
    }
}

/// Encode a guard's expectation for `GUARDED_COMMIT`.
fn encode_guard(guard: &Guard) -> String {
    match &guard.expected {
        Some(value) => format!("={value}"),
        None => "!".to_string(),
    }
}

/// Encode a write as the `(op, value, ttl_ms)` triple `GUARDED_COMMIT` expects.
fn encode_write(write: &Write) -> (&'static str, &str, u64) {
    match write {
        Write::Set { value, ttl, .. } => {
            // A TTL that rounds down to zero would mean "no expiry"
            let ttl_ms = ttl.map_or(0, |t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX).max(1));
            ("SET", value.as_str(), ttl_ms)
        }
        Write::Delete { .. } => ("DEL", "", 0),
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    #[instrument(skip_all, fields(key = %key))]
    async fn get(&self, key: &str) -> Result<Option<String>, MatchError> {
        let mut conn = self.connection.clone();
        conn.get(key).await.map_err(|e| {
            warn!(target: "mm.store.redis", error = %e, key = %key, "Failed to read key");
            MatchError::Store(format!("Failed to read key: {e}"))
        })
    }

    #[instrument(skip_all, fields(guards = transaction.guards.len(), writes = transaction.writes.len()))]
    async fn commit(&self, transaction: Transaction) -> Result<bool, MatchError> {
        let mut conn = self.connection.clone();
        let mut invocation = self.guarded_commit_script.prepare_invoke();

        for guard in &transaction.guards {
            invocation.key(&guard.key);
        }
        for write in &transaction.writes {
            invocation.key(write.key());
        }

        invocation.arg(transaction.guards.len());
        for guard in &transaction.guards {
            invocation.arg(encode_guard(guard));
        }
        for write in &transaction.writes {
            let (op, value, ttl_ms) = encode_write(write);
            invocation.arg(op).arg(value).arg(ttl_ms);
        }

        let result: i64 = invocation.invoke_async(&mut conn).await.map_err(|e| {
            warn!(target: "mm.store.redis", error = %e, "Guarded commit failed");
            MatchError::Store(format!("Guarded commit failed: {e}"))
        })?;

        match result {
            1 => Ok(true),
            0 => Ok(false),
            _ => {
                error!(target: "mm.store.redis", result, "Guarded commit rejected its arguments");
                Err(MatchError::Internal(
                    "guarded commit received malformed arguments".to_string(),
                ))
            }
        }
    }

    #[instrument(skip_all, fields(list = %list))]
    async fn push(&self, list: &str, value: String) -> Result<(), MatchError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.lpush(list, value).await.map_err(|e| {
            warn!(target: "mm.store.redis", error = %e, list = %list, "Failed to push job");
            MatchError::Store(format!("Failed to push job: {e}"))
        })?;
        Ok(())
    }

    async fn pop_blocking(&self, list: &str) -> Result<String, MatchError> {
        loop {
            let mut conn = self.lane_connection(list).await?;
            let popped: Option<(String, String)> = match redis::cmd("BRPOP")
                .arg(list)
                .arg(0)
                .query_async(&mut conn)
                .await
            {
                Ok(popped) => popped,
                Err(e) => {
                    // Reopen on the next call in case the connection broke
                    self.drop_lane_connection(list).await;
                    warn!(target: "mm.store.redis", error = %e, list = %list, "Blocking pop failed");
                    return Err(MatchError::Store(format!("Blocking pop failed: {e}")));
                }
            };

            if let Some((_, value)) = popped {
                return Ok(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_encode_guard() {
        let absent = Guard {
            key: "k".to_string(),
            expected: None,
        };
        let present = Guard {
            key: "k".to_string(),
            expected: Some("{\"state\":\"WAITING\"}".to_string()),
        };

        assert_eq!(encode_guard(&absent), "!");
        assert_eq!(encode_guard(&present), "={\"state\":\"WAITING\"}");
    }

    #[test]
    fn test_encode_guard_distinguishes_empty_value_from_absent() {
        let empty = Guard {
            key: "k".to_string(),
            expected: Some(String::new()),
        };
        assert_eq!(encode_guard(&empty), "=");
    }

    #[test]
    fn test_encode_write() {
        let set = Write::Set {
            key: "k".to_string(),
            value: "v".to_string(),
            ttl: Some(Duration::from_secs(2)),
        };
        assert_eq!(encode_write(&set), ("SET", "v", 2000));

        let persistent = Write::Set {
            key: "k".to_string(),
            value: "v".to_string(),
            ttl: None,
        };
        assert_eq!(encode_write(&persistent), ("SET", "v", 0));

        let delete = Write::Delete {
            key: "k".to_string(),
        };
        assert_eq!(encode_write(&delete), ("DEL", "", 0));
    }

    #[test]
    fn test_encode_write_sub_millisecond_ttl_still_expires() {
        let set = Write::Set {
            key: "k".to_string(),
            value: "v".to_string(),
            ttl: Some(Duration::from_micros(10)),
        };
        assert_eq!(encode_write(&set).2, 1);
    }
}
