//! Cross-instance broadcast relay.
//!
//! Queue jobs are consumed by whichever instance pops them, but a socket is
//! held by exactly one instance. The relay is the `BroadcastSink` the engine
//! talks to when running against Redis: every sink call is published on the
//! `{prefix}:broadcast` channel, and every instance applies the channel to its
//! own `ConnectionHub`. Hubs ignore connections they do not hold.
//!
//! Publishes from one relay share one connection, so a subscriber sees them
//! in the order they were made.

use crate::broadcast::{BroadcastSink, Group, OutboundEvent};
use crate::errors::MatchError;
use crate::gateway::hub::ConnectionHub;
use async_trait::async_trait;
use common::types::ConnectionId;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Wait before resubscribing after the subscription drops.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// One sink call, as carried on the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SinkCommand {
    JoinGroup {
        connection_id: ConnectionId,
        group: Group,
    },
    ToGroup {
        group: Group,
        event: OutboundEvent,
    },
    ToConnection {
        connection_id: ConnectionId,
        event: OutboundEvent,
    },
    Disconnect {
        connection_id: ConnectionId,
    },
}

/// Apply a command to the local hub.
pub async fn apply(hub: &ConnectionHub, command: SinkCommand) -> Result<(), MatchError> {
    match command {
        SinkCommand::JoinGroup {
            connection_id,
            group,
        } => hub.join_group(&connection_id, &group).await.map(|_| ()),
        SinkCommand::ToGroup { group, event } => hub.to_group(&group, event).await,
        SinkCommand::ToConnection {
            connection_id,
            event,
        } => hub.to_connection(&connection_id, event).await,
        SinkCommand::Disconnect { connection_id } => hub.disconnect(&connection_id).await,
    }
}

#[derive(Clone)]
pub struct RedisRelay {
    client: Client,
    publisher: MultiplexedConnection,
    channel: String,
}

impl RedisRelay {
    /// # Errors
    ///
    /// Returns `MatchError::Store` if the URL is invalid or the connection fails.
    pub async fn connect(redis_url: &str, channel: String) -> Result<Self, MatchError> {
        let client = Client::open(redis_url).map_err(|e| {
            error!(target: "mm.gateway", error = %e, "Failed to open Redis client for relay");
            MatchError::Store(format!("Failed to open Redis client: {e}"))
        })?;
        let publisher = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "mm.gateway", error = %e, "Failed to connect relay publisher");
                MatchError::Store(format!("Failed to connect relay publisher: {e}"))
            })?;

        Ok(Self {
            client,
            publisher,
            channel,
        })
    }

    async fn publish(&self, command: &SinkCommand) -> Result<(), MatchError> {
        let payload = serde_json::to_string(command)
            .map_err(|e| MatchError::Internal(format!("sink command serialization failed: {e}")))?;
        let mut conn = self.publisher.clone();
        let _: i64 = conn.publish(&self.channel, payload).await.map_err(|e| {
            warn!(target: "mm.gateway", error = %e, "Relay publish failed");
            MatchError::Broadcast(format!("relay publish failed: {e}"))
        })?;
        Ok(())
    }

    /// Apply the channel to `hub` until cancelled, resubscribing on failure.
    pub async fn run(self, hub: Arc<ConnectionHub>, cancel: CancellationToken) {
        info!(target: "mm.gateway", channel = %self.channel, "Broadcast relay started");
        loop {
            let result = tokio::select! {
                () = cancel.cancelled() => break,
                result = self.subscribe(&hub) => result,
            };
            if let Err(e) = result {
                warn!(target: "mm.gateway", error = %e, "Relay subscription lost, resubscribing");
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
            }
        }
        info!(target: "mm.gateway", "Broadcast relay stopped");
    }

    async fn subscribe(&self, hub: &ConnectionHub) -> Result<(), MatchError> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|e| {
            MatchError::Store(format!("Failed to open relay subscription: {e}"))
        })?;
        pubsub
            .subscribe(&self.channel)
            .await
            .map_err(|e| MatchError::Store(format!("Failed to subscribe: {e}")))?;

        let mut messages = pubsub.on_message();
        while let Some(message) = messages.next().await {
            let payload: String = match message.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(target: "mm.gateway", error = %e, "Unreadable relay payload");
                    continue;
                }
            };
            match serde_json::from_str::<SinkCommand>(&payload) {
                Ok(command) => {
                    if let Err(e) = apply(hub, command).await {
                        debug!(target: "mm.gateway", error = %e, "Relayed command not applied");
                    }
                }
                Err(e) => warn!(target: "mm.gateway", error = %e, "Malformed relay command"),
            }
        }
        Err(MatchError::Store("relay subscription closed".to_string()))
    }
}

#[async_trait]
impl BroadcastSink for RedisRelay {
    /// Always `true`: whether an instance holds the connection is only known
    /// where the command lands.
    async fn join_group(
        &self,
        connection_id: &ConnectionId,
        group: &Group,
    ) -> Result<bool, MatchError> {
        self.publish(&SinkCommand::JoinGroup {
            connection_id: connection_id.clone(),
            group: group.clone(),
        })
        .await?;
        Ok(true)
    }

    async fn to_group(&self, group: &Group, event: OutboundEvent) -> Result<(), MatchError> {
        self.publish(&SinkCommand::ToGroup {
            group: group.clone(),
            event,
        })
        .await
    }

    async fn to_connection(
        &self,
        connection_id: &ConnectionId,
        event: OutboundEvent,
    ) -> Result<(), MatchError> {
        self.publish(&SinkCommand::ToConnection {
            connection_id: connection_id.clone(),
            event,
        })
        .await
    }

    async fn disconnect(&self, connection_id: &ConnectionId) -> Result<(), MatchError> {
        self.publish(&SinkCommand::Disconnect {
            connection_id: connection_id.clone(),
        })
        .await
    }
}
