//! Connection hub.
//!
//! In-process index of the gateway connections this instance holds and the
//! broadcast groups they belong to. The index is derived state: the store's
//! connection bindings are authoritative, and groups are rebuilt as ENTER
//! jobs are applied on reconnect.

use crate::broadcast::{BroadcastSink, Group, OutboundEvent};
use crate::errors::MatchError;
use crate::observability::metrics;
use async_trait::async_trait;
use common::types::ConnectionId;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Outbound buffer per connection.
pub const CONNECTION_BUFFER: usize = 64;

/// What the hub hands to a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubMessage {
    Event(OutboundEvent),
    Close,
}

#[derive(Debug, Default)]
struct Index {
    connections: HashMap<ConnectionId, mpsc::Sender<HubMessage>>,
    groups: HashMap<Group, HashSet<ConnectionId>>,
}

#[derive(Debug, Default)]
pub struct ConnectionHub {
    index: Mutex<Index>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Index) -> T) -> Result<T, MatchError> {
        self.index
            .lock()
            .map(|mut index| f(&mut index))
            .map_err(|_| MatchError::Internal("connection hub lock poisoned".to_string()))
    }

    /// Register a connection; the receiver feeds its writer task.
    pub fn register(
        &self,
        connection_id: ConnectionId,
    ) -> Result<mpsc::Receiver<HubMessage>, MatchError> {
        let (tx, rx) = mpsc::channel(CONNECTION_BUFFER);
        let count = self.with(|index| {
            index.connections.insert(connection_id, tx);
            index.connections.len()
        })?;
        metrics::set_connections_active(count);
        Ok(rx)
    }

    /// Forget a connection and drop it from every group.
    pub fn unregister(&self, connection_id: &ConnectionId) -> Result<(), MatchError> {
        let count = self.with(|index| {
            index.connections.remove(connection_id);
            index.groups.retain(|_, members| {
                members.remove(connection_id);
                !members.is_empty()
            });
            index.connections.len()
        })?;
        metrics::set_connections_active(count);
        Ok(())
    }

    pub fn holds(&self, connection_id: &ConnectionId) -> bool {
        self.with(|index| index.connections.contains_key(connection_id))
            .unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.with(|index| index.connections.len()).unwrap_or(0)
    }

    pub fn group_size(&self, group: &Group) -> usize {
        self.with(|index| index.groups.get(group).map_or(0, HashSet::len))
            .unwrap_or(0)
    }

    fn senders_for(
        &self,
        group: &Group,
    ) -> Result<Vec<(ConnectionId, mpsc::Sender<HubMessage>)>, MatchError> {
        self.with(|index| {
            index
                .groups
                .get(group)
                .into_iter()
                .flatten()
                .filter_map(|id| {
                    index
                        .connections
                        .get(id)
                        .map(|tx| (id.clone(), tx.clone()))
                })
                .collect()
        })
    }

    fn sender_for(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Option<mpsc::Sender<HubMessage>>, MatchError> {
        self.with(|index| index.connections.get(connection_id).cloned())
    }
}

fn offer(
    connection_id: &ConnectionId,
    tx: &mpsc::Sender<HubMessage>,
    message: HubMessage,
) -> Result<(), MatchError> {
    tx.try_send(message).map_err(|e| {
        MatchError::Broadcast(format!("connection {connection_id} not accepting events: {e}"))
    })
}

#[async_trait]
impl BroadcastSink for ConnectionHub {
    async fn join_group(
        &self,
        connection_id: &ConnectionId,
        group: &Group,
    ) -> Result<bool, MatchError> {
        self.with(|index| {
            if !index.connections.contains_key(connection_id) {
                return false;
            }
            index
                .groups
                .entry(group.clone())
                .or_default()
                .insert(connection_id.clone());
            true
        })
    }

    async fn to_group(&self, group: &Group, event: OutboundEvent) -> Result<(), MatchError> {
        for (connection_id, tx) in self.senders_for(group)? {
            // One slow socket must not block the rest of the group
            if let Err(e) = offer(&connection_id, &tx, HubMessage::Event(event.clone())) {
                warn!(target: "mm.gateway", connection_id = %connection_id, error = %e, "Dropped group event");
            }
        }
        Ok(())
    }

    async fn to_connection(
        &self,
        connection_id: &ConnectionId,
        event: OutboundEvent,
    ) -> Result<(), MatchError> {
        match self.sender_for(connection_id)? {
            Some(tx) => offer(connection_id, &tx, HubMessage::Event(event)),
            None => {
                debug!(target: "mm.gateway", connection_id = %connection_id, "Connection not held here");
                Ok(())
            }
        }
    }

    async fn disconnect(&self, connection_id: &ConnectionId) -> Result<(), MatchError> {
        if let Some(tx) = self.sender_for(connection_id)? {
            // Close must get through even when the buffer is full
            if tx.send(HubMessage::Close).await.is_err() {
                debug!(target: "mm.gateway", connection_id = %connection_id, "Connection already closed");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::{MemberId, RoomId};

    fn room() -> Group {
        Group::Room(RoomId::from("r1"))
    }

    #[tokio::test]
    async fn test_group_delivery_reaches_members_only() {
        let hub = ConnectionHub::new();
        let a = ConnectionId::from("a");
        let b = ConnectionId::from("b");
        let mut rx_a = hub.register(a.clone()).unwrap();
        let mut rx_b = hub.register(b.clone()).unwrap();

        assert!(hub.join_group(&a, &room()).await.unwrap());
        hub.to_group(&room(), OutboundEvent::Freeze).await.unwrap();

        assert_eq!(rx_a.recv().await, Some(HubMessage::Event(OutboundEvent::Freeze)));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_join_group_for_unknown_connection() {
        let hub = ConnectionHub::new();
        let joined = hub
            .join_group(&ConnectionId::from("ghost"), &room())
            .await
            .unwrap();
        assert!(!joined);
        assert_eq!(hub.group_size(&room()), 0);
    }

    #[tokio::test]
    async fn test_member_group_spans_tabs() {
        let hub = ConnectionHub::new();
        let group = Group::Member(RoomId::from("r1"), MemberId(7));
        let tab1 = ConnectionId::from("t1");
        let tab2 = ConnectionId::from("t2");
        let mut rx1 = hub.register(tab1.clone()).unwrap();
        let mut rx2 = hub.register(tab2.clone()).unwrap();
        hub.join_group(&tab1, &group).await.unwrap();
        hub.join_group(&tab2, &group).await.unwrap();

        hub.to_group(&group, OutboundEvent::Failed).await.unwrap();

        assert_eq!(rx1.recv().await, Some(HubMessage::Event(OutboundEvent::Failed)));
        assert_eq!(rx2.recv().await, Some(HubMessage::Event(OutboundEvent::Failed)));
    }

    #[tokio::test]
    async fn test_unregister_cleans_groups() {
        let hub = ConnectionHub::new();
        let a = ConnectionId::from("a");
        let _rx = hub.register(a.clone()).unwrap();
        hub.join_group(&a, &room()).await.unwrap();
        assert_eq!(hub.group_size(&room()), 1);

        hub.unregister(&a).unwrap();
        assert_eq!(hub.group_size(&room()), 0);
        assert!(!hub.holds(&a));
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_to_unknown_connection_is_ignored() {
        let hub = ConnectionHub::new();
        hub.to_connection(&ConnectionId::from("elsewhere"), OutboundEvent::Ended)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_full_buffer_surfaces_error() {
        let hub = ConnectionHub::new();
        let a = ConnectionId::from("a");
        let _rx = hub.register(a.clone()).unwrap();

        for _ in 0..CONNECTION_BUFFER {
            hub.to_connection(&a, OutboundEvent::Thaw).await.unwrap();
        }
        let result = hub.to_connection(&a, OutboundEvent::Thaw).await;
        assert!(matches!(result, Err(MatchError::Broadcast(_))));
    }

    #[tokio::test]
    async fn test_disconnect_sends_close() {
        let hub = ConnectionHub::new();
        let a = ConnectionId::from("a");
        let mut rx = hub.register(a.clone()).unwrap();

        hub.disconnect(&a).await.unwrap();
        assert_eq!(rx.recv().await, Some(HubMessage::Close));
    }
}
