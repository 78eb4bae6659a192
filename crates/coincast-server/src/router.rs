//! Best-effort event fan-out over registry state.
//!
//! Delivery is at-most-once: a connection whose receiver has gone away is
//! skipped with a debug log and never affects the other recipients. There
//! is no retry and no queueing of undelivered events.

use std::sync::Arc;

use tracing::debug;

use coincast_shared::protocol::ServerMessage;
use coincast_shared::types::{ConnectionId, StreamId, UserId};

use crate::registry::ConnectionRegistry;

pub struct BroadcastRouter {
    registry: Arc<ConnectionRegistry>,
}

impl BroadcastRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver a message to every live connection in a room, optionally
    /// excluding one (the sender's own connection, to suppress self-echo).
    pub async fn broadcast_to_room(
        &self,
        room: StreamId,
        message: &ServerMessage,
        exclude: Option<ConnectionId>,
    ) {
        for (conn, sender) in self.registry.connections_in(room).await {
            if Some(conn) == exclude {
                continue;
            }

            if sender.send(message.clone()).is_err() {
                debug!(
                    room = %room.short(),
                    conn = %conn.short(),
                    "Dropping event for closed connection"
                );
            }
        }
    }

    /// Deliver a message to every live connection of one identity. A user
    /// with no live connection is a silent no-op; the caller is not told.
    pub async fn send_to_identity(&self, user_id: UserId, message: &ServerMessage) {
        let senders = self.registry.connections_for(user_id).await;
        if senders.is_empty() {
            debug!(user = %user_id.short(), "No live connection, event dropped");
            return;
        }

        for sender in senders {
            if sender.send(message.clone()).is_err() {
                debug!(user = %user_id.short(), "Dropping event for closed connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    use coincast_shared::protocol::ServerMessage;

    fn error_msg(text: &str) -> ServerMessage {
        ServerMessage::Error {
            message: text.into(),
        }
    }

    async fn registered(
        registry: &ConnectionRegistry,
        user: UserId,
    ) -> (
        ConnectionId,
        mpsc::UnboundedReceiver<ServerMessage>,
    ) {
        let conn = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(conn, user, tx).await.unwrap();
        (conn, rx)
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = BroadcastRouter::new(registry.clone());
        let room = StreamId::new();

        let (sender_conn, mut sender_rx) = registered(&registry, UserId::new()).await;
        let (other_conn, mut other_rx) = registered(&registry, UserId::new()).await;
        registry.join_room(sender_conn, room).await.unwrap();
        registry.join_room(other_conn, room).await.unwrap();

        router
            .broadcast_to_room(room, &error_msg("joined"), Some(sender_conn))
            .await;

        assert!(other_rx.try_recv().is_ok());
        assert!(sender_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_room_isolation() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = BroadcastRouter::new(registry.clone());
        let (room_a, room_b) = (StreamId::new(), StreamId::new());

        let (conn_a, mut rx_a) = registered(&registry, UserId::new()).await;
        let (conn_b, mut rx_b) = registered(&registry, UserId::new()).await;
        registry.join_room(conn_a, room_a).await.unwrap();
        registry.join_room(conn_b, room_b).await.unwrap();

        router.broadcast_to_room(room_a, &error_msg("for a"), None).await;

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_multi_device_receives_exactly_once_each() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = BroadcastRouter::new(registry.clone());
        let room = StreamId::new();
        let user = UserId::new();

        let (phone, mut phone_rx) = registered(&registry, user).await;
        let (laptop, mut laptop_rx) = registered(&registry, user).await;
        registry.join_room(phone, room).await.unwrap();
        registry.join_room(laptop, room).await.unwrap();

        router.broadcast_to_room(room, &error_msg("chat"), None).await;

        assert!(phone_rx.try_recv().is_ok());
        assert!(phone_rx.try_recv().is_err());
        assert!(laptop_rx.try_recv().is_ok());
        assert!(laptop_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_connection_does_not_affect_others() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = BroadcastRouter::new(registry.clone());
        let room = StreamId::new();

        let (dead, dead_rx) = registered(&registry, UserId::new()).await;
        let (live, mut live_rx) = registered(&registry, UserId::new()).await;
        registry.join_room(dead, room).await.unwrap();
        registry.join_room(live, room).await.unwrap();

        drop(dead_rx);
        router.broadcast_to_room(room, &error_msg("hi"), None).await;

        assert!(live_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_send_to_identity_reaches_all_devices_only() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = BroadcastRouter::new(registry.clone());
        let target = UserId::new();

        let (_, mut phone_rx) = registered(&registry, target).await;
        let (_, mut laptop_rx) = registered(&registry, target).await;
        let (_, mut bystander_rx) = registered(&registry, UserId::new()).await;

        router.send_to_identity(target, &error_msg("direct")).await;

        assert!(phone_rx.try_recv().is_ok());
        assert!(laptop_rx.try_recv().is_ok());
        assert!(bystander_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_to_offline_identity_is_silent() {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = BroadcastRouter::new(registry);

        // Nothing to assert beyond "does not panic": silent drop is the contract.
        router
            .send_to_identity(UserId::new(), &error_msg("nobody home"))
            .await;
    }
}
