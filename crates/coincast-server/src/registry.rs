//! The connection registry.
//!
//! Maps each live transport connection to its authenticated identity and
//! current room, with secondary indices for "connections in room R" and
//! "connections for identity I". Identity to connections is one-to-many: a
//! user with several tabs or devices holds several entries.
//!
//! The registry only mutates its own state; broadcasting on membership
//! changes is the caller's responsibility, which keeps this type
//! synchronously testable.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use coincast_shared::protocol::ServerMessage;
use coincast_shared::types::{ConnectionId, StreamId, UserId};

/// Write half of a connection's outbound event channel. The socket task on
/// the other end serializes onto the wire; a dropped receiver marks the
/// connection dead.
pub type ConnectionSender = mpsc::UnboundedSender<ServerMessage>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Connection already registered: {0}")]
    AlreadyRegistered(ConnectionId),

    #[error("Connection not authenticated: {0}")]
    NotAuthenticated(ConnectionId),
}

struct ConnectionEntry {
    user_id: UserId,
    room: Option<StreamId>,
    sender: ConnectionSender,
}

/// What `unregister` removed, so the caller can notify the vacated room.
#[derive(Debug, Clone)]
pub struct RemovedConnection {
    pub user_id: UserId,
    pub room: Option<StreamId>,
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    by_room: HashMap<StreamId, HashSet<ConnectionId>>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

impl RegistryInner {
    fn index_room(&mut self, room: StreamId, conn: ConnectionId) {
        self.by_room.entry(room).or_default().insert(conn);
    }

    fn unindex_room(&mut self, room: StreamId, conn: ConnectionId) {
        if let Some(members) = self.by_room.get_mut(&room) {
            members.remove(&conn);
            if members.is_empty() {
                self.by_room.remove(&room);
            }
        }
    }

    fn unindex_user(&mut self, user: UserId, conn: ConnectionId) {
        if let Some(conns) = self.by_user.get_mut(&user) {
            conns.remove(&conn);
            if conns.is_empty() {
                self.by_user.remove(&user);
            }
        }
    }
}

/// Registry of live, authenticated connections. Constructed once at
/// startup; all state behind a single `RwLock`.
#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<RegistryInner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a connection to an authenticated identity. The connection
    /// starts with no room.
    pub async fn register(
        &self,
        conn: ConnectionId,
        user_id: UserId,
        sender: ConnectionSender,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;

        if inner.connections.contains_key(&conn) {
            return Err(RegistryError::AlreadyRegistered(conn));
        }

        inner.connections.insert(
            conn,
            ConnectionEntry {
                user_id,
                room: None,
                sender,
            },
        );
        inner.by_user.entry(user_id).or_default().insert(conn);

        info!(
            conn = %conn.short(),
            user = %user_id.short(),
            total = inner.connections.len(),
            "Connection registered"
        );
        Ok(())
    }

    /// Move a connection into a room. Returns the previously occupied room,
    /// if any, so the caller can send its leave notification.
    pub async fn join_room(
        &self,
        conn: ConnectionId,
        room: StreamId,
    ) -> Result<Option<StreamId>, RegistryError> {
        let mut inner = self.inner.write().await;

        let previous = {
            let entry = inner
                .connections
                .get_mut(&conn)
                .ok_or(RegistryError::NotAuthenticated(conn))?;
            entry.room.replace(room)
        };

        if let Some(prev) = previous {
            inner.unindex_room(prev, conn);
        }
        inner.index_room(room, conn);

        debug!(conn = %conn.short(), room = %room.short(), "Connection joined room");
        Ok(previous)
    }

    /// Clear a connection's room. Idempotent: unknown connections and
    /// roomless connections are no-ops. Returns the vacated room.
    pub async fn leave_room(&self, conn: ConnectionId) -> Option<StreamId> {
        let mut inner = self.inner.write().await;

        let vacated = inner.connections.get_mut(&conn)?.room.take()?;
        inner.unindex_room(vacated, conn);

        debug!(conn = %conn.short(), room = %vacated.short(), "Connection left room");
        Some(vacated)
    }

    /// Remove a connection entirely. A connection still in a room is
    /// implicitly removed from it first; the removed identity and vacated
    /// room are returned so the caller can notify.
    pub async fn unregister(&self, conn: ConnectionId) -> Option<RemovedConnection> {
        let mut inner = self.inner.write().await;

        let entry = inner.connections.remove(&conn)?;
        if let Some(room) = entry.room {
            inner.unindex_room(room, conn);
        }
        inner.unindex_user(entry.user_id, conn);

        info!(
            conn = %conn.short(),
            user = %entry.user_id.short(),
            total = inner.connections.len(),
            "Connection unregistered"
        );
        Some(RemovedConnection {
            user_id: entry.user_id,
            room: entry.room,
        })
    }

    /// Snapshot of the connections currently in a room. Each call re-reads
    /// live registry state.
    pub async fn connections_in(&self, room: StreamId) -> Vec<(ConnectionId, ConnectionSender)> {
        let inner = self.inner.read().await;
        inner
            .by_room
            .get(&room)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|conn| {
                        inner
                            .connections
                            .get(conn)
                            .map(|entry| (*conn, entry.sender.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of an identity's live senders, across all its devices.
    pub async fn connections_for(&self, user_id: UserId) -> Vec<ConnectionSender> {
        let inner = self.inner.read().await;
        inner
            .by_user
            .get(&user_id)
            .map(|conns| {
                conns
                    .iter()
                    .filter_map(|conn| inner.connections.get(conn).map(|e| e.sender.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn identity_of(&self, conn: ConnectionId) -> Option<UserId> {
        self.inner
            .read()
            .await
            .connections
            .get(&conn)
            .map(|e| e.user_id)
    }

    pub async fn room_of(&self, conn: ConnectionId) -> Option<StreamId> {
        self.inner
            .read()
            .await
            .connections
            .get(&conn)
            .and_then(|e| e.room)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }
}
