//! The in-memory ledger store.
//!
//! All business records live in keyed maps inside [`LedgerInner`], behind a
//! single `tokio::sync::RwLock`. Readers share the read lock; writers are
//! fully serialized. The settlement engine reaches into the same guard to
//! perform its multi-record mutations as one critical section.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info};
use uuid::Uuid;

use coincast_shared::types::{StreamId, UserId};

use crate::error::{Result, StoreError};
use crate::models::{ChatMessage, JoinSession, Stream, Transaction, User};

/// Parameters for creating a stream.
#[derive(Debug, Clone)]
pub struct NewStream {
    pub title: String,
    pub genre: String,
    pub creator_id: UserId,
    pub cost_in_coins: i64,
}

/// Optional listing filters, matching the original catalogue query.
#[derive(Debug, Clone, Default)]
pub struct StreamFilter {
    pub genre: Option<String>,
    pub is_live: Option<bool>,
}

#[derive(Default)]
pub(crate) struct LedgerInner {
    pub(crate) users: HashMap<UserId, User>,
    pub(crate) streams: HashMap<StreamId, Stream>,
    /// Append-only; insertion order is creation order.
    pub(crate) transactions: Vec<Transaction>,
    /// Per-stream append-only message logs; vector order is the order all
    /// room members must observe.
    pub(crate) chat_messages: HashMap<StreamId, Vec<ChatMessage>>,
    pub(crate) sessions: Vec<JoinSession>,
}

/// The ledger store. Constructed once at startup and shared as `Arc<Ledger>`;
/// tests build fresh instances.
#[derive(Default)]
pub struct Ledger {
    inner: RwLock<LedgerInner>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, LedgerInner> {
        self.inner.write().await
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Create a user profile. Fails with `UsernameTaken` on a duplicate
    /// username.
    pub async fn create_user(
        &self,
        username: &str,
        is_creator: bool,
        starting_coins: i64,
    ) -> Result<User> {
        let mut inner = self.inner.write().await;

        if inner.users.values().any(|u| u.username == username) {
            return Err(StoreError::UsernameTaken(username.to_string()));
        }

        let user = User {
            id: UserId::new(),
            username: username.to_string(),
            coins: starting_coins,
            is_creator,
            total_earned: 0,
            created_at: Utc::now(),
        };
        inner.users.insert(user.id, user.clone());

        info!(user = %user.id.short(), username, "Created user");
        Ok(user)
    }

    pub async fn get_user(&self, id: UserId) -> Result<User> {
        self.inner
            .read()
            .await
            .users
            .get(&id)
            .cloned()
            .ok_or(StoreError::UserNotFound(id))
    }

    pub async fn get_user_by_username(&self, username: &str) -> Option<User> {
        self.inner
            .read()
            .await
            .users
            .values()
            .find(|u| u.username == username)
            .cloned()
    }

    pub async fn balance_of(&self, id: UserId) -> Result<i64> {
        Ok(self.get_user(id).await?.coins)
    }

    // ------------------------------------------------------------------
    // Streams
    // ------------------------------------------------------------------

    /// Create a stream. The creator must exist and the join cost must be
    /// non-negative.
    pub async fn create_stream(&self, new: NewStream) -> Result<Stream> {
        if new.cost_in_coins < 0 {
            return Err(StoreError::InvalidAmount(new.cost_in_coins));
        }

        let mut inner = self.inner.write().await;
        if !inner.users.contains_key(&new.creator_id) {
            return Err(StoreError::UserNotFound(new.creator_id));
        }

        let stream = Stream {
            id: StreamId::new(),
            title: new.title,
            genre: new.genre,
            creator_id: new.creator_id,
            cost_in_coins: new.cost_in_coins,
            is_live: false,
            current_viewers: 0,
            total_viewers: 0,
            created_at: Utc::now(),
        };
        inner.streams.insert(stream.id, stream.clone());

        info!(
            stream = %stream.id.short(),
            creator = %stream.creator_id.short(),
            cost = stream.cost_in_coins,
            "Created stream"
        );
        Ok(stream)
    }

    pub async fn get_stream(&self, id: StreamId) -> Result<Stream> {
        self.inner
            .read()
            .await
            .streams
            .get(&id)
            .cloned()
            .ok_or(StoreError::StreamNotFound(id))
    }

    /// List streams matching the filter, newest first.
    pub async fn list_streams(&self, filter: StreamFilter) -> Vec<Stream> {
        let inner = self.inner.read().await;
        let mut streams: Vec<Stream> = inner
            .streams
            .values()
            .filter(|s| {
                filter
                    .genre
                    .as_deref()
                    .map_or(true, |genre| s.genre == genre)
            })
            .filter(|s| filter.is_live.map_or(true, |live| s.is_live == live))
            .cloned()
            .collect();
        streams.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        streams
    }

    /// Flip the live flag, returning the updated stream.
    pub async fn set_stream_live(&self, id: StreamId, live: bool) -> Result<Stream> {
        let mut inner = self.inner.write().await;
        let stream = inner
            .streams
            .get_mut(&id)
            .ok_or(StoreError::StreamNotFound(id))?;
        stream.is_live = live;

        info!(stream = %id.short(), live, "Stream live flag changed");
        Ok(stream.clone())
    }

    // ------------------------------------------------------------------
    // Chat
    // ------------------------------------------------------------------

    /// Persist a chat message. Returns the stored record together with the
    /// author's username, resolved for the room broadcast.
    pub async fn append_chat_message(
        &self,
        stream_id: StreamId,
        user_id: UserId,
        content: &str,
    ) -> Result<(ChatMessage, String)> {
        let mut inner = self.inner.write().await;

        if !inner.streams.contains_key(&stream_id) {
            return Err(StoreError::StreamNotFound(stream_id));
        }
        let username = inner
            .users
            .get(&user_id)
            .map(|u| u.username.clone())
            .ok_or(StoreError::UserNotFound(user_id))?;

        let message = ChatMessage {
            id: Uuid::new_v4(),
            stream_id,
            user_id,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        inner
            .chat_messages
            .entry(stream_id)
            .or_default()
            .push(message.clone());

        debug!(
            stream = %stream_id.short(),
            user = %user_id.short(),
            "Chat message persisted"
        );
        Ok((message, username))
    }

    /// The most recent `limit` messages of a stream, in persisted order.
    pub async fn recent_chat_messages(
        &self,
        stream_id: StreamId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        let inner = self.inner.read().await;
        if !inner.streams.contains_key(&stream_id) {
            return Err(StoreError::StreamNotFound(stream_id));
        }

        let messages = inner
            .chat_messages
            .get(&stream_id)
            .map(|log| {
                let start = log.len().saturating_sub(limit);
                log[start..].to_vec()
            })
            .unwrap_or_default();
        Ok(messages)
    }

    // ------------------------------------------------------------------
    // Transactions & sessions
    // ------------------------------------------------------------------

    /// A user's transaction history, newest first.
    pub async fn transactions_for_user(&self, user_id: UserId) -> Result<Vec<Transaction>> {
        let inner = self.inner.read().await;
        if !inner.users.contains_key(&user_id) {
            return Err(StoreError::UserNotFound(user_id));
        }

        Ok(inner
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .rev()
            .cloned()
            .collect())
    }

    /// The open join session for a (stream, user) pair, if any.
    pub async fn open_session(&self, stream_id: StreamId, user_id: UserId) -> Option<JoinSession> {
        self.inner
            .read()
            .await
            .sessions
            .iter()
            .find(|s| s.stream_id == stream_id && s.user_id == user_id && s.is_open())
            .cloned()
    }

    /// Total transaction record count (test observability).
    pub async fn transaction_count(&self) -> usize {
        self.inner.read().await.transactions.len()
    }

    /// Total join session record count, open or closed (test observability).
    pub async fn session_count(&self) -> usize {
        self.inner.read().await.sessions.len()
    }
}
