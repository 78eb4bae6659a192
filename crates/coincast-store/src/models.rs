//! Domain model structs held by the ledger store.
//!
//! Every struct derives `Serialize` so it can be handed directly to the
//! HTTP layer. Records are only ever mutated through the ledger's own
//! operations or the settlement engine, never by direct field writes from
//! the hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coincast_shared::types::{StreamId, TransactionKind, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// An authenticated identity. Credentials live in the external auth
/// service; the ledger only tracks the coin balance and profile basics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Coin balance. Kept non-negative by the settlement engine's
    /// precondition checks.
    pub coins: i64,
    pub is_creator: bool,
    /// Lifetime coins earned from viewers joining this user's streams.
    pub total_earned: i64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// A creator's stream. Viewer counters are managed exclusively by the
/// settlement engine: `current_viewers` moves with joins and leaves,
/// `total_viewers` only ever grows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub id: StreamId,
    pub title: String,
    /// Free-text tag used for listing filters.
    pub genre: String,
    pub creator_id: UserId,
    pub cost_in_coins: i64,
    pub is_live: bool,
    pub current_viewers: u32,
    pub total_viewers: u64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// An immutable ledger entry. A paid join always appends exactly two of
/// these: the viewer's debit and the creator's credit, equal in magnitude
/// and opposite in sign.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    /// The account this entry applies to.
    pub user_id: UserId,
    pub stream_id: Option<StreamId>,
    /// The other side of a transfer, when there is one (the creator on a
    /// viewer's `stream_join` debit).
    pub counterparty_id: Option<UserId>,
    /// Signed amount: negative debits, positive credits.
    pub amount: i64,
    pub kind: TransactionKind,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ChatMessage
// ---------------------------------------------------------------------------

/// A single chat message, append-only per stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub stream_id: StreamId,
    pub user_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// JoinSession
// ---------------------------------------------------------------------------

/// One identity's paid membership in one stream, from join to leave.
/// Created atomically with the transaction pair; `left_at` is set when the
/// viewer leaves the room or disconnects. Joins are non-refundable, so
/// closing a session never moves coins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinSession {
    pub id: Uuid,
    pub stream_id: StreamId,
    pub user_id: UserId,
    pub coins_spent: i64,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl JoinSession {
    pub fn is_open(&self) -> bool {
        self.left_at.is_none()
    }
}
