//! JSON wire protocol for the realtime endpoint.
//!
//! Every frame is a JSON object with a snake_case `type` tag and camelCase
//! payload fields. Signaling payloads are carried as raw [`serde_json::Value`]
//! and are never inspected by the hub.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{StreamId, UserId};

/// Messages a client may send over the realtime connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Present an auth token; must precede any other action.
    #[serde(rename_all = "camelCase")]
    Authenticate { token: String },

    /// Enter a stream room (presence only; payment goes through the
    /// settlement endpoint).
    #[serde(rename_all = "camelCase")]
    JoinStream { stream_id: StreamId },

    /// Leave the current room, if any.
    LeaveStream,

    /// Post a chat message to the current room.
    #[serde(rename_all = "camelCase")]
    ChatMessage { content: String },

    /// Forward an opaque peer-connection handshake payload to one user.
    #[serde(rename_all = "camelCase")]
    WebrtcSignal {
        signal: serde_json::Value,
        target_user_id: UserId,
    },
}

/// Messages the hub pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Authenticated { user_id: UserId },

    #[serde(rename_all = "camelCase")]
    AuthError { message: String },

    #[serde(rename_all = "camelCase")]
    Error { message: String },

    #[serde(rename_all = "camelCase")]
    UserJoined {
        stream_id: StreamId,
        user_id: UserId,
    },

    #[serde(rename_all = "camelCase")]
    UserLeft {
        stream_id: StreamId,
        user_id: UserId,
    },

    #[serde(rename_all = "camelCase")]
    NewChatMessage { message: ChatBroadcast },

    #[serde(rename_all = "camelCase")]
    WebrtcSignal {
        signal: serde_json::Value,
        from_user_id: UserId,
    },
}

/// A persisted chat message as broadcast to a room, with the author's
/// username resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatBroadcast {
    pub id: uuid::Uuid,
    pub stream_id: StreamId,
    pub user_id: UserId,
    pub username: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}
