use thiserror::Error;

use coincast_shared::types::{StreamId, UserId};

/// Errors produced by the store layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Stream not found: {0}")]
    StreamNotFound(StreamId),

    /// The viewer cannot cover the stream's join cost.
    #[error("Insufficient coins: have {available}, need {required}")]
    InsufficientFunds { available: i64, required: i64 },

    /// A creator tried to pay for their own stream and policy forbids it.
    #[error("Creators cannot join their own stream")]
    SelfJoinRejected,

    /// Coin amount outside the accepted range (non-positive purchase,
    /// negative stream cost).
    #[error("Invalid coin amount: {0}")]
    InvalidAmount(i64),

    #[error("Username already taken: {0}")]
    UsernameTaken(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
