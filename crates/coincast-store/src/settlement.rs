//! The coin settlement engine.
//!
//! A paid join touches two balances, two transaction records, a join
//! session and the stream's viewer counters. The store has no multi-record
//! transactions, so the whole operation runs inside one continuously held
//! write guard on the ledger: concurrent tasks observe either none of it or
//! all of it. Precondition checks are pure reads performed before the first
//! write, so every failure path leaves the ledger untouched.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use coincast_shared::types::{StreamId, TransactionKind, UserId};

use crate::error::{Result, StoreError};
use crate::ledger::Ledger;
use crate::models::{JoinSession, Transaction};

/// Result of a successful paid join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinReceipt {
    /// The viewer's balance after the debit.
    pub coins_remaining: i64,
}

/// Orchestrates every coin movement in the system. Constructed once at
/// startup with the ledger handle and the self-join policy.
pub struct SettlementEngine {
    ledger: Arc<Ledger>,
    allow_self_join: bool,
}

impl SettlementEngine {
    pub fn new(ledger: Arc<Ledger>, allow_self_join: bool) -> Self {
        Self {
            ledger,
            allow_self_join,
        }
    }

    /// Settle a paid stream join: debit the viewer, credit the creator,
    /// record the transaction pair and the open session, bump the viewer
    /// counters, and return the viewer's remaining balance.
    pub async fn settle_join(&self, viewer_id: UserId, stream_id: StreamId) -> Result<JoinReceipt> {
        let mut inner = self.ledger.write().await;

        // Precondition phase: pure reads. Any failure here aborts with the
        // ledger unchanged.
        let stream = inner
            .streams
            .get(&stream_id)
            .cloned()
            .ok_or(StoreError::StreamNotFound(stream_id))?;
        let viewer = inner
            .users
            .get(&viewer_id)
            .ok_or(StoreError::UserNotFound(viewer_id))?;
        if !inner.users.contains_key(&stream.creator_id) {
            return Err(StoreError::UserNotFound(stream.creator_id));
        }
        if viewer_id == stream.creator_id && !self.allow_self_join {
            return Err(StoreError::SelfJoinRejected);
        }
        if viewer.coins < stream.cost_in_coins {
            return Err(StoreError::InsufficientFunds {
                available: viewer.coins,
                required: stream.cost_in_coins,
            });
        }

        let cost = stream.cost_in_coins;
        let now = Utc::now();

        // Write phase: the guard stays held until every record is in place.
        let viewer = inner
            .users
            .get_mut(&viewer_id)
            .ok_or(StoreError::UserNotFound(viewer_id))?;
        viewer.coins -= cost;
        let coins_remaining = viewer.coins;

        let creator = inner
            .users
            .get_mut(&stream.creator_id)
            .ok_or(StoreError::UserNotFound(stream.creator_id))?;
        creator.coins += cost;
        creator.total_earned += cost;

        inner.transactions.push(Transaction {
            id: Uuid::new_v4(),
            user_id: viewer_id,
            stream_id: Some(stream_id),
            counterparty_id: Some(stream.creator_id),
            amount: -cost,
            kind: TransactionKind::StreamJoin,
            description: format!("Joined stream: {}", stream.title),
            created_at: now,
        });
        inner.transactions.push(Transaction {
            id: Uuid::new_v4(),
            user_id: stream.creator_id,
            stream_id: Some(stream_id),
            counterparty_id: None,
            amount: cost,
            kind: TransactionKind::CreatorEarning,
            description: format!("Earning from stream: {}", stream.title),
            created_at: now,
        });

        inner.sessions.push(JoinSession {
            id: Uuid::new_v4(),
            stream_id,
            user_id: viewer_id,
            coins_spent: cost,
            joined_at: now,
            left_at: None,
        });

        let stream_rec = inner
            .streams
            .get_mut(&stream_id)
            .ok_or(StoreError::StreamNotFound(stream_id))?;
        stream_rec.current_viewers += 1;
        stream_rec.total_viewers += 1;

        info!(
            viewer = %viewer_id.short(),
            stream = %stream_id.short(),
            cost,
            coins_remaining,
            "Settled stream join"
        );

        Ok(JoinReceipt { coins_remaining })
    }

    /// Close the viewer's open session for a stream and decrement the
    /// current-viewer counter. Idempotent: without an open session this is
    /// a no-op. Never moves coins — joins are non-refundable.
    pub async fn settle_leave(&self, viewer_id: UserId, stream_id: StreamId) -> Result<()> {
        let mut inner = self.ledger.write().await;

        if !inner.streams.contains_key(&stream_id) {
            return Err(StoreError::StreamNotFound(stream_id));
        }

        let Some(session) = inner
            .sessions
            .iter_mut()
            .find(|s| s.stream_id == stream_id && s.user_id == viewer_id && s.is_open())
        else {
            debug!(
                viewer = %viewer_id.short(),
                stream = %stream_id.short(),
                "Leave without open session ignored"
            );
            return Ok(());
        };
        session.left_at = Some(Utc::now());

        if let Some(stream) = inner.streams.get_mut(&stream_id) {
            stream.current_viewers = stream.current_viewers.saturating_sub(1);
        }

        info!(
            viewer = %viewer_id.short(),
            stream = %stream_id.short(),
            "Settled stream leave"
        );
        Ok(())
    }

    /// Credit purchased coins to a user and record the `coin_purchase`
    /// transaction. Returns the new balance.
    pub async fn purchase_coins(&self, user_id: UserId, amount: i64) -> Result<i64> {
        if amount <= 0 {
            return Err(StoreError::InvalidAmount(amount));
        }

        let mut inner = self.ledger.write().await;
        let user = inner
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;
        user.coins += amount;
        let balance = user.coins;

        inner.transactions.push(Transaction {
            id: Uuid::new_v4(),
            user_id,
            stream_id: None,
            counterparty_id: None,
            amount,
            kind: TransactionKind::CoinPurchase,
            description: format!("Purchased {amount} coins"),
            created_at: Utc::now(),
        });

        info!(user = %user_id.short(), amount, balance, "Settled coin purchase");
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::NewStream;
    use crate::models::{Stream, User};

    async fn setup(
        viewer_coins: i64,
        cost: i64,
        allow_self_join: bool,
    ) -> (Arc<Ledger>, SettlementEngine, User, User, Stream) {
        let ledger = Arc::new(Ledger::new());
        let creator = ledger.create_user("creator", true, 0).await.unwrap();
        let viewer = ledger
            .create_user("viewer", false, viewer_coins)
            .await
            .unwrap();
        let stream = ledger
            .create_stream(NewStream {
                title: "night show".into(),
                genre: "music".into(),
                creator_id: creator.id,
                cost_in_coins: cost,
            })
            .await
            .unwrap();
        let engine = SettlementEngine::new(ledger.clone(), allow_self_join);
        (ledger, engine, viewer, creator, stream)
    }

    #[tokio::test]
    async fn test_settle_join_success() {
        let (ledger, engine, viewer, creator, stream) = setup(100, 25, false).await;

        let receipt = engine.settle_join(viewer.id, stream.id).await.unwrap();
        assert_eq!(receipt.coins_remaining, 75);

        assert_eq!(ledger.balance_of(viewer.id).await.unwrap(), 75);
        assert_eq!(ledger.balance_of(creator.id).await.unwrap(), 25);
        assert_eq!(ledger.get_user(creator.id).await.unwrap().total_earned, 25);

        let stream = ledger.get_stream(stream.id).await.unwrap();
        assert_eq!(stream.current_viewers, 1);
        assert_eq!(stream.total_viewers, 1);

        let viewer_txns = ledger.transactions_for_user(viewer.id).await.unwrap();
        let creator_txns = ledger.transactions_for_user(creator.id).await.unwrap();
        assert_eq!(viewer_txns.len(), 1);
        assert_eq!(creator_txns.len(), 1);
        assert_eq!(viewer_txns[0].amount, -25);
        assert_eq!(viewer_txns[0].kind, TransactionKind::StreamJoin);
        assert_eq!(creator_txns[0].amount, 25);
        assert_eq!(creator_txns[0].kind, TransactionKind::CreatorEarning);
        // Conservation: the pair sums to zero.
        assert_eq!(viewer_txns[0].amount + creator_txns[0].amount, 0);

        let session = ledger.open_session(stream.id, viewer.id).await.unwrap();
        assert_eq!(session.coins_spent, 25);
    }

    #[tokio::test]
    async fn test_settle_join_insufficient_funds_is_atomic() {
        let (ledger, engine, viewer, creator, stream) = setup(10, 25, false).await;

        let err = engine.settle_join(viewer.id, stream.id).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::InsufficientFunds {
                available: 10,
                required: 25
            }
        );

        assert_eq!(ledger.balance_of(viewer.id).await.unwrap(), 10);
        assert_eq!(ledger.balance_of(creator.id).await.unwrap(), 0);
        assert_eq!(ledger.transaction_count().await, 0);
        assert_eq!(ledger.session_count().await, 0);
        let stream = ledger.get_stream(stream.id).await.unwrap();
        assert_eq!(stream.current_viewers, 0);
        assert_eq!(stream.total_viewers, 0);
    }

    #[tokio::test]
    async fn test_settle_join_missing_stream_is_atomic() {
        let (ledger, engine, viewer, _, _) = setup(100, 25, false).await;

        let err = engine
            .settle_join(viewer.id, StreamId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StreamNotFound(_)));

        assert_eq!(ledger.balance_of(viewer.id).await.unwrap(), 100);
        assert_eq!(ledger.transaction_count().await, 0);
        assert_eq!(ledger.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_settle_join_missing_user_is_atomic() {
        let (ledger, engine, _, creator, stream) = setup(100, 25, false).await;

        let err = engine
            .settle_join(UserId::new(), stream.id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UserNotFound(_)));

        assert_eq!(ledger.balance_of(creator.id).await.unwrap(), 0);
        assert_eq!(ledger.transaction_count().await, 0);
        let stream = ledger.get_stream(stream.id).await.unwrap();
        assert_eq!(stream.total_viewers, 0);
    }

    #[tokio::test]
    async fn test_self_join_rejected_by_default() {
        let (ledger, engine, _, creator, stream) = setup(100, 25, false).await;

        let err = engine.settle_join(creator.id, stream.id).await.unwrap_err();
        assert_eq!(err, StoreError::SelfJoinRejected);
        assert_eq!(ledger.transaction_count().await, 0);
        assert_eq!(ledger.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_self_join_allowed_is_net_zero() {
        let (ledger, engine, _, creator, stream) = setup(100, 25, true).await;
        // Give the creator enough to cover their own fee.
        engine.purchase_coins(creator.id, 25).await.unwrap();

        let receipt = engine.settle_join(creator.id, stream.id).await.unwrap();
        // The receipt reflects the post-debit balance, before the credit
        // lands back on the same account.
        assert_eq!(receipt.coins_remaining, 0);

        // Debit and credit cancel out; the bookkeeping still happens.
        assert_eq!(ledger.balance_of(creator.id).await.unwrap(), 25);
        assert_eq!(ledger.get_user(creator.id).await.unwrap().total_earned, 25);
        assert_eq!(ledger.transaction_count().await, 3); // purchase + join pair
        assert!(ledger.open_session(stream.id, creator.id).await.is_some());
        let stream = ledger.get_stream(stream.id).await.unwrap();
        assert_eq!(stream.current_viewers, 1);
        assert_eq!(stream.total_viewers, 1);
    }

    #[tokio::test]
    async fn test_settle_leave_closes_session_once() {
        let (ledger, engine, viewer, _, stream) = setup(100, 25, false).await;
        engine.settle_join(viewer.id, stream.id).await.unwrap();

        engine.settle_leave(viewer.id, stream.id).await.unwrap();
        assert!(ledger.open_session(stream.id, viewer.id).await.is_none());
        let s = ledger.get_stream(stream.id).await.unwrap();
        assert_eq!(s.current_viewers, 0);
        assert_eq!(s.total_viewers, 1);

        // Second leave has no open session: idempotent no-op.
        engine.settle_leave(viewer.id, stream.id).await.unwrap();
        let s = ledger.get_stream(stream.id).await.unwrap();
        assert_eq!(s.current_viewers, 0);
        assert_eq!(s.total_viewers, 1);

        // No refund happened.
        assert_eq!(ledger.balance_of(viewer.id).await.unwrap(), 75);
    }

    #[tokio::test]
    async fn test_settle_leave_unknown_stream() {
        let (_, engine, viewer, _, _) = setup(100, 25, false).await;
        let err = engine
            .settle_leave(viewer.id, StreamId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StreamNotFound(_)));
    }

    #[tokio::test]
    async fn test_total_viewers_is_monotonic() {
        let (ledger, engine, viewer, _, stream) = setup(100, 10, false).await;

        engine.settle_join(viewer.id, stream.id).await.unwrap();
        engine.settle_leave(viewer.id, stream.id).await.unwrap();
        engine.settle_join(viewer.id, stream.id).await.unwrap();

        let s = ledger.get_stream(stream.id).await.unwrap();
        assert_eq!(s.current_viewers, 1);
        assert_eq!(s.total_viewers, 2);
    }

    #[tokio::test]
    async fn test_purchase_coins() {
        let (ledger, engine, viewer, _, _) = setup(100, 25, false).await;

        let balance = engine.purchase_coins(viewer.id, 50).await.unwrap();
        assert_eq!(balance, 150);

        let txns = ledger.transactions_for_user(viewer.id).await.unwrap();
        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].amount, 50);
        assert_eq!(txns[0].kind, TransactionKind::CoinPurchase);
    }

    #[tokio::test]
    async fn test_purchase_rejects_non_positive_amounts() {
        let (ledger, engine, viewer, _, _) = setup(100, 25, false).await;

        assert_eq!(
            engine.purchase_coins(viewer.id, 0).await.unwrap_err(),
            StoreError::InvalidAmount(0)
        );
        assert_eq!(
            engine.purchase_coins(viewer.id, -5).await.unwrap_err(),
            StoreError::InvalidAmount(-5)
        );
        assert_eq!(ledger.transaction_count().await, 0);
        assert_eq!(ledger.balance_of(viewer.id).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_free_stream_join() {
        let (ledger, engine, viewer, creator, _) = setup(100, 0, false).await;
        let stream = ledger
            .create_stream(NewStream {
                title: "open mic".into(),
                genre: "music".into(),
                creator_id: creator.id,
                cost_in_coins: 0,
            })
            .await
            .unwrap();

        let receipt = engine.settle_join(viewer.id, stream.id).await.unwrap();
        assert_eq!(receipt.coins_remaining, 100);
        // Even a free join records the pair and the session.
        assert_eq!(ledger.transaction_count().await, 2);
        assert!(ledger.open_session(stream.id, viewer.id).await.is_some());
    }
}
