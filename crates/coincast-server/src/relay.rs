//! Peer-connection signaling relay.
//!
//! Forwards opaque handshake payloads (offers, answers, ICE candidates)
//! from a source identity to exactly one target identity. The payload is
//! never parsed or validated, which keeps the hub independent of any
//! particular negotiation protocol or codec. Delivery inherits the
//! router's at-most-once contract: an offline target means a silent drop,
//! and the source gets no confirmation either way.

use std::sync::Arc;

use tracing::debug;

use coincast_shared::protocol::ServerMessage;
use coincast_shared::types::UserId;

use crate::router::BroadcastRouter;

pub struct SignalingRelay {
    router: Arc<BroadcastRouter>,
}

impl SignalingRelay {
    pub fn new(router: Arc<BroadcastRouter>) -> Self {
        Self { router }
    }

    /// Forward a signaling payload to the target identity's live
    /// connections, stamped with the source identity.
    pub async fn relay_signal(
        &self,
        source: UserId,
        target: UserId,
        signal: serde_json::Value,
    ) {
        debug!(
            from = %source.short(),
            to = %target.short(),
            "Relaying signaling payload"
        );

        let message = ServerMessage::WebrtcSignal {
            signal,
            from_user_id: source,
        };
        self.router.send_to_identity(target, &message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    use coincast_shared::types::ConnectionId;

    use crate::registry::ConnectionRegistry;

    async fn setup() -> (Arc<ConnectionRegistry>, SignalingRelay) {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(BroadcastRouter::new(registry.clone()));
        (registry, SignalingRelay::new(router))
    }

    #[tokio::test]
    async fn test_signal_reaches_only_the_target_identity() {
        let (registry, relay) = setup().await;
        let (source, target, other) = (UserId::new(), UserId::new(), UserId::new());

        let (target_tx, mut target_rx) = mpsc::unbounded_channel();
        let (other_tx, mut other_rx) = mpsc::unbounded_channel();
        registry
            .register(ConnectionId::new(), target, target_tx)
            .await
            .unwrap();
        registry
            .register(ConnectionId::new(), other, other_tx)
            .await
            .unwrap();

        let payload = serde_json::json!({"kind": "offer", "sdp": "v=0"});
        relay.relay_signal(source, target, payload.clone()).await;

        match target_rx.try_recv().unwrap() {
            ServerMessage::WebrtcSignal {
                signal,
                from_user_id,
            } => {
                // Forwarded structure-for-structure, stamped with the source.
                assert_eq!(signal, payload);
                assert_eq!(from_user_id, source);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_signal_reaches_every_target_device() {
        let (registry, relay) = setup().await;
        let target = UserId::new();

        let (phone_tx, mut phone_rx) = mpsc::unbounded_channel();
        let (laptop_tx, mut laptop_rx) = mpsc::unbounded_channel();
        registry
            .register(ConnectionId::new(), target, phone_tx)
            .await
            .unwrap();
        registry
            .register(ConnectionId::new(), target, laptop_tx)
            .await
            .unwrap();

        relay
            .relay_signal(UserId::new(), target, serde_json::json!({"c": "ice"}))
            .await;

        assert!(phone_rx.try_recv().is_ok());
        assert!(laptop_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_offline_target_drops_silently() {
        let (_registry, relay) = setup().await;
        relay
            .relay_signal(UserId::new(), UserId::new(), serde_json::json!({}))
            .await;
    }
}
