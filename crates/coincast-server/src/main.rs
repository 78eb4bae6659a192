//! # coincast-server
//!
//! The Coincast hub: pay-per-join live streams with realtime chat and
//! peer-to-peer signaling.
//!
//! This binary provides:
//! - **WebSocket hub** tracking which authenticated connection is in which
//!   stream room, fanning out chat and presence events
//! - **Signaling relay** forwarding opaque peer-handshake payloads between
//!   exactly two identities
//! - **Coin settlement** moving value from viewer to creator atomically
//!   with the stream's viewer-count bookkeeping
//! - **REST API** (axum) for profiles, stream catalogue, chat history and
//!   the settlement boundary

mod api;
mod config;
mod error;
mod registry;
mod relay;
mod router;
mod throttle;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use coincast_store::{Ledger, SettlementEngine};

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::registry::ConnectionRegistry;
use crate::relay::SignalingRelay;
use crate::router::BroadcastRouter;
use crate::throttle::ChatThrottle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,coincast_server=debug")),
        )
        .init();

    info!("Starting Coincast hub v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let http_addr = config.http_addr;

    // -----------------------------------------------------------------------
    // 3. Construct subsystems (explicit instances, no globals)
    // -----------------------------------------------------------------------
    let ledger = Arc::new(Ledger::new());
    let settlement = Arc::new(SettlementEngine::new(ledger.clone(), config.allow_self_join));
    let registry = Arc::new(ConnectionRegistry::new());
    let router = Arc::new(BroadcastRouter::new(registry.clone()));
    let relay = Arc::new(SignalingRelay::new(router.clone()));
    let throttle = Arc::new(ChatThrottle::default());

    let state = AppState {
        ledger,
        settlement,
        registry,
        router,
        relay,
        throttle: throttle.clone(),
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic chat-throttle cleanup (every 5 minutes, evict buckets idle >10 min)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            throttle.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
