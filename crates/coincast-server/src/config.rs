//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;

use coincast_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_STARTING_COINS};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP/WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Ed25519 public key of the auth service (hex-encoded, 64 chars).
    /// Env: `AUTH_SERVER_PUBKEY`
    /// Default: all-zeros (development only; rejects every token).
    pub auth_pubkey: [u8; 32],

    /// Whether a creator may pay to join their own stream. The transfer is
    /// net-zero but still records the transaction pair and a session.
    /// Env: `ALLOW_SELF_JOIN` (true/false)
    /// Default: `false`
    pub allow_self_join: bool,

    /// Coins granted to a freshly created user profile.
    /// Env: `STARTING_COINS`
    /// Default: `100`
    pub starting_coins: i64,

    /// Maximum messages returned by a chat history query.
    /// Env: `CHAT_HISTORY_LIMIT`
    /// Default: `50`
    pub chat_history_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            auth_pubkey: [0u8; 32],
            allow_self_join: false,
            starting_coins: DEFAULT_STARTING_COINS,
            chat_history_limit: coincast_shared::constants::CHAT_HISTORY_LIMIT,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Ok(hex_key) = std::env::var("AUTH_SERVER_PUBKEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.auth_pubkey = key,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid AUTH_SERVER_PUBKEY, using default (dev-only)"
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("ALLOW_SELF_JOIN") {
            config.allow_self_join = val == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("STARTING_COINS") {
            if let Ok(n) = val.parse::<i64>() {
                if n >= 0 {
                    config.starting_coins = n;
                }
            }
        }

        if let Ok(val) = std::env::var("CHAT_HISTORY_LIMIT") {
            if let Ok(n) = val.parse::<usize>() {
                config.chat_history_limit = n;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_pubkey(hex_str: &str) -> Result<[u8; 32], String> {
    let hex_str = hex_str.trim();
    if hex_str.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", hex_str.len()));
    }

    let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {e}"))?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
