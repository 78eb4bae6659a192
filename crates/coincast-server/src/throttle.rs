//! Per-connection chat throttle.
//!
//! Token bucket keyed by connection id, consulted before a chat message is
//! persisted. Throttled messages are answered with an `error` event and
//! never reach the ledger or the room.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::Mutex;

use coincast_shared::constants::{CHAT_BURST, CHAT_RATE_PER_SEC};
use coincast_shared::types::ConnectionId;

#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self, rate: f64, capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;

        self.tokens = (self.tokens + elapsed * rate).min(capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub struct ChatThrottle {
    buckets: Mutex<HashMap<ConnectionId, TokenBucket>>,
    rate: f64,
    capacity: f64,
}

impl ChatThrottle {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rate,
            capacity,
        }
    }

    /// Returns `true` if the connection may send another chat message now.
    pub async fn check(&self, conn: ConnectionId) -> bool {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .entry(conn)
            .or_insert_with(|| TokenBucket::new(self.capacity));
        bucket.try_consume(self.rate, self.capacity)
    }

    /// Drop a connection's bucket on disconnect.
    pub async fn forget(&self, conn: ConnectionId) {
        self.buckets.lock().await.remove(&conn);
    }

    /// Evict buckets idle longer than `max_idle_secs`.
    pub async fn purge_stale(&self, max_idle_secs: f64) {
        let mut buckets = self.buckets.lock().await;
        let now = Instant::now();
        buckets.retain(|_, bucket| {
            now.duration_since(bucket.last_refill).as_secs_f64() < max_idle_secs
        });
    }
}

impl Default for ChatThrottle {
    fn default() -> Self {
        Self::new(CHAT_RATE_PER_SEC, CHAT_BURST)
    }
}
