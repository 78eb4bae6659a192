/// Application name
pub const APP_NAME: &str = "Coincast";

/// Coins granted to a freshly created user profile
pub const DEFAULT_STARTING_COINS: i64 = 100;

/// Maximum chat messages returned by a history query
pub const CHAT_HISTORY_LIMIT: usize = 50;

/// Default HTTP/WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Sustained chat messages per second allowed on one connection
pub const CHAT_RATE_PER_SEC: f64 = 2.0;

/// Chat burst capacity per connection
pub const CHAT_BURST: f64 = 5.0;
