pub const DEFAULT_BASE_URL: &str = "http://localhost:7777";

pub const REQUEST_TIMEOUT_SECS: u64 = 5;
pub const STREAM_CONNECT_TIMEOUT_SECS: u64 = 5;

pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;
pub const POLL_FETCH_LIMIT: usize = 10;

pub const RECONNECT_BASE_DELAY_MS: u64 = 1000;
pub const RECONNECT_MAX_DELAY_MS: u64 = 30_000;

pub const AVATAR_CACHE_MAX_AGE_SECS: u64 = 24 * 60 * 60;
pub const AVATAR_MIN_BYTES: usize = 100;

pub const DEFAULT_MAX_BUBBLES: usize = 5;
pub const DEFAULT_BUBBLE_SIZE: u32 = 64;
pub const DEFAULT_BUBBLE_GAP: u32 = 12;
pub const DEFAULT_BUBBLE_BASE_OFFSET: u32 = 120;

pub const EVENT_CHANNEL_CAPACITY: usize = 64;
