//! Protocol-wide constants.

use std::time::Duration;

/// Entries whose remaining TTL is at or below this are evicted; incoming
/// records at or below it are rejected before merge.
pub const TTL_THRESHOLD_MS: i64 = 64;

/// Sentinel for entries that never expire. Never enqueued for countdown.
pub const TTL_INFINITY_MS: i64 = i64::MAX;

/// Fraction of the original TTL that may remain before a self-originated
/// key is refreshed. A key advertised with ttl T is re-advertised (ttl
/// version bump only) after T * (1 - TTL_REFRESH_FACTOR) has elapsed.
pub const TTL_REFRESH_FACTOR: f64 = 0.25;

/// Default per-hop TTL decrement applied when forwarding a publication.
pub const DEFAULT_TTL_DECREMENT_MS: i64 = 1;

/// Bound on each peer's outbound flood queue. Overflow drops the link and
/// schedules a full resync.
pub const FLOOD_QUEUE_BOUND: usize = 1024;

/// Bound on each subscriber's delivery queue. Overflow cancels the
/// subscription with a lagged error.
pub const SUBSCRIBER_QUEUE_BOUND: usize = 256;

/// Full-sync exchange deadline.
pub const SYNC_TIMEOUT: Duration = Duration::from_secs(15);

/// Default deadline for establishing a transport connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Default deadline for a single request/response exchange.
pub const PROCESS_TIMEOUT: Duration = Duration::from_secs(5);

/// Peer resync backoff window.
pub const BACKOFF_MIN: Duration = Duration::from_secs(1);
pub const BACKOFF_MAX: Duration = Duration::from_secs(64);
