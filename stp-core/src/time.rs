use std::time::{Duration, Instant, SystemTime};

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01).
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_secs()
}

/// True if `since` is `None`, or at least `interval` has elapsed since it relative to `now`.
/// Used by the heartbeat scheduler: a `None` `last_heartbeat_at` always fires immediately.
#[inline]
pub fn interval_elapsed(now: Instant, since: Option<Instant>, interval: Duration) -> bool {
    match since {
        None => true,
        Some(since) => now.duration_since(since) >= interval,
    }
}
