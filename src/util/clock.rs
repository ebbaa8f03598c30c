//! Wall-clock helpers shared by scheduling and telemetry.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

/// Signed distance from `now` to `at`. Negative when `at` is in the past.
#[must_use]
pub fn signed_until(at: SystemTime, now: SystemTime) -> i128 {
    match at.duration_since(now) {
        Ok(ahead) => i128::try_from(ahead.as_millis()).unwrap_or(i128::MAX),
        Err(behind) => -i128::try_from(behind.duration().as_millis()).unwrap_or(i128::MAX),
    }
}

/// Whole minutes elapsed between `since` and `now`, zero if `since` is in the future.
#[must_use]
pub fn whole_minutes_since(since: SystemTime, now: SystemTime) -> u64 {
    now.duration_since(since)
        .unwrap_or(Duration::ZERO)
        .as_secs()
        / 60
}
