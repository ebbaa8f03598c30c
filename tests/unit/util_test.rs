//! Tests for utility functions

use std::time::{Duration, SystemTime};

use adaptive_resource_manager::util::{
    init_test_tracing, init_tracing, now_ms, signed_until, whole_minutes_since,
};

#[test]
fn test_now_ms_is_after_2020() {
    assert!(now_ms() > 1_577_836_800_000);
}

#[test]
fn test_signed_until_handles_both_directions() {
    let now = SystemTime::now();
    assert_eq!(signed_until(now + Duration::from_secs(2), now), 2_000);
    assert_eq!(signed_until(now - Duration::from_millis(1_500), now), -1_500);
    assert_eq!(signed_until(now, now), 0);
}

#[test]
fn test_whole_minutes_since_truncates() {
    let now = SystemTime::now();
    assert_eq!(whole_minutes_since(now - Duration::from_secs(179), now), 2);
    assert_eq!(whole_minutes_since(now - Duration::from_secs(59), now), 0);
    assert_eq!(whole_minutes_since(now + Duration::from_secs(600), now), 0);
}

#[test]
fn test_tracing_init_is_idempotent() {
    init_test_tracing();
    init_tracing();
    init_tracing();
}
