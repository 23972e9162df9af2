//! Tests for utility functions

use std::time::Duration;

use prometheus_jobs::util::{init_test_tracing, now_ms, panic_message, Clock, ManualClock, SystemClock};

#[test]
fn test_manual_clock_only_moves_when_advanced() {
    let clock = ManualClock::new();
    let start = clock.now();
    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(clock.now(), start);

    clock.advance(Duration::from_secs(3));
    assert_eq!(clock.now() - start, Duration::from_secs(3));

    // Clones share the same time.
    let shared = clock.clone();
    shared.advance(Duration::from_secs(1));
    assert_eq!(clock.now() - start, Duration::from_secs(4));
}

#[test]
fn test_system_clock_is_monotonic() {
    let clock = SystemClock;
    let first = clock.now();
    assert!(clock.now() >= first);
}

#[test]
fn test_now_ms() {
    assert!(now_ms() > 0);
}

#[test]
fn test_panic_message_non_string_payload() {
    let payload = std::panic::catch_unwind(|| std::panic::panic_any(17_u32)).unwrap_err();
    assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
}

#[test]
fn test_init_test_tracing_is_idempotent() {
    init_test_tracing();
    init_test_tracing();
}
