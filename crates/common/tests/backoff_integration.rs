//! Integration tests for backoff policies driven by a mock clock.

use std::time::Duration;

use courier_common::resilience::{Backoff, BackoffStrategy, Jitter};
use courier_common::time::{Clock, MockClock};

#[test]
fn exponential_schedule_matches_power_of_two_seconds() {
    let backoff = Backoff::default();
    let delays: Vec<_> = (0..4).map(|retry| backoff.delay_for(retry)).collect();

    assert_eq!(
        delays,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8),
        ]
    );
}

#[test]
fn deadline_is_reached_only_after_mock_time_advances() {
    let clock = MockClock::new();
    let backoff = Backoff::fixed(Duration::from_secs(5));
    let deadline = clock.now() + backoff.delay_for(0);

    clock.advance(Duration::from_secs(4));
    assert!(clock.now() < deadline);

    clock.advance(Duration::from_secs(1));
    assert!(clock.now() >= deadline);
}

#[test]
fn jittered_delays_never_exceed_the_cap() {
    let backoff = Backoff::new(
        BackoffStrategy::Exponential {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(800),
        },
        Jitter::Full,
    );

    for retry in 0..20 {
        assert!(backoff.delay_for(retry) <= Duration::from_millis(800));
    }
}
