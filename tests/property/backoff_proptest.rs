//! Property-based tests for reconnect backoff

use proptest::prelude::*;
use std::time::Duration;

use community_realtime::realtime::connection::BackoffStrategy;

proptest! {
    #[test]
    fn test_delay_never_exceeds_cap(
        base_ms in 1u64..10_000,
        extra_cap_ms in 0u64..60_000,
        jitter in 0.0f64..=1.0,
        attempts in 0u32..64,
    ) {
        let cap = Duration::from_millis(base_ms + extra_cap_ms);
        let strategy = BackoffStrategy::Exponential {
            base: Duration::from_millis(base_ms),
            cap,
            jitter,
        };
        let delay = strategy.delay(attempts);
        prop_assert!(delay <= cap);
        prop_assert!(delay >= strategy.base_delay(attempts));
    }

    #[test]
    fn test_base_delay_is_monotonic(base_ms in 1u64..10_000, attempts in 0u32..40) {
        let strategy = BackoffStrategy::Exponential {
            base: Duration::from_millis(base_ms),
            cap: Duration::from_secs(3_600),
            jitter: 0.0,
        };
        prop_assert!(strategy.base_delay(attempts) <= strategy.base_delay(attempts + 1));
    }
}
