// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use missive_core::Timestamp;

/// How long to sleep before the message due at `expires_at` needs sweeping.
///
/// Past deadlines give zero. The result never exceeds `max`, so a far-off
/// deadline just means an early wake that recomputes.
pub fn next_wake_delay(expires_at: Timestamp, now: Timestamp, max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    let remaining = expires_at.saturating_sub(now).max(0) as u64;
    Duration::from_millis(remaining.min(max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use missive_config::model::MAX_TIMER_DELAY_MS;
    use proptest::prelude::*;

    const MAX: Duration = Duration::from_millis(MAX_TIMER_DELAY_MS);

    #[test]
    fn overdue_wakes_immediately() {
        assert_eq!(next_wake_delay(100, 500, MAX), Duration::ZERO);
        assert_eq!(next_wake_delay(500, 500, MAX), Duration::ZERO);
    }

    #[test]
    fn far_future_is_clamped() {
        let in_a_year = 365 * 24 * 60 * 60 * 1000;
        assert_eq!(next_wake_delay(in_a_year, 0, MAX), MAX);
    }

    #[test]
    fn extreme_timestamps_do_not_overflow() {
        assert_eq!(next_wake_delay(i64::MAX, i64::MIN, MAX), MAX);
        assert_eq!(next_wake_delay(i64::MIN, i64::MAX, MAX), Duration::ZERO);
    }

    proptest! {
        #[test]
        fn delay_stays_within_bounds(
            expires_at in -1_000_000_000i64..1_000_000_000_000,
            now in 0i64..1_000_000_000_000,
            max_ms in 1u64..=MAX_TIMER_DELAY_MS,
        ) {
            let max = Duration::from_millis(max_ms);
            let delay = next_wake_delay(expires_at, now, max);
            prop_assert!(delay <= max);
            // Never sleeps past the deadline.
            prop_assert!(now + delay.as_millis() as i64 <= expires_at.max(now));
        }

        #[test]
        fn earliest_deadline_gives_the_shortest_sleep(
            mut deadlines in proptest::collection::vec(0i64..10_000_000, 1..20),
            now in 0i64..10_000_000,
        ) {
            let soonest = *deadlines.iter().min().unwrap();
            deadlines.sort_unstable();
            let chosen = next_wake_delay(soonest, now, MAX);
            for d in deadlines {
                prop_assert!(chosen <= next_wake_delay(d, now, MAX));
            }
        }
    }
}
