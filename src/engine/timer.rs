use std::time::{Duration, Instant};

/// Wall-clock deadline for a timed scenario. Advisory-polled: the caller
/// checks `expired_at` once per tick, so a late tick still detects expiry.
#[derive(Debug, Clone, Copy)]
pub struct Countdown {
    started: Instant,
    limit: Duration,
}

impl Countdown {
    pub fn new(started: Instant, limit: Duration) -> Self {
        Countdown { started, limit }
    }

    /// Time left at `now`, saturating at zero.
    pub fn remaining_at(&self, now: Instant) -> Duration {
        self.limit
            .saturating_sub(now.saturating_duration_since(self.started))
    }

    pub fn expired_at(&self, now: Instant) -> bool {
        self.remaining_at(now).is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_counts_down() {
        let start = Instant::now();
        let cd = Countdown::new(start, Duration::from_secs(30));
        assert_eq!(cd.remaining_at(start), Duration::from_secs(30));
        assert_eq!(
            cd.remaining_at(start + Duration::from_secs(12)),
            Duration::from_secs(18)
        );
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let start = Instant::now();
        let cd = Countdown::new(start, Duration::from_secs(5));
        assert_eq!(cd.remaining_at(start + Duration::from_secs(60)), Duration::ZERO);
        assert!(cd.expired_at(start + Duration::from_secs(5)));
        assert!(!cd.expired_at(start + Duration::from_millis(4999)));
    }
}
