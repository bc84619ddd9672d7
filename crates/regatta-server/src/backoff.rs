//! Retry pacing for route jobs that ended FAILED.
//!
//! The scheduler never retries on its own. The race clock keeps one
//! [`RetryState`] per job key and resubmits only once it is due.

use std::time::Duration;

use tokio::time::Instant;

/// Exponential delay schedule shared by every job key.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base: Duration,
    max: Duration,
    jitter_ratio: f64,
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            base,
            max: max.max(base),
            jitter_ratio: 0.2,
        }
    }

    /// Delay after `failures` consecutive failures, before jitter.
    /// The first failure waits `base` and each further one doubles, up to `max`.
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let doublings = (failures - 1).min(31);
        self.base.saturating_mul(1u32 << doublings).min(self.max)
    }
}

/// Failure history of one job key.
#[derive(Debug, Clone)]
pub struct RetryState {
    salt: u64,
    failures: u32,
    due_at: Instant,
    last_error: Option<String>,
}

impl RetryState {
    /// `salt` spreads the jitter of keys that fail at the same moment.
    pub fn new(salt: u64) -> Self {
        Self {
            salt,
            failures: 0,
            due_at: Instant::now(),
            last_error: None,
        }
    }

    pub fn is_due(&self) -> bool {
        Instant::now() >= self.due_at
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Record a failure and return how long the key must wait.
    pub fn record_failure(&mut self, policy: &RetryPolicy, error: impl Into<String>) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = spread(
            policy.delay_for(self.failures),
            policy.jitter_ratio,
            self.salt ^ u64::from(self.failures),
        );
        self.due_at = Instant::now() + delay;
        self.last_error = Some(error.into());
        delay
    }
}

/// Stretch `delay` by up to `ratio` of itself, the fraction derived from `seed`.
fn spread(delay: Duration, ratio: f64, seed: u64) -> Duration {
    if delay.is_zero() || !(0.0..=1.0).contains(&ratio) {
        return delay;
    }
    // splitmix64 finalizer
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    let fraction = (z >> 11) as f64 / (1u64 << 53) as f64;
    delay.mul_f64(1.0 + ratio * fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_up_to_max() {
        let policy = RetryPolicy::new(Duration::from_secs(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for(4), Duration::from_secs(30));
        assert_eq!(policy.delay_for(200), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn due_again_after_delay() {
        let policy = RetryPolicy::new(Duration::from_secs(5), Duration::from_secs(60));
        let mut state = RetryState::new(42);
        assert!(state.is_due());

        let delay = state.record_failure(&policy, "unreachable");
        assert!(delay >= Duration::from_secs(5));
        assert!(delay <= Duration::from_secs(6));
        assert!(!state.is_due());
        assert_eq!(state.last_error(), Some("unreachable"));

        tokio::time::advance(delay).await;
        assert!(state.is_due());

        let delay = state.record_failure(&policy, "timeout");
        assert!(delay >= Duration::from_secs(10));
        assert!(delay <= Duration::from_secs(12));
        assert_eq!(state.failures(), 2);
    }

    #[test]
    fn jitter_stays_within_ratio() {
        for seed in 0..64 {
            let delay = spread(Duration::from_millis(1000), 0.2, seed);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1200));
        }
        assert_eq!(spread(Duration::ZERO, 0.2, 7), Duration::ZERO);
    }
}
