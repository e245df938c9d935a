//! Reconnect delays with exponential backoff

use std::time::{Duration, SystemTime};

/// Reconnect policy for the control server connection
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect (doubles each failed attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    /// Consecutive failed attempts before giving up, `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Whether `failures` consecutive failures exhaust this policy
    #[must_use]
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

/// Compute the delay before reconnect attempt `attempt` (zero-based)
///
/// Doubles from `base_delay` per attempt and is capped at `max_delay`.
/// Up to a quarter is added on top so agents restarted together spread
/// their reconnects.
#[must_use]
pub fn delay_for_attempt(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    let doubled = policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(policy.max_delay);

    // Sub-second clock noise differs between devices, which is all the
    // spread needed here
    let noise = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();

    // 0.000..=0.249 of the doubled delay
    let spread = f64::from(noise % 250) / 1000.0;

    (doubled + doubled.mul_f64(spread)).min(policy.max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_growth() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            ..ReconnectPolicy::default()
        };

        assert!(delay_for_attempt(&policy, 0) >= Duration::from_millis(100));
        assert!(delay_for_attempt(&policy, 1) >= Duration::from_millis(200));
        assert!(delay_for_attempt(&policy, 2) >= Duration::from_millis(400));
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = ReconnectPolicy::default();
        for attempt in [5, 10, 64, u32::MAX] {
            assert!(delay_for_attempt(&policy, attempt) <= policy.max_delay);
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(1000),
            ..ReconnectPolicy::default()
        };

        for _ in 0..50 {
            let d = delay_for_attempt(&policy, 0);
            assert!(d >= Duration::from_millis(1000), "below base: {d:?}");
            assert!(d <= Duration::from_millis(1250), "above 125%: {d:?}");
        }
    }

    #[test]
    fn exhaustion() {
        assert!(!ReconnectPolicy::default().exhausted(u32::MAX));

        let policy = ReconnectPolicy {
            max_attempts: Some(3),
            ..ReconnectPolicy::default()
        };
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }
}
