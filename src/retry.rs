use std::time::Duration;

use crate::QueueConfig;

/// Redelivery policy for the notification consumer: exponential backoff
/// with a cap and jitter, plus the bound past which a message is
/// dead-lettered instead of retried.
#[derive(Debug, Clone)]
pub struct RedeliveryPolicy {
    pub max_redeliveries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_redeliveries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RedeliveryPolicy {
    pub fn from_config(queue: &QueueConfig) -> Self {
        Self {
            max_redeliveries: queue.max_redeliveries,
            initial_delay: Duration::from_millis(queue.redelivery_backoff_ms),
            ..Default::default()
        }
    }

    /// True once `attempt_count` redeliveries have already been spent.
    pub fn is_exhausted(&self, attempt_count: u32) -> bool {
        attempt_count > self.max_redeliveries
    }

    /// Delay before the given redelivery attempt becomes visible again.
    pub fn delay_for(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.saturating_sub(1).min(16);
        let base = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(exponent as i32);
        let mut delay = Duration::from_millis(base as u64).min(self.max_delay);

        if self.jitter {
            let jitter_ms = (delay.as_millis() as f64 * 0.1 * rand::random::<f64>()) as u64;
            delay += Duration::from_millis(jitter_ms);
        }

        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RedeliveryPolicy {
            max_redeliveries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10), Duration::from_secs(1));
    }

    #[test]
    fn exhaustion_boundary() {
        let policy = RedeliveryPolicy {
            max_redeliveries: 2,
            ..Default::default()
        };

        assert!(!policy.is_exhausted(1));
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
    }
}
