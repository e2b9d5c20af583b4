//! Retry contract for the external task queue.
//!
//! The queue owns redelivery; this policy only answers "how long until the
//! next attempt". It is distinct from the client's in-call retry loop:
//! queue retries re-run the whole pipeline (which is what makes the
//! idempotency guard necessary), client retries re-send one HTTP request.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Cap on the exponential growth.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry `attempt` (1-based). `None` once the retry
    /// budget is spent — the queue should drop or dead-letter the job.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_the_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_secs(4)));
        assert_eq!(policy.delay_for(3), Some(Duration::from_secs(8)));
        assert_eq!(policy.delay_for(4), Some(Duration::from_secs(16)));
        assert_eq!(policy.delay_for(5), Some(Duration::from_secs(32)));
    }

    #[test]
    fn cap_bounds_late_attempts() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        };
        assert_eq!(policy.delay_for(8), Some(Duration::from_secs(60)));
        assert_eq!(policy.delay_for(10), Some(Duration::from_secs(60)));
    }

    #[test]
    fn budget_exhaustion_returns_none() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), None);
        assert_eq!(policy.delay_for(6), None);
    }
}
