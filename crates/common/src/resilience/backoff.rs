//! Backoff delay policies for retry loops
//!
//! Shared by the transport's upload retry loop (5xx/connect failures) and
//! the event-stream reconnect loop. Delay calculation is pure; the loops
//! that sleep live with their owners.

use std::time::Duration;

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// Exponential backoff: `initial_delay * base^attempt`, capped.
    Exponential {
        /// Delay before the first retry (attempt 0).
        initial_delay: Duration,
        /// Growth factor applied per attempt.
        base: f64,
        /// Upper bound the computed delay is clamped to.
        max_delay: Duration,
    },
}

impl BackoffStrategy {
    /// The service-upload default: 1s, 2s, 4s, capped at 30s.
    pub fn upload_default() -> Self {
        Self::Exponential {
            initial_delay: Duration::from_secs(1),
            base: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Calculate the delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential { initial_delay, base, max_delay } => {
                let millis = initial_delay.as_millis() as f64 * base.powi(attempt as i32);
                let capped = millis.min(max_delay.as_millis() as f64) as u64;
                Duration::from_millis(capped)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_is_constant() {
        let strategy = BackoffStrategy::Fixed(Duration::from_millis(250));
        assert_eq!(strategy.delay_for(0), Duration::from_millis(250));
        assert_eq!(strategy.delay_for(9), Duration::from_millis(250));
    }

    #[test]
    fn upload_default_doubles_from_one_second() {
        let strategy = BackoffStrategy::upload_default();
        assert_eq!(strategy.delay_for(0), Duration::from_secs(1));
        assert_eq!(strategy.delay_for(1), Duration::from_secs(2));
        assert_eq!(strategy.delay_for(2), Duration::from_secs(4));
    }

    #[test]
    fn exponential_caps_at_max_delay() {
        let strategy = BackoffStrategy::Exponential {
            initial_delay: Duration::from_secs(1),
            base: 2.0,
            max_delay: Duration::from_secs(8),
        };
        assert_eq!(strategy.delay_for(10), Duration::from_secs(8));
    }
}
