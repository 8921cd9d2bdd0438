//! Retry policy for segment attempts.

use std::time::Duration;

/// How a segment handles transient failures.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Fail on the first error.
    #[default]
    None,

    /// Delay grows by `base_delay` with each failed attempt.
    Linear {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        base_delay: Duration,
    },
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self::Linear {
            max_attempts,
            base_delay,
        }
    }

    /// Delay to wait after `attempt` failed attempts.
    ///
    /// # Arguments
    ///
    /// * `attempt` - Attempts made so far (1-based)
    ///
    /// # Returns
    ///
    /// `None` once the budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Linear {
                max_attempts,
                base_delay,
            } => (attempt < *max_attempts).then(|| base_delay.saturating_mul(attempt)),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Linear { max_attempts, .. } => *max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_delays() {
        let policy = RetryPolicy::linear(3, Duration::from_millis(1000));

        assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(1000)));
        assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(2000)));
        assert_eq!(policy.delay_for_attempt(3), None);
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn test_none_never_retries() {
        assert_eq!(RetryPolicy::None.delay_for_attempt(1), None);
        assert_eq!(RetryPolicy::None.max_attempts(), 1);
    }
}
