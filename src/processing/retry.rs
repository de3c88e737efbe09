//! Retry policies
//!
//! Jobs decide their own retries through [`Job::can_retry`] and
//! [`Job::retry_after`]. [`RetryPolicy`] packages the common answers so a
//! job can delegate both to one value:
//!
//! ```rust
//! use aint_queue::processing::{RetryPolicy, RetryStrategy};
//! use aint_queue::{Job, JobContext, JobError};
//! use async_trait::async_trait;
//! use chrono::{DateTime, Duration, Utc};
//!
//! struct Webhook {
//!     retry: RetryPolicy,
//! }
//!
//! #[async_trait]
//! impl Job for Webhook {
//!     async fn handle(&self, _ctx: &JobContext) -> Result<(), JobError> {
//!         Err(JobError::new("NetworkError", "503"))
//!     }
//!
//!     fn can_retry(&self, attempts: u32, error: &JobError) -> bool {
//!         self.retry.can_retry(attempts, error)
//!     }
//!
//!     fn retry_after(&self, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
//!         self.retry.retry_after(attempts, now)
//!     }
//! }
//!
//! let job = Webhook {
//!     retry: RetryPolicy::new(RetryStrategy::fixed(Duration::seconds(30), 3)),
//! };
//! assert!(job.can_retry(1, &JobError::new("NetworkError", "503")));
//! assert!(!job.can_retry(3, &JobError::new("NetworkError", "503")));
//! ```
//!
//! [`Job::can_retry`]: crate::Job::can_retry
//! [`Job::retry_after`]: crate::Job::retry_after

use chrono::{DateTime, Duration, Utc};

use crate::core::JobError;

/// Backoff between attempts
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// No retry attempts
    None,
    /// Fixed interval between retries
    Fixed {
        /// Interval between retry attempts
        interval: Duration,
        /// Total attempts including the first run
        max_attempts: u32,
    },
    /// Exponential backoff with optional jitter
    ExponentialBackoff {
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        max_attempts: u32,
        /// Spread each delay by up to ±25%
        jitter: bool,
    },
    /// Delay grows by a fixed increment per attempt
    LinearBackoff {
        initial_delay: Duration,
        increment: Duration,
        max_delay: Duration,
        max_attempts: u32,
    },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::LinearBackoff {
            initial_delay: Duration::seconds(60),
            increment: Duration::seconds(60),
            max_delay: Duration::hours(1),
            max_attempts: 5,
        }
    }
}

impl RetryStrategy {
    pub fn none() -> Self {
        Self::None
    }

    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self::Fixed {
            interval,
            max_attempts,
        }
    }

    pub fn exponential_backoff(
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        max_attempts: u32,
    ) -> Self {
        Self::ExponentialBackoff {
            initial_delay,
            multiplier,
            max_delay,
            max_attempts,
            jitter: true,
        }
    }

    pub fn linear_backoff(
        initial_delay: Duration,
        increment: Duration,
        max_delay: Duration,
        max_attempts: u32,
    ) -> Self {
        Self::LinearBackoff {
            initial_delay,
            increment,
            max_delay,
            max_attempts,
        }
    }

    /// Delay after the given failed attempt, or `None` once attempts are used up.
    pub fn calculate_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts() {
            return None;
        }

        match self {
            RetryStrategy::None => None,
            RetryStrategy::Fixed { interval, .. } => Some(*interval),
            RetryStrategy::ExponentialBackoff {
                initial_delay,
                multiplier,
                max_delay,
                jitter,
                ..
            } => {
                let mut delay = initial_delay.num_milliseconds() as f64;
                for _ in 1..attempt {
                    delay *= multiplier;
                }
                delay = delay.min(max_delay.num_milliseconds() as f64);

                if *jitter {
                    let spread = delay * 0.25;
                    delay += spread * (fastrand::f64() * 2.0 - 1.0);
                }

                Some(Duration::milliseconds(delay as i64))
            }
            RetryStrategy::LinearBackoff {
                initial_delay,
                increment,
                max_delay,
                ..
            } => {
                let delay = *initial_delay + *increment * (attempt as i32 - 1);
                Some(delay.min(*max_delay))
            }
        }
    }

    /// Total attempts allowed, including the first run
    pub fn max_attempts(&self) -> u32 {
        match self {
            RetryStrategy::None => 1,
            RetryStrategy::Fixed { max_attempts, .. }
            | RetryStrategy::ExponentialBackoff { max_attempts, .. }
            | RetryStrategy::LinearBackoff { max_attempts, .. } => *max_attempts,
        }
    }
}

/// Which failures to retry and how long to wait
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub strategy: RetryStrategy,
    /// Error kinds that are never retried
    pub fatal_kinds: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            strategy: RetryStrategy::default(),
            fatal_kinds: vec![
                "ArgumentError".to_string(),
                "ValidationError".to_string(),
                "AuthenticationError".to_string(),
            ],
        }
    }
}

impl RetryPolicy {
    pub fn new(strategy: RetryStrategy) -> Self {
        Self {
            strategy,
            ..Default::default()
        }
    }

    pub fn no_retry() -> Self {
        Self {
            strategy: RetryStrategy::None,
            fatal_kinds: vec![],
        }
    }

    /// Never retry errors of this kind
    pub fn fatal_kind(mut self, kind: impl Into<String>) -> Self {
        self.fatal_kinds.push(kind.into());
        self
    }

    /// Answer for [`Job::can_retry`](crate::Job::can_retry).
    pub fn can_retry(&self, attempts: u32, error: &JobError) -> bool {
        if self.fatal_kinds.iter().any(|kind| *kind == error.kind) {
            return false;
        }
        self.strategy.calculate_delay(attempts).is_some()
    }

    /// Answer for [`Job::retry_after`](crate::Job::retry_after). Exhausted
    /// policies answer `now`, which only matters if a job retries anyway.
    pub fn retry_after(&self, attempts: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self
            .strategy
            .calculate_delay(attempts)
            .unwrap_or_else(Duration::zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_calculation() {
        let strategy = RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::seconds(1),
            multiplier: 2.0,
            max_delay: Duration::minutes(5),
            max_attempts: 4,
            jitter: false,
        };

        assert_eq!(strategy.calculate_delay(1).unwrap().num_seconds(), 1);
        assert_eq!(strategy.calculate_delay(2).unwrap().num_seconds(), 2);
        assert_eq!(strategy.calculate_delay(3).unwrap().num_seconds(), 4);
        // Fourth attempt was the last one
        assert!(strategy.calculate_delay(4).is_none());
    }

    #[test]
    fn test_fixed_retry_calculation() {
        let strategy = RetryStrategy::fixed(Duration::seconds(5), 3);

        assert_eq!(strategy.calculate_delay(1).unwrap().num_seconds(), 5);
        assert_eq!(strategy.calculate_delay(2).unwrap().num_seconds(), 5);
        assert!(strategy.calculate_delay(3).is_none());
    }

    #[test]
    fn test_linear_backoff_calculation() {
        let strategy = RetryStrategy::linear_backoff(
            Duration::seconds(1),
            Duration::seconds(2),
            Duration::minutes(1),
            4,
        );

        assert_eq!(strategy.calculate_delay(1).unwrap().num_seconds(), 1);
        assert_eq!(strategy.calculate_delay(2).unwrap().num_seconds(), 3);
        assert_eq!(strategy.calculate_delay(3).unwrap().num_seconds(), 5);
    }

    #[test]
    fn test_policy_respects_fatal_kinds_and_limits() {
        let policy = RetryPolicy::default();
        let network = JobError::new("NetworkError", "reset");
        let argument = JobError::new("ArgumentError", "bad id");

        assert!(policy.can_retry(1, &network));
        assert!(!policy.can_retry(1, &argument));
        assert!(!policy.can_retry(5, &network));
        assert!(!RetryPolicy::no_retry().can_retry(1, &network));
    }

    #[test]
    fn test_policy_retry_after() {
        let policy = RetryPolicy::new(RetryStrategy::fixed(Duration::seconds(30), 3));
        let now = Utc::now();

        assert_eq!(policy.retry_after(1, now), now + Duration::seconds(30));
        assert_eq!(policy.retry_after(3, now), now);
    }
}
