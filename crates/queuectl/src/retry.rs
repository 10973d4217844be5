//! Retry and dead-letter routing policy.
//!
//! The policy is pure so the store can apply it inside a transaction and
//! tests can pin the arithmetic without a database.

use chrono::{DateTime, Duration, Utc};

/// Delay before attempt `attempt` runs again, in seconds.
///
/// The exponent is the post-increment attempt count, so the first retry of a
/// base-2 job waits 2 s, the second 4 s, the third 8 s.
pub fn backoff_delay_secs(base: i64, attempt: i64) -> i64 {
    let exp = u32::try_from(attempt).unwrap_or(u32::MAX);
    base.saturating_pow(exp)
}

/// What to do with a job whose attempt just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Budget left: schedule the next attempt after an exponential delay.
    Retry {
        /// Attempt count after recording this failure.
        attempts: i64,
        /// Earliest instant the job may be acquired again.
        next_retry_at: DateTime<Utc>,
    },
    /// Budget exhausted: route to the dead-letter queue.
    Dead {
        /// Attempt count after recording this failure.
        attempts: i64,
    },
}

impl RetryDecision {
    /// Route a failure observed at `now` for a job that had completed
    /// `attempts_before` attempts.
    pub fn decide(
        attempts_before: i64,
        max_retries: i64,
        backoff_base: i64,
        now: DateTime<Utc>,
    ) -> Self {
        let attempts = attempts_before + 1;
        if attempts >= max_retries {
            RetryDecision::Dead { attempts }
        } else {
            let delay = backoff_delay_secs(backoff_base, attempts);
            RetryDecision::Retry {
                attempts,
                next_retry_at: now + Duration::seconds(delay),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_two_backoff_doubles() {
        assert_eq!(backoff_delay_secs(2, 1), 2);
        assert_eq!(backoff_delay_secs(2, 2), 4);
        assert_eq!(backoff_delay_secs(2, 3), 8);
        assert_eq!(backoff_delay_secs(3, 2), 9);
    }

    #[test]
    fn huge_exponents_saturate_instead_of_overflowing() {
        assert_eq!(backoff_delay_secs(2, 400), i64::MAX);
    }

    #[test]
    fn retries_until_the_budget_boundary() {
        let now = Utc::now();

        match RetryDecision::decide(0, 3, 2, now) {
            RetryDecision::Retry {
                attempts,
                next_retry_at,
            } => {
                assert_eq!(attempts, 1);
                assert_eq!((next_retry_at - now).num_seconds(), 2);
            }
            other => panic!("expected retry, got {other:?}"),
        }

        match RetryDecision::decide(1, 3, 2, now) {
            RetryDecision::Retry {
                attempts,
                next_retry_at,
            } => {
                assert_eq!(attempts, 2);
                assert_eq!((next_retry_at - now).num_seconds(), 4);
            }
            other => panic!("expected retry, got {other:?}"),
        }

        // The third failure lands on the budget and dead-letters the job.
        assert_eq!(
            RetryDecision::decide(2, 3, 2, now),
            RetryDecision::Dead { attempts: 3 }
        );
    }

    #[test]
    fn single_attempt_budget_dead_letters_immediately() {
        let now = Utc::now();
        assert_eq!(
            RetryDecision::decide(0, 1, 2, now),
            RetryDecision::Dead { attempts: 1 }
        );
    }
}
