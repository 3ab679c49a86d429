//! Call-level retry policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::Error;

/// How to proceed after a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    Fail,
}

/// Call-level retry policy, separate from job-level state.
///
/// Rate-limit responses get exponential backoff (`base_delay * 2^n`, capped at `max_delay`,
/// and never shorter than a provider `Retry-After` hint). Other retryable failures get a
/// flat `transient_delay`. Everything else fails immediately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first rate-limited attempt.
    pub max_rate_limit_retries: u32,
    #[serde(with = "millis")]
    pub base_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Retries after the first transient (server, timeout, network) failure.
    pub max_transient_retries: u32,
    #[serde(with = "millis")]
    pub transient_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_transient_retries: 2,
            transient_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail on the first error. Useful in tests and for providers with their own retries.
    pub fn none() -> Self {
        Self {
            max_rate_limit_retries: 0,
            max_transient_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_rate_limit_retries(mut self, retries: u32, base_delay: Duration) -> Self {
        self.max_rate_limit_retries = retries;
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_transient_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.max_transient_retries = retries;
        self.transient_delay = delay;
        self
    }

    pub fn backoff_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exp = self.base_delay.saturating_mul(factor).min(self.max_delay);
        match retry_after {
            Some(hint) => exp.max(hint.min(self.max_delay)),
            None => exp,
        }
    }

    /// Decide what to do after a failure.
    ///
    /// `rate_limit_failures` and `transient_failures` count previous failures of each kind,
    /// including the one being decided on.
    pub fn decide(&self, err: &Error, rate_limit_failures: u32, transient_failures: u32) -> Decision {
        if err.is_rate_limit() {
            if rate_limit_failures <= self.max_rate_limit_retries {
                let attempt = rate_limit_failures.saturating_sub(1);
                return Decision::Retry {
                    delay: self.backoff_delay(attempt, err.retry_after()),
                };
            }
            return Decision::Fail;
        }

        if err.is_retryable() && transient_failures <= self.max_transient_retries {
            return Decision::Retry {
                delay: self.transient_delay,
            };
        }

        Decision::Fail
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FailureCategory;

    fn api(category: FailureCategory) -> Error {
        Error::Api {
            provider: "openai".into(),
            category,
            status: None,
            message: "x".into(),
        }
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy::new()
            .with_rate_limit_retries(10, Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(0, None), Duration::from_millis(500));
        assert_eq!(policy.backoff_delay(1, None), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(2, None), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(5, None), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(40, None), Duration::from_secs(4));
    }

    #[test]
    fn test_retry_after_hint_wins_when_longer() {
        let policy = RetryPolicy::new();
        assert_eq!(
            policy.backoff_delay(0, Some(Duration::from_secs(7))),
            Duration::from_secs(7)
        );
        assert_eq!(
            policy.backoff_delay(0, Some(Duration::from_secs(600))),
            policy.max_delay
        );
    }

    #[test]
    fn test_rate_limit_retries_are_bounded() {
        let policy = RetryPolicy::new();
        let err = Error::rate_limit("openai", "429", None);
        for n in 1..=3 {
            assert!(matches!(policy.decide(&err, n, 0), Decision::Retry { .. }));
        }
        assert_eq!(policy.decide(&err, 4, 0), Decision::Fail);
    }

    #[test]
    fn test_transient_failures_use_flat_delay() {
        let policy = RetryPolicy::new();
        let err = api(FailureCategory::ServerError);
        assert_eq!(
            policy.decide(&err, 0, 1),
            Decision::Retry {
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            policy.decide(&err, 0, 2),
            Decision::Retry {
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(policy.decide(&err, 0, 3), Decision::Fail);
    }

    #[test]
    fn test_permanent_failures_are_not_retried() {
        let policy = RetryPolicy::new();
        assert_eq!(policy.decide(&api(FailureCategory::InvalidRequest), 0, 1), Decision::Fail);
        assert_eq!(policy.decide(&Error::validation("bad"), 0, 1), Decision::Fail);
        assert_eq!(policy.decide(&Error::configuration("no key"), 0, 1), Decision::Fail);
    }

    #[test]
    fn test_deserializes_millis() {
        let policy: RetryPolicy =
            serde_yaml::from_str("max_rate_limit_retries: 5\nbase_delay: 250\n").unwrap();
        assert_eq!(policy.max_rate_limit_retries, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_transient_retries, 2);
    }
}
