use std::time;

/// Exponential backoff between attempts of a failed slot api call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Coefficient to multiply initial_interval with for every past attempt.
    backoff_coefficient: u32,
    /// The backoff interval for the first retry.
    initial_interval: time::Duration,
    /// The maximum possible backoff between retries.
    maximum_interval: Option<time::Duration>,
}

impl RetryPolicy {
    pub fn new(
        backoff_coefficient: u32,
        initial_interval: time::Duration,
        maximum_interval: Option<time::Duration>,
    ) -> Self {
        Self {
            backoff_coefficient,
            initial_interval,
            maximum_interval,
        }
    }

    /// How long to wait before the next attempt, given how many attempts already failed
    /// beyond the first one.
    pub fn time_until_next_retry(&self, attempt: u32) -> time::Duration {
        let candidate = self
            .backoff_coefficient
            .checked_pow(attempt)
            .and_then(|factor| self.initial_interval.checked_mul(factor));

        match (candidate, self.maximum_interval) {
            (Some(candidate), Some(max_interval)) => std::cmp::min(candidate, max_interval),
            (None, Some(max_interval)) => max_interval,
            (Some(candidate), None) => candidate,
            (None, None) => time::Duration::MAX,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_coefficient: 2,
            initial_interval: time::Duration::from_millis(500),
            maximum_interval: Some(time::Duration::from_secs(10)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backs_off_exponentially() {
        let policy = RetryPolicy::new(2, time::Duration::from_millis(100), None);

        assert_eq!(policy.time_until_next_retry(0), time::Duration::from_millis(100));
        assert_eq!(policy.time_until_next_retry(1), time::Duration::from_millis(200));
        assert_eq!(policy.time_until_next_retry(3), time::Duration::from_millis(800));
    }

    #[test]
    fn caps_at_maximum_interval() {
        let policy = RetryPolicy::new(
            3,
            time::Duration::from_secs(1),
            Some(time::Duration::from_secs(5)),
        );

        assert_eq!(policy.time_until_next_retry(1), time::Duration::from_secs(3));
        assert_eq!(policy.time_until_next_retry(2), time::Duration::from_secs(5));
        assert_eq!(policy.time_until_next_retry(200), time::Duration::from_secs(5));
    }
}
