//! Retry policy with exponential backoff.

use std::time::Duration;

use crate::Error;
use crate::config::DEFAULT_MAX_RETRIES;

/// Longest server-requested wait honored before giving up instead.
pub const DEFAULT_MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor: factor.max(1.0),
            jitter: 0.1,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// Jitter only lengthens the delay and never past `max`, so delays
    /// never shrink from one attempt to the next.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let base = self.initial.as_millis() as f64 * self.factor.powi(exponent);
        let max = self.max.as_millis() as f64;
        let clamped = base.min(max);

        let jittered = if self.jitter > 0.0 {
            clamped + rand::random::<f64>() * clamped * self.jitter
        } else {
            clamped
        };

        Duration::from_millis(jittered.min(max) as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff: ExponentialBackoff,
    pub retry_on_rate_limit: bool,
    pub retry_on_server_error: bool,
    pub retry_on_network_error: bool,
    /// A `Retry-After` longer than this ends the retry loop.
    pub max_retry_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: ExponentialBackoff::default(),
            retry_on_rate_limit: true,
            retry_on_server_error: true,
            retry_on_network_error: true,
            max_retry_after: DEFAULT_MAX_RETRY_AFTER,
        }
    }
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_retry_after(mut self, max_retry_after: Duration) -> Self {
        self.max_retry_after = max_retry_after;
        self
    }

    /// Whether `error` is worth another attempt.
    ///
    /// Deadlines and cancellation are final.
    pub fn should_retry(&self, error: &Error) -> bool {
        match error {
            Error::Api(api) if api.status == 429 => self.retry_on_rate_limit,
            Error::Api(api) if api.is_transient() => self.retry_on_server_error,
            Error::Network(e) => self.retry_on_network_error && (e.is_connect() || e.is_timeout()),
            _ => false,
        }
    }

    /// Delay before retry `attempt`, honoring the server's `Retry-After`.
    ///
    /// `None` when the server asks for longer than `max_retry_after`; the
    /// caller then surfaces the error instead of waiting.
    pub fn delay_for(&self, attempt: u32, error: &Error) -> Option<Duration> {
        let delay = self.backoff.delay_for(attempt);
        match error.api_error().and_then(|api| api.retry_after) {
            Some(retry_after) if retry_after > self.max_retry_after => None,
            Some(retry_after) => Some(retry_after.max(delay)),
            None => Some(delay),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ApiError;

    #[test]
    fn test_exponential_backoff() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(10), 2.0)
                .with_jitter(0.0);

        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(400));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn test_exponential_backoff_max() {
        let backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(500), 2.0)
                .with_jitter(0.0);

        assert_eq!(backoff.delay_for(10), Duration::from_millis(500));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_monotonic() {
        let backoff = ExponentialBackoff::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..12 {
            let delay = backoff.delay_for(attempt);
            assert!(delay >= previous, "attempt {} shrank", attempt);
            assert!(delay <= Duration::from_secs(30));
            previous = delay;
        }
    }

    #[test]
    fn test_should_retry() {
        let config = RetryConfig::default();
        assert!(config.should_retry(&Error::Api(ApiError::from_response(429, b""))));
        assert!(config.should_retry(&Error::Api(ApiError::from_response(503, b""))));
        assert!(!config.should_retry(&Error::Api(ApiError::from_response(404, b""))));
        assert!(!config.should_retry(&Error::Timeout(Duration::from_secs(1))));
        assert!(!config.should_retry(&Error::Cancelled));

        let no_rate_limit = RetryConfig {
            retry_on_rate_limit: false,
            ..Default::default()
        };
        assert!(!no_rate_limit.should_retry(&Error::Api(ApiError::from_response(429, b""))));
    }

    #[test]
    fn test_retry_after_is_lower_bound() {
        let config = RetryConfig::default().with_backoff(
            ExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(1), 2.0)
                .with_jitter(0.0),
        );
        let error = Error::Api(
            ApiError::from_response(429, b"").with_retry_after(Some(Duration::from_secs(3))),
        );
        assert_eq!(config.delay_for(1, &error), Some(Duration::from_secs(3)));

        let error = Error::Api(ApiError::from_response(503, b""));
        assert_eq!(config.delay_for(2, &error), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_retry_after_beyond_ceiling_gives_up() {
        let config = RetryConfig::default();
        let error = Error::Api(
            ApiError::from_response(429, b"").with_retry_after(Some(Duration::from_secs(86400))),
        );
        assert_eq!(config.delay_for(1, &error), None);

        let error = Error::Api(
            ApiError::from_response(429, b"").with_retry_after(Some(Duration::from_secs(60))),
        );
        assert_eq!(config.delay_for(1, &error), Some(Duration::from_secs(60)));

        let tight = config.with_max_retry_after(Duration::from_secs(5));
        assert_eq!(tight.delay_for(1, &error), None);
    }
}
