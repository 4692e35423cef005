//! Retry policy and decorator.

use crate::invoker::{Call, Invoker, Outcome, Payload};
use crate::{ClientError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Decides whether (and how long) to wait before re-driving a failed call.
///
/// `attempt` is the number of attempts already made, starting at 1 for the
/// first failure. Returning `None` stops retrying.
pub trait RetryPolicy: Send + Sync {
    /// Delay before the next attempt, or `None` to stop.
    fn next_delay(&self, error: &ClientError, attempt: u32) -> Option<Duration>;
}

/// Exponential-backoff retry configuration, also usable directly as a
/// [`RetryPolicy`]: `delay = min(base * multiplier^(attempt-1), max_delay)`,
/// stopping once `max_attempts` transport attempts were made. A server
/// `Retry-After` hint overrides the computed delay for that attempt,
/// clamped to `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total transport attempts allowed per logical call.
    pub max_attempts: u32,
    /// Backoff for the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Backoff growth factor.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 1.5,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given attempt budget and base delay.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            ..Default::default()
        }
    }

    /// Set the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Computed backoff for a given attempt number (1-based), ignoring any
    /// server hint.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.base_delay.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

impl RetryPolicy for RetryConfig {
    fn next_delay(&self, error: &ClientError, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        if let Some(hint) = error.retry_after() {
            return Some(hint.min(self.max_delay));
        }
        Some(self.backoff_for_attempt(attempt))
    }
}

/// Per-invocation retry state. Created fresh for every logical call and
/// never shared.
#[derive(Debug)]
struct RetryState {
    attempts: u32,
}

impl RetryState {
    fn new() -> Self {
        Self { attempts: 0 }
    }
}

/// Decorator that re-drives the wrapped chain on retryable failures.
pub struct RetryInvoker {
    inner: Arc<dyn Invoker>,
    policy: Arc<dyn RetryPolicy>,
}

impl RetryInvoker {
    /// Wrap an inner chain with a retry policy.
    pub fn new(inner: Arc<dyn Invoker>, policy: Arc<dyn RetryPolicy>) -> Self {
        Self { inner, policy }
    }

    /// Run one attempt. For multi-arity calls the attempt's stream is
    /// drained here so a mid-stream failure retries the whole call and any
    /// partially delivered chunks are discarded.
    async fn attempt(&self, call: &Call) -> Result<Outcome> {
        let mut outcome = self.inner.invoke(call.clone()).await?;
        if let Payload::Stream(body) = outcome.payload {
            outcome.payload = Payload::Full(crate::response::drain(body).await?);
        }
        Ok(outcome)
    }
}

#[async_trait]
impl Invoker for RetryInvoker {
    async fn invoke(&self, call: Call) -> Result<Outcome> {
        let mut state = RetryState::new();
        loop {
            state.attempts += 1;
            let error = match self.attempt(&call).await {
                Ok(outcome) => {
                    if state.attempts > 1 {
                        debug!(
                            method = %call.descriptor.key(),
                            attempts = state.attempts,
                            "Call succeeded after retry"
                        );
                    }
                    return Ok(outcome);
                }
                Err(e) => e,
            };

            if !error.is_retryable() {
                return Err(error);
            }

            match self.policy.next_delay(&error, state.attempts) {
                Some(delay) => {
                    debug!(
                        method = %call.descriptor.key(),
                        attempt = state.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying call"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    // Wrap only if at least one retry actually happened;
                    // a first-attempt stop propagates the original error.
                    return Err(if state.attempts > 1 {
                        ClientError::OutOfRetries {
                            attempts: state.attempts,
                            source: Box::new(error),
                        }
                    } else {
                        error
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::HeaderMap;

    fn fault(status: u16, retry_after: Option<Duration>) -> ClientError {
        ClientError::HttpFault {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            retry_after,
        }
    }

    #[test]
    fn test_backoff_sequence_with_cap() {
        let config = RetryConfig {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
            multiplier: 1.5,
        };
        let err = fault(503, None);

        let delays: Vec<u64> = (1..=8)
            .map(|k| config.next_delay(&err, k).unwrap().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 150, 225, 337, 506, 759, 1000, 1000]);
    }

    #[test]
    fn test_stop_after_max_attempts() {
        let config = RetryConfig::new(3, Duration::from_millis(100));
        let err = fault(503, None);
        assert!(config.next_delay(&err, 1).is_some());
        assert!(config.next_delay(&err, 2).is_some());
        assert!(config.next_delay(&err, 3).is_none());
    }

    #[test]
    fn test_retry_after_overrides_backoff() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 1.5,
        };
        let err = fault(429, Some(Duration::from_millis(2000)));
        assert_eq!(
            config.next_delay(&err, 1),
            Some(Duration::from_millis(2000))
        );
    }

    #[test]
    fn test_retry_after_clamped_to_max_delay() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 1.5,
        };
        let err = fault(429, Some(Duration::from_secs(60)));
        assert_eq!(config.next_delay(&err, 1), Some(Duration::from_millis(500)));
    }
}
