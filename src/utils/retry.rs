//! Retry utilities with exponential backoff for resilient API calls.

use std::time::Duration;
use tokio::time::sleep;

use crate::api::GbifError;

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (first try included)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Configure from a retry count (attempts = retries + 1)
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_attempts = retries.saturating_add(1);
        self
    }

    /// Set the delay before the first retry
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the backoff multiplier
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powf(attempt.saturating_sub(1) as f64);
        Duration::from_secs_f64(exp_delay.min(self.max_delay.as_secs_f64()).max(0.0))
    }
}

/// Transient errors that should trigger a retry
#[derive(Debug, Clone, PartialEq)]
pub enum TransientError {
    /// Network connectivity issues
    Network,
    /// Rate limit exceeded (with optional retry-after seconds)
    RateLimit(Option<u64>),
    /// Server error (500/502/503/504)
    ServerError(u16),
    /// Request timeout
    Timeout,
}

impl TransientError {
    /// Check if a GbifError represents a transient error
    pub fn from_gbif_error(err: &GbifError) -> Option<Self> {
        if !err.is_transient() {
            return None;
        }
        match err {
            GbifError::RateLimit(retry_after) => Some(TransientError::RateLimit(*retry_after)),
            GbifError::Network(_) => Some(TransientError::Network),
            GbifError::Timeout(_) => Some(TransientError::Timeout),
            GbifError::Http { status, .. } => Some(TransientError::ServerError(*status)),
            _ => None,
        }
    }

    /// Minimum delay the server asked for, if any
    pub fn requested_delay(&self) -> Option<Duration> {
        match self {
            TransientError::RateLimit(Some(seconds)) => Some(Duration::from_secs(*seconds)),
            _ => None,
        }
    }
}

/// Execute an async operation with retry logic
///
/// Transient errors are retried up to `config.max_attempts` total attempts,
/// sleeping `initial_delay * multiplier^(n-1)` (capped at `max_delay`) after
/// the n-th failure. A server-requested Retry-After is honoured when longer,
/// still within `max_delay`. Permanent errors are returned immediately;
/// exhausting the attempts yields [`GbifError::RetriesExhausted`].
pub async fn with_retry<T, F, Fut>(config: RetryConfig, operation: F) -> Result<T, GbifError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, GbifError>>,
{
    let mut attempts = 0;
    let mut operation = operation;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    tracing::info!(
                        "Request succeeded on attempt {} after {} transient failures",
                        attempts,
                        attempts - 1
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                let Some(transient) = TransientError::from_gbif_error(&error) else {
                    return Err(error);
                };

                if attempts >= config.max_attempts {
                    tracing::warn!("Request failed after {} attempts: {}", attempts, error);
                    return Err(GbifError::RetriesExhausted {
                        attempts,
                        last: Box::new(error),
                    });
                }

                let mut delay = config.delay_for(attempts);
                if let Some(requested) = transient.requested_delay() {
                    delay = delay.max(requested.min(config.max_delay));
                }

                tracing::debug!(
                    "Transient error on attempt {}: {:?}, retrying in {:?}",
                    attempts,
                    transient,
                    delay
                );

                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn test_retry_success_first_try() {
        let call_count = Rc::new(RefCell::new(0));

        let result = {
            let call_count = call_count.clone();
            with_retry(RetryConfig::default(), move || {
                let call_count = call_count.clone();
                async move {
                    *call_count.borrow_mut() += 1;
                    Ok("success")
                }
            })
        }
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(*call_count.borrow(), 1);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let call_count = Rc::new(RefCell::new(0));

        let result = {
            let call_count = call_count.clone();
            with_retry(fast_config(4), move || {
                let call_count = call_count.clone();
                async move {
                    *call_count.borrow_mut() += 1;
                    let count = *call_count.borrow();
                    if count < 3 {
                        Err(GbifError::Http {
                            status: 503,
                            message: "Service Unavailable".to_string(),
                        })
                    } else {
                        Ok("success")
                    }
                }
            })
        }
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(*call_count.borrow(), 3);
    }

    #[tokio::test]
    async fn test_retry_returns_permanent_error() {
        let call_count = Rc::new(RefCell::new(0));

        let result: Result<&str, GbifError> = {
            let call_count = call_count.clone();
            with_retry(fast_config(5), move || {
                let call_count = call_count.clone();
                async move {
                    *call_count.borrow_mut() += 1;
                    Err(GbifError::Http {
                        status: 400,
                        message: "Bad Request".to_string(),
                    })
                }
            })
        }
        .await;

        assert!(matches!(result, Err(GbifError::Http { status: 400, .. })));
        assert_eq!(*call_count.borrow(), 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_wraps_last_error() {
        let call_count = Rc::new(RefCell::new(0));

        let result: Result<(), GbifError> = {
            let call_count = call_count.clone();
            with_retry(fast_config(3), move || {
                let call_count = call_count.clone();
                async move {
                    *call_count.borrow_mut() += 1;
                    Err(GbifError::RateLimit(None))
                }
            })
        }
        .await;

        match result {
            Err(GbifError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, GbifError::RateLimit(None)));
            }
            other => panic!("Expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(*call_count.borrow(), 3);
    }

    #[test]
    fn test_backoff_schedule() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        };

        assert_eq!(config.delay_for(1), Duration::from_secs(1));
        assert_eq!(config.delay_for(2), Duration::from_secs(2));
        assert_eq!(config.delay_for(3), Duration::from_secs(4));
        assert_eq!(config.delay_for(4), Duration::from_secs(5));
    }

    #[test]
    fn test_max_retries_counts_first_attempt() {
        assert_eq!(RetryConfig::default().max_retries(3).max_attempts, 4);
        assert_eq!(RetryConfig::default().max_retries(0).max_attempts, 1);
    }

    #[test]
    fn test_transient_error_detection() {
        assert_eq!(
            TransientError::from_gbif_error(&GbifError::RateLimit(Some(30))),
            Some(TransientError::RateLimit(Some(30)))
        );
        assert_eq!(
            TransientError::from_gbif_error(&GbifError::Network("refused".to_string())),
            Some(TransientError::Network)
        );
        assert_eq!(
            TransientError::from_gbif_error(&GbifError::Http {
                status: 502,
                message: String::new()
            }),
            Some(TransientError::ServerError(502))
        );
        assert!(
            TransientError::from_gbif_error(&GbifError::Parse("invalid json".to_string()))
                .is_none()
        );
    }

    #[test]
    fn test_requested_delay() {
        assert_eq!(
            TransientError::RateLimit(Some(30)).requested_delay(),
            Some(Duration::from_secs(30))
        );
        assert_eq!(TransientError::RateLimit(None).requested_delay(), None);
        assert_eq!(TransientError::Network.requested_delay(), None);
    }
}
