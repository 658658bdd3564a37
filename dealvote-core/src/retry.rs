use crate::error::CoreError;
use crate::error_utils::ErrorExt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts; `None` keeps retrying until success or a
    /// permanent error.
    pub max_attempts: Option<u32>,
    /// Base delay for exponential backoff (in milliseconds)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (in milliseconds)
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Maximum jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(3),
            base_delay_ms: 1000, // 1 second
            max_delay_ms: 30000, // 30 seconds
            backoff_multiplier: 2.0,
            jitter_factor: 0.1, // 10% jitter
        }
    }
}

impl RetryConfig {
    /// Create retry config tuned for Reddit API
    pub fn reddit() -> Self {
        Self {
            max_attempts: Some(3),
            base_delay_ms: 2000, // Start with 2 seconds for Reddit API
            max_delay_ms: 60000, // Max 1 minute delay
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// Retry strategy based on error type
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry with exponential backoff
    Retry,
    /// Retry after the delay the server asked for
    RetryWithDelay(Duration),
    /// Don't retry (for permanent failures)
    NoRetry,
}

/// Determine retry strategy based on error type
pub fn get_retry_strategy(error: &CoreError) -> RetryStrategy {
    if !error.is_retryable() {
        return RetryStrategy::NoRetry;
    }
    match error.retry_after() {
        Some(delay) => RetryStrategy::RetryWithDelay(delay),
        None => RetryStrategy::Retry,
    }
}

/// Calculate delay with exponential backoff and jitter
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let max_delay = Duration::from_millis(config.max_delay_ms);

    // Past ~30 doublings every realistic base is already at the cap.
    let exponent = attempt.min(30) as i32;
    let multiplier = config.backoff_multiplier.powi(exponent);
    let delay_ms = (config.base_delay_ms as f64 * multiplier) as u64;
    let exponential_delay = Duration::from_millis(delay_ms.min(config.max_delay_ms));

    let jitter_range = (exponential_delay.as_millis() as f64 * config.jitter_factor) as u64;
    let jitter = fastrand::u64(0..=jitter_range);
    let final_delay = exponential_delay + Duration::from_millis(jitter);

    final_delay.min(max_delay)
}

/// Returned when an operation never succeeded.
#[derive(Debug)]
pub struct RetryExhausted {
    pub attempts: u32,
    pub last_error: CoreError,
}

impl From<RetryExhausted> for CoreError {
    fn from(exhausted: RetryExhausted) -> Self {
        exhausted.last_error
    }
}

/// Retry executor that wraps operations with retry logic
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute an operation with retry logic
    pub async fn execute<F, Fut, T>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T, RetryExhausted>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        let mut total_delay_ms = 0u64;
        let mut attempt = 0u32;

        loop {
            if attempt > 0 {
                debug!("Retry attempt {} for {}", attempt, operation_name);
            }

            let start_time = Instant::now();
            let error = match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(
                            "Operation {} succeeded after {} retries (total delay: {}ms)",
                            operation_name, attempt, total_delay_ms
                        );
                    }
                    return Ok(result);
                }
                Err(error) => error,
            };

            attempt += 1;
            debug!(
                "Attempt {} failed for {} after {:?}: {}",
                attempt,
                operation_name,
                start_time.elapsed(),
                error
            );

            let attempts_left = self.config.max_attempts.map_or(true, |max| attempt < max);
            let delay = match get_retry_strategy(&error) {
                RetryStrategy::NoRetry => {
                    debug!(
                        "Not retrying {} due to error type: {}",
                        operation_name, error
                    );
                    None
                }
                _ if !attempts_left => {
                    debug!("Max retry attempts reached for {}", operation_name);
                    None
                }
                RetryStrategy::Retry => Some(calculate_delay(attempt - 1, &self.config)),
                RetryStrategy::RetryWithDelay(delay) => Some(delay),
            };

            let Some(delay) = delay else {
                warn!(
                    "Operation {} failed after {} attempts with total delay of {}ms: {}",
                    operation_name, attempt, total_delay_ms, error
                );
                return Err(RetryExhausted {
                    attempts: attempt,
                    last_error: error,
                });
            };

            total_delay_ms += delay.as_millis() as u64;
            info!(
                "Retrying {} in {:?} due to: {}",
                operation_name, delay, error
            );
            sleep(delay).await;
        }
    }
}
