//! Retry with jittered exponential backoff.
//!
//! Retry behavior lives in an explicit [`Retrier`] value constructed from
//! configuration and passed to whoever needs it, rather than being baked
//! into the transport. The retrier wraps any fallible async operation whose
//! error is [`ApiError`]; classification stays with the operation, policy
//! stays here.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::client::{ApiError, ApiResult};
use crate::shutdown::SharedShutdown;

/// Retry policy for transient API failures.
#[derive(Debug, Clone)]
pub struct Retrier {
    max_retries: u32,
    backoff_factor: f64,
    shutdown: Option<SharedShutdown>,
}

impl Retrier {
    /// Create a retrier making at most `max_retries` total attempts, with
    /// exponential backoff base `backoff_factor`.
    pub fn new(max_retries: u32, backoff_factor: f64) -> Self {
        Self {
            max_retries: max_retries.max(1),
            backoff_factor,
            shutdown: None,
        }
    }

    /// Attach a shutdown handle; backoff sleeps will race against it.
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Non-retryable errors return immediately. When attempts are exhausted
    /// the last retryable error is surfaced with the attempt count attached.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if let Some(shutdown) = &self.shutdown {
                if shutdown.is_shutdown_requested() {
                    return Err(ApiError::cancelled());
                }
            }

            match op().await {
                Ok(value) => return Ok(value),
                Err(error @ ApiError::NonRetryable { .. }) => {
                    debug!(label, %error, "permanent failure, not retrying");
                    return Err(error);
                }
                Err(error) => {
                    let is_last = attempt + 1 == self.max_retries;
                    if is_last {
                        last_error = Some(error);
                        break;
                    }

                    let wait = self.backoff_delay(attempt, &error);
                    warn!(
                        label,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        wait_ms = wait.as_millis() as u64,
                        %error,
                        "transient failure, backing off"
                    );
                    if !self.sleep(wait).await {
                        return Err(ApiError::cancelled());
                    }
                    last_error = Some(error);
                }
            }
        }

        let message = match last_error {
            Some(error) => format!(
                "{label} failed after {} attempts: {error}",
                self.max_retries
            ),
            None => format!("{label} failed after {} attempts", self.max_retries),
        };
        Err(ApiError::retryable(message))
    }

    /// Delay before the next attempt. A server-mandated `Retry-After` is
    /// honored verbatim; otherwise exponential backoff with uniform jitter
    /// in `[0.5, 1.5)`.
    fn backoff_delay(&self, attempt: u32, error: &ApiError) -> Duration {
        if let ApiError::Retryable {
            retry_after: Some(wait),
            ..
        } = error
        {
            return *wait;
        }

        let base = self.backoff_factor.powi(attempt as i32);
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(base * jitter)
    }

    /// Sleep for `wait`, racing the shutdown signal. Returns false when
    /// shutdown won.
    async fn sleep(&self, wait: Duration) -> bool {
        match &self.shutdown {
            Some(shutdown) => {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => true,
                    _ = shutdown.wait_for_shutdown() => false,
                }
            }
            None => {
                tokio::time::sleep(wait).await;
                true
            }
        }
    }
}
