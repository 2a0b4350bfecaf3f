//! Token-bucket rate limiter for API requests.
//!
//! One limiter is shared across every request the engine makes, including
//! concurrent item fan-out, so the aggregate request rate never exceeds the
//! configured budget regardless of concurrency.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// How long a waiter sleeps between token checks.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter.
///
/// Capacity equals the configured requests per second; tokens refill lazily
/// at `rate` per second and are capped at the capacity, so an idle period
/// buys at most one second's worth of burst.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    state: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter allowing `rate` requests per second. Starts full.
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            state: Mutex::new(Bucket {
                tokens: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Acquire one token, suspending until one is available. Never fails.
    pub async fn acquire(&self) {
        loop {
            {
                let mut bucket = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.rate);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                trace!(tokens = bucket.tokens, "rate limit reached, waiting");
            }
            // Lock released before sleeping so other waiters can refill.
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Current token count, refreshed to now.
    pub async fn available(&self) -> f64 {
        let mut bucket = self.state.lock().await;
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.rate);
        bucket.last_refill = now;
        bucket.tokens
    }
}
