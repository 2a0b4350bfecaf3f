//! Pacing behavior of the shared token bucket.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arp_ingest::client::rate_limit::RateLimiter;

#[tokio::test]
async fn test_limiter_paces_beyond_the_initial_burst() {
    let limiter = RateLimiter::new(5.0);
    let start = Instant::now();

    // Five tokens of burst, then one more that must wait for refill.
    for _ in 0..6 {
        limiter.acquire().await;
    }

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(150), "sixth acquire too fast: {elapsed:?}");
}

#[tokio::test]
async fn test_limiter_is_shared_across_tasks() {
    let limiter = Arc::new(RateLimiter::new(4.0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            limiter.acquire().await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Eight acquisitions at 4/s: the burst covers four, the rest need about
    // a second of refill between them.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(700), "aggregate rate exceeded: {elapsed:?}");
}

#[tokio::test]
async fn test_idle_time_does_not_accumulate_beyond_capacity() {
    let limiter = RateLimiter::new(2.0);
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(limiter.available().await <= 2.0);
}
