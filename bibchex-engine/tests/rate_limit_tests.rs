//! Token bucket timing, on tokio's paused clock

use bibchex_engine::rate_limit::{RateLimitConfig, RateLimiter};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn limiter(capacity: u32, interval_secs: u64) -> RateLimiter {
    RateLimiter::new("test", RateLimitConfig::new(capacity, Duration::from_secs(interval_secs)))
}

#[tokio::test(start_paused = true)]
async fn test_wait_after_capacity_is_spent() {
    let limiter = limiter(3, 10);

    for _ in 0..3 {
        limiter.acquire().await;
    }
    let start = Instant::now();
    limiter.acquire().await;

    assert!(start.elapsed() >= Duration::from_secs(10));
    // Refill grants capacity minus the token just taken
    assert_eq!(limiter.available_tokens().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_drains_and_imposes_quiet_period() {
    let mut config = RateLimitConfig::new(10, Duration::from_secs(1));
    config.quiet_period = Duration::from_secs(30);
    let limiter = RateLimiter::new("test", config);

    limiter.acquire().await;
    limiter.backoff().await;
    assert_eq!(limiter.available_tokens().await, 0);

    let start = Instant::now();
    limiter.acquire().await;
    assert!(start.elapsed() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_degrades_interval() {
    let limiter = limiter(1, 2);

    limiter.backoff().await;
    assert_eq!(limiter.current_interval().await, Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_waiters_never_overdraw() {
    let limiter = Arc::new(limiter(2, 60));
    let start = Instant::now();

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move {
                limiter.acquire().await;
                Instant::now()
            })
        })
        .collect();

    let mut granted = Vec::new();
    for handle in handles {
        granted.push(handle.await.unwrap().duration_since(start));
    }
    granted.sort();

    // Two per interval: 0s, 0s, then one refill per elapsed interval
    assert_eq!(granted.iter().filter(|d| d.is_zero()).count(), 2);
    assert!(granted[2] >= Duration::from_secs(60));
    assert!(granted[4] >= Duration::from_secs(120));
}

#[tokio::test(start_paused = true)]
async fn test_limiters_are_independent() {
    let slow = limiter(1, 60);
    let fast = limiter(5, 1);

    slow.acquire().await;
    let start = Instant::now();
    for _ in 0..5 {
        fast.acquire().await;
    }
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(slow.available_tokens().await, 0);
}
