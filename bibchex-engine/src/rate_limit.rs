//! Per-source token bucket with adaptive backoff
//!
//! Every upstream rate-limit domain owns one [`RateLimiter`]; limiters never
//! share state. `acquire()` only ever delays, it cannot fail.

use bibchex_common::config::{duration_from_secs, RateLimitOverrides};
use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Ceiling for a degraded refill interval
pub const MAX_DEGRADED_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Token bucket parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Tokens available per refill
    pub capacity: u32,
    /// Refill interval
    pub interval: Duration,
    /// Quiet period imposed by `backoff()`
    pub quiet_period: Duration,
    /// Interval multiplier applied per `backoff()`
    pub degrade_factor: f64,
    /// Maximum number of interval degradations
    pub max_degradations: u32,
    /// Upper bound of the random slack added to each wait
    pub jitter: Duration,
}

impl RateLimitConfig {
    pub fn new(capacity: u32, interval: Duration) -> Self {
        Self {
            capacity,
            interval,
            quiet_period: Duration::from_secs(10),
            degrade_factor: 1.5,
            max_degradations: 5,
            jitter: Duration::from_millis(50),
        }
    }

    /// Apply the overrides from a `[sources.<source>.rate_limit]` section
    ///
    /// Invalid values (zero capacity, non-finite seconds, a degrade factor
    /// out of range) are configuration errors.
    pub fn with_overrides(mut self, source: &str, overrides: &RateLimitOverrides) -> bibchex_common::Result<Self> {
        overrides.validate(source)?;
        if let Some(capacity) = overrides.capacity {
            self.capacity = capacity;
        }
        if let Some(secs) = overrides.interval_secs {
            self.interval = duration_from_secs("interval_secs", secs)?;
        }
        if let Some(secs) = overrides.quiet_period_secs {
            self.quiet_period = duration_from_secs("quiet_period_secs", secs)?;
        }
        if let Some(factor) = overrides.degrade_factor {
            self.degrade_factor = factor;
        }
        if let Some(max) = overrides.max_degradations {
            self.max_degradations = max;
        }
        Ok(self)
    }
}

impl Default for RateLimitConfig {
    /// 100 requests per minute
    fn default() -> Self {
        Self::new(100, Duration::from_secs(60))
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: u32,
    last_refill: Instant,
    interval: Duration,
    quiet_until: Option<Instant>,
    degradations: u32,
}

/// Async token bucket
///
/// State sits behind a tokio mutex that is never held across a sleep, so
/// tokens stay non-negative and at most one refill happens per elapsed
/// interval no matter how many tasks are waiting.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Create a full bucket
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        let state = BucketState {
            tokens: config.capacity,
            last_refill: Instant::now(),
            interval: config.interval,
            quiet_until: None,
            degradations: 0,
        };
        Self {
            name: name.into(),
            config,
            state: Mutex::new(state),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until a token is available, then consume it
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();

                match state.quiet_until {
                    Some(until) if now < until => Some(until - now),
                    _ => {
                        state.quiet_until = None;
                        if state.tokens > 0 {
                            state.tokens -= 1;
                            None
                        } else {
                            let elapsed = now.duration_since(state.last_refill);
                            if elapsed >= state.interval {
                                state.tokens = self.config.capacity.saturating_sub(1);
                                state.last_refill = now;
                                None
                            } else {
                                Some((state.interval - elapsed).saturating_add(self.jitter()))
                            }
                        }
                    }
                }
            };

            match wait {
                None => return,
                Some(delay) => {
                    debug!(source = %self.name, delay_ms = delay.as_millis() as u64, "Rate limiting: waiting");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// React to an upstream throttling signal
    ///
    /// Drains the bucket, imposes the quiet period and slows the refill
    /// interval unless the degradation limit is reached.
    pub async fn backoff(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        state.tokens = 0;
        state.quiet_until = now
            .checked_add(self.config.quiet_period)
            .or_else(|| now.checked_add(MAX_DEGRADED_INTERVAL));

        if state.degradations < self.config.max_degradations {
            state.degradations += 1;
            state.interval = degrade(state.interval, self.config.degrade_factor);
        }

        warn!(
            source = %self.name,
            quiet_secs = self.config.quiet_period.as_secs_f64(),
            interval_secs = state.interval.as_secs_f64(),
            degradations = state.degradations,
            "Upstream throttling, backing off"
        );
    }

    /// Tokens left in the current interval
    pub async fn available_tokens(&self) -> u32 {
        self.state.lock().await.tokens
    }

    /// Refill interval after any degradations
    pub async fn current_interval(&self) -> Duration {
        self.state.lock().await.interval
    }

    /// Random slack in the upper half of the configured jitter
    fn jitter(&self) -> Duration {
        let max = self.config.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(max / 2..=max))
    }
}

/// Slow an interval down by `factor`, saturating at [`MAX_DEGRADED_INTERVAL`]
///
/// Never shortens the interval, whatever the factor.
fn degrade(interval: Duration, factor: f64) -> Duration {
    if interval >= MAX_DEGRADED_INTERVAL {
        return interval;
    }
    Duration::try_from_secs_f64(interval.as_secs_f64() * factor)
        .unwrap_or(MAX_DEGRADED_INTERVAL)
        .clamp(interval, MAX_DEGRADED_INTERVAL)
}
