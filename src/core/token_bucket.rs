use std::{sync::Arc, time::Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

/// Rate limit configuration for one routing config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained refill rate, tokens per second.
    pub requests_per_second: u32,
    /// Extra burst capacity above the sustained rate.
    pub burst_size: u32,
}

/// Token bucket for admission control.
///
/// Capacity is `requests_per_second + burst_size`; tokens refill continuously
/// at `requests_per_second` per second and are consumed one per admitted
/// request. Uses `parking_lot::Mutex` so concurrent callers can neither lose
/// nor double-grant tokens.
#[derive(Clone)]
pub struct TokenBucket {
    inner: Arc<Mutex<TokenBucketInner>>,
    capacity: f64,
    refill_rate: f64,
}

struct TokenBucketInner {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(requests_per_second: u32, burst_size: u32) -> Self {
        let capacity = (requests_per_second + burst_size) as f64;
        Self {
            inner: Arc::new(Mutex::new(TokenBucketInner {
                tokens: capacity,
                last_refill: Instant::now(),
            })),
            capacity,
            refill_rate: requests_per_second as f64,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_second, config.burst_size)
    }

    /// Admit one request if a token is available.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        self.refill(&mut inner);

        trace!("token bucket: {:.2} tokens available", inner.tokens);

        if inner.tokens >= 1.0 {
            inner.tokens -= 1.0;
            true
        } else {
            debug!("token bucket: request rejected, no tokens");
            false
        }
    }

    /// Current token count after refill (for tests and monitoring).
    pub fn available_tokens(&self) -> f64 {
        let mut inner = self.inner.lock();
        self.refill(&mut inner);
        inner.tokens
    }

    fn refill(&self, inner: &mut TokenBucketInner) {
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
        inner.tokens = (inner.tokens + elapsed * self.refill_rate).min(self.capacity);
        inner.last_refill = now;
    }
}

/// Per-routing-config rate limiter.
///
/// Buckets are created lazily from config and dropped when their config (or
/// its rate-limit policy) is removed. A config without a rate-limit policy is
/// never limited.
pub struct RateLimiter {
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Install a bucket for a config id, replacing any existing one.
    pub fn install(&self, config_id: &str, config: &RateLimitConfig) {
        debug!(
            config_id,
            rps = config.requests_per_second,
            burst = config.burst_size,
            "installed rate limit bucket"
        );
        self.buckets.insert(
            config_id.to_string(),
            Arc::new(TokenBucket::from_config(config)),
        );
    }

    /// Remove the bucket for a config id.
    pub fn remove(&self, config_id: &str) {
        self.buckets.remove(config_id);
    }

    /// Check admission for a config. Configs without a bucket are unlimited.
    pub fn allow(&self, config_id: &str) -> bool {
        match self.buckets.get(config_id) {
            Some(bucket) => bucket.allow(),
            None => true,
        }
    }

    pub fn get_bucket(&self, config_id: &str) -> Option<Arc<TokenBucket>> {
        self.buckets.get(config_id).map(|b| Arc::clone(b.value()))
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
