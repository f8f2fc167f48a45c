use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Copy)]
pub struct BucketConfig {
    pub capacity: f64,
    pub refill_rate: f64,
    pub burst: f64,
    pub cooldown_ms: u64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        BucketConfig { capacity: 30.0, refill_rate: 1.0, burst: 10.0, cooldown_ms: 100 }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BucketStats {
    pub available_tokens: f64,
    pub capacity: f64,
    pub refill_rate: f64,
    pub total_consumed: u64,
    pub total_rejected: u64,
    pub total_waited_ms: f64,
    pub rejection_rate: f64,
}

struct Inner {
    config: BucketConfig,
    tokens: f64,
    last_refill: Instant,
    last_consume: Option<Instant>,
    total_consumed: u64,
    total_rejected: u64,
    total_waited_ms: f64,
}

impl Inner {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.config.capacity + self.config.burst)
            .min(self.tokens + elapsed * self.config.refill_rate);
        self.last_refill = now;
    }

    fn try_consume(&mut self, tokens: f64) -> bool {
        self.refill();

        let now = Instant::now();
        if let Some(last) = self.last_consume {
            let elapsed_ms = now.saturating_duration_since(last).as_secs_f64() * 1000.0;
            if elapsed_ms < self.config.cooldown_ms as f64 {
                self.total_rejected += 1;
                return false;
            }
        }

        if self.tokens >= tokens {
            self.tokens -= tokens;
            self.last_consume = Some(now);
            self.total_consumed += 1;
            true
        } else {
            self.total_rejected += 1;
            false
        }
    }

    fn wait_time(&mut self, tokens: f64) -> f64 {
        self.refill();
        if self.tokens >= tokens {
            0.0
        } else if self.config.refill_rate > 0.0 {
            (tokens - self.tokens) / self.config.refill_rate
        } else {
            f64::INFINITY
        }
    }

    fn stats(&mut self) -> BucketStats {
        self.refill();
        let total = self.total_consumed + self.total_rejected;
        let rejection_rate = if total > 0 {
            (self.total_rejected as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        BucketStats {
            available_tokens: (self.tokens * 100.0).round() / 100.0,
            capacity: self.config.capacity,
            refill_rate: self.config.refill_rate,
            total_consumed: self.total_consumed,
            total_rejected: self.total_rejected,
            total_waited_ms: (self.total_waited_ms * 100.0).round() / 100.0,
            rejection_rate: (rejection_rate * 100.0).round() / 100.0,
        }
    }
}

/// A thread-safe token bucket. Cheap to clone — clones share the same
/// underlying state, which lets callers hold a handle across an `.await`
/// without holding the registry lock that produced it.
#[derive(Clone)]
pub struct TokenBucket {
    inner: Arc<Mutex<Inner>>,
}

impl TokenBucket {
    pub fn new(config: BucketConfig) -> Self {
        TokenBucket {
            inner: Arc::new(Mutex::new(Inner {
                tokens: config.capacity,
                config,
                last_refill: Instant::now(),
                last_consume: None,
                total_consumed: 0,
                total_rejected: 0,
                total_waited_ms: 0.0,
            })),
        }
    }

    pub fn clone_handle(&self) -> Self {
        self.clone()
    }

    pub fn try_consume(&self, tokens: f64) -> bool {
        self.inner.lock().try_consume(tokens)
    }

    /// Polls every 50ms (matching the source's blocking poll loop) until
    /// tokens are available or `timeout` elapses.
    pub async fn consume(&self, tokens: f64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let wait_start = Instant::now();
        loop {
            if self.try_consume(tokens) {
                let waited_ms = wait_start.elapsed().as_secs_f64() * 1000.0;
                self.inner.lock().total_waited_ms += waited_ms;
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub fn wait_time(&self, tokens: f64) -> f64 {
        self.inner.lock().wait_time(tokens)
    }

    pub fn available(&self) -> f64 {
        let mut inner = self.inner.lock();
        inner.refill();
        inner.tokens
    }

    pub fn stats(&self) -> BucketStats {
        self.inner.lock().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_bucket_starts_at_capacity_not_capacity_plus_burst() {
        let bucket = TokenBucket::new(BucketConfig { capacity: 10.0, refill_rate: 1.0, burst: 5.0, cooldown_ms: 0 });
        assert_eq!(bucket.available(), 10.0);
    }

    #[test]
    fn cooldown_rejects_rapid_successive_consumes() {
        let bucket = TokenBucket::new(BucketConfig { capacity: 10.0, refill_rate: 1.0, burst: 0.0, cooldown_ms: 1000 });
        assert!(bucket.try_consume(1.0));
        assert!(!bucket.try_consume(1.0));
    }

    #[test]
    fn never_exceeds_capacity_plus_burst_even_after_long_idle() {
        let mut inner = Inner {
            config: BucketConfig { capacity: 10.0, refill_rate: 100.0, burst: 5.0, cooldown_ms: 0 },
            tokens: 10.0,
            last_refill: Instant::now() - Duration::from_secs(3600),
            last_consume: None,
            total_consumed: 0,
            total_rejected: 0,
            total_waited_ms: 0.0,
        };
        inner.refill();
        assert_eq!(inner.tokens, 15.0);
    }
}
