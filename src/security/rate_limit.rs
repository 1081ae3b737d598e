//! Token-bucket rate limiter and jittered backoff.
//!
//! Invariant: `tokens` stays in `[0, capacity]` after any sequence of
//! operations. Buckets start empty by default; `start_full` grants a full
//! bucket so the first `allow()` succeeds.

use std::time::Instant;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Tokens refilled per second.
    pub rate: f64,
    pub capacity: u32,
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(rate: f64, capacity: u32, start_full: bool) -> Self {
        Self {
            rate,
            capacity,
            tokens: if start_full { capacity as f64 } else { 0.0 },
            last_refill: Instant::now(),
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity as f64);
        self.last_refill = now;
    }

    /// Consume one token if available.
    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Clock-injected variant; `allow()` delegates here.
    pub fn allow_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Exponential backoff with multiplicative jitter in `[0.5, 1.0)`.
pub fn backoff_with_jitter(attempt: u32, base_sec: f64, max_sec: f64) -> f64 {
    let sec = (base_sec * 2f64.powi(attempt as i32)).min(max_sec);
    sec * (0.5 + rand::thread_rng().gen::<f64>() * 0.5)
}
