//! Token bucket
//!
//! Refilled lazily on access in proportion to elapsed time; there is no
//! per-bucket ticker. The token count always stays within `[0, max_tokens]`.

use flowgate_core::RateLimitRule;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    max_tokens: f64,
    /// Tokens per second
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Full bucket sized by `rule`
    pub fn new(rule: &RateLimitRule, now: Instant) -> Self {
        let max_tokens = f64::from(rule.burst_size);
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate: rule.refill_per_sec(),
            last_refill: now,
        }
    }

    /// Top up for the time elapsed since the last refill
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = self.last_refill.max(now);
    }

    /// Refill, then take one token if available
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn max_tokens(&self) -> f64 {
        self.max_tokens
    }

    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }
}
