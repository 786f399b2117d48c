//! Rate limiter interface and in-memory implementation
//!
//! [`RateLimiter`] is the storage-agnostic interface. [`MemoryRateLimiter`]
//! is the only implementation; a shared store (e.g. Redis) for multi-instance
//! deployments would implement the same trait and be selected in
//! [`create_rate_limiter`].

use async_trait::async_trait;
use dashmap::DashMap;
use flowgate_core::RateLimitRule;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::bucket::TokenBucket;
use crate::config::{RateLimitConfig, RateLimitError, StorageKind};

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Take one token from the bucket for `key`, creating it from `rule` if absent
    async fn allow(&self, key: &str, rule: &RateLimitRule) -> bool;

    /// [`RateLimiter::allow`] with the gateway-wide default rule
    async fn allow_default(&self, key: &str) -> bool {
        let rule = self.default_rule();
        self.allow(key, &rule).await
    }

    fn default_rule(&self) -> RateLimitRule;

    /// Drop idle buckets; returns how many were removed
    async fn cleanup(&self) -> usize;

    fn bucket_count(&self) -> usize;
}

/// Single-process limiter over a sharded map
///
/// Each check holds the shard lock for the whole refill-and-consume, so
/// token consumption for one key is strictly serialized.
#[derive(Debug)]
pub struct MemoryRateLimiter {
    buckets: DashMap<String, TokenBucket>,
    default_rule: RateLimitRule,
    idle_timeout: Duration,
}

impl MemoryRateLimiter {
    pub fn new(default_rule: RateLimitRule, idle_timeout: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            default_rule,
            idle_timeout,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.default_rule(), config.idle_timeout())
    }

    /// Synchronous check used by the async interface
    pub fn check(&self, key: &str, rule: &RateLimitRule) -> bool {
        let now = Instant::now();
        if let Some(mut bucket) = self.buckets.get_mut(key) {
            return bucket.try_acquire(now);
        }
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(rule, now))
            .try_acquire(now)
    }

    /// Remove buckets not refilled within the idle timeout
    pub fn remove_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.last_refill()) < self.idle_timeout);
        before.saturating_sub(self.buckets.len())
    }

    /// Current token count for a key, if a bucket exists
    pub fn tokens(&self, key: &str) -> Option<f64> {
        self.buckets.get(key).map(|b| b.tokens())
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn allow(&self, key: &str, rule: &RateLimitRule) -> bool {
        self.check(key, rule)
    }

    fn default_rule(&self) -> RateLimitRule {
        self.default_rule
    }

    async fn cleanup(&self) -> usize {
        self.remove_idle()
    }

    fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Build the limiter selected by `config.storage`
pub fn create_rate_limiter(
    config: &RateLimitConfig,
) -> Result<Arc<dyn RateLimiter>, RateLimitError> {
    config.validate()?;
    match config.storage {
        StorageKind::Memory => Ok(Arc::new(MemoryRateLimiter::from_config(config))),
        StorageKind::Redis => Err(RateLimitError::UnsupportedStorage("redis".to_string())),
    }
}
