//! Rate limiter configuration

use flowgate_core::RateLimitRule;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

fn default_true() -> bool {
    true
}

fn default_requests_per_min() -> u32 {
    60
}

fn default_burst_size() -> u32 {
    10
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

fn default_idle_timeout_secs() -> u64 {
    600
}

/// Bucket storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// In-process buckets
    #[default]
    Memory,
    /// Shared store across gateway instances; not implemented
    Redis,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("Rate limiter storage '{0}' is not supported")]
    UnsupportedStorage(String),

    #[error("Invalid rate limit configuration: {0}")]
    InvalidConfig(String),
}

/// Gateway-wide rate limiting settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub storage: StorageKind,

    /// Default sustained rate
    #[serde(default = "default_requests_per_min")]
    pub requests_per_min: u32,

    /// Default bucket capacity
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,

    /// Key by client IP when no caller identity applies
    #[serde(default = "default_true")]
    pub by_ip: bool,

    /// Key by authenticated caller when known
    #[serde(default = "default_true")]
    pub by_user: bool,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Buckets untouched for this long are dropped by cleanup
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage: StorageKind::Memory,
            requests_per_min: default_requests_per_min(),
            burst_size: default_burst_size(),
            by_ip: true,
            by_user: true,
            cleanup_interval_secs: default_cleanup_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl RateLimitConfig {
    /// Rule applied when neither route nor service overrides one
    pub fn default_rule(&self) -> RateLimitRule {
        RateLimitRule::new(self.requests_per_min, self.burst_size)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), RateLimitError> {
        if self.requests_per_min == 0 {
            return Err(RateLimitError::InvalidConfig(
                "requests_per_min must be greater than 0".to_string(),
            ));
        }
        if self.burst_size == 0 {
            return Err(RateLimitError::InvalidConfig(
                "burst_size must be greater than 0".to_string(),
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(RateLimitError::InvalidConfig(
                "cleanup_interval_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
