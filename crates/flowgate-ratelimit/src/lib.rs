//! Flowgate Rate Limiting
//!
//! Token-bucket rate limiting keyed by caller identity, client IP or a
//! global scope, combined with the request path:
//! - [`TokenBucket`]: lazily refilled bucket
//! - [`RateLimiter`]: storage-agnostic limiter interface
//! - [`MemoryRateLimiter`]: single-process implementation
//! - Background cleanup of idle buckets

pub mod bucket;
pub mod cleanup;
pub mod config;
pub mod key;
pub mod limiter;

pub use bucket::TokenBucket;
pub use cleanup::spawn_cleanup_task;
pub use config::{RateLimitConfig, RateLimitError, StorageKind};
pub use key::{KeyScope, RateLimitKey};
pub use limiter::{MemoryRateLimiter, RateLimiter, create_rate_limiter};
