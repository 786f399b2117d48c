//! Flowgate Core Types
//!
//! This crate provides the shared data model used throughout Flowgate:
//! - Service descriptors, route rules and rate-limit rules
//! - Service health snapshots
//! - Per-request context threaded through the pipeline
//! - Core error types

pub mod context;
pub mod error;
pub mod health;
pub mod service;

pub use context::{CallerIdentity, RequestContext};
pub use error::{Error, Result, UnavailableReason};
pub use health::{HealthStatus, ServiceHealth};
pub use service::{
    LoadBalancing, LoadBalancingStrategy, RateLimitRule, RouteRule, ServiceDescriptor,
    WILDCARD_METHOD,
};
