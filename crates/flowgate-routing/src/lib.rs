//! Flowgate Routing Engine
//!
//! This crate provides the routing core of the gateway:
//! - Circuit breakers, one per service
//! - Service registry with health snapshots
//! - Background health monitor
//! - Route matching and outgoing path rewrite

pub mod circuit_breaker;
pub mod health;
pub mod monitor;
pub mod registry;
pub mod router;

// Re-export commonly used types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState, SharedCircuitBreaker,
};
pub use health::{HealthMonitorConfig, HealthProbe, HttpHealthProbe, ProbeOutcome};
pub use monitor::{HealthMonitor, MonitorHandle};
pub use registry::ServiceRegistry;
pub use router::{RouteMatch, ServiceDirectory, normalize_path, rewrite_path};
