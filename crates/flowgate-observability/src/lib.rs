//! Flowgate Observability
//!
//! This crate provides observability features:
//! - Metrics collection (Prometheus)
//! - Structured logging setup
//! - Health and metrics endpoints

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::{
    health_router, GatewayHealthResponse, HealthState, OverallStatus, ServiceStatus,
    ServiceStatusSource,
};
pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{CircuitBreakerState, Metrics};
