//! Error types for Flowgate Core

use thiserror::Error;

/// Why a service could not be resolved to a usable backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// No health probe has completed yet
    HealthUnknown,
    /// Last probe reported the service unhealthy or degraded
    Unhealthy,
    /// The circuit breaker is refusing attempts
    CircuitOpen,
}

impl std::fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnavailableReason::HealthUnknown => write!(f, "health not yet known"),
            UnavailableReason::Unhealthy => write!(f, "service unhealthy"),
            UnavailableReason::CircuitOpen => write!(f, "circuit open"),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Service '{service}' unavailable: {reason}")]
    ServiceUnavailable {
        service: String,
        reason: UnavailableReason,
    },

    #[error("No route for {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("Rate limit exceeded: retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Service '{service}' failed after {attempts} attempt(s): {last_error}")]
    UpstreamFailed {
        service: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
