//! Flowgate Ingress
//!
//! The inbound HTTP surface of the gateway:
//! - request context, logging, metrics and CORS middleware
//! - the bearer-token auth gate
//! - the rate-limit gate
//! - the reverse proxy and catch-all dispatch
//! - router assembly

pub mod app;
pub mod auth;
pub mod middleware;
pub mod proxy;
pub mod rate_limit;
pub mod types;

pub use app::{GatewayState, build_router, gate_routes};
pub use auth::{AuthConfig, AuthError, AuthGate, JwtValidator, TokenValidator};
pub use middleware::{CorsConfig, client_ip};
pub use proxy::{
    DEFAULT_MAX_BODY_BYTES, ReverseProxy, RouteSelector, TargetService, dispatch, proxy,
};
pub use rate_limit::RateLimitGate;
pub use types::{IngressError, IngressResult};
