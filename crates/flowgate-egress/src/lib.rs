//! Flowgate Egress
//!
//! Everything on the upstream side of the proxy:
//! - pooled HTTP client construction
//! - the [`UpstreamTransport`] seam and its `reqwest` implementation
//! - the bounded retry loop used for every proxied request

pub mod client;
pub mod headers;
pub mod retry;
pub mod transport;

pub use client::{HttpClientConfig, create_client};
pub use headers::{filter_request_headers, filter_response_headers, is_hop_by_hop_header};
pub use retry::{Backoff, ForwardOutcome, Forwarder, LinearBackoff, NoBackoff};
pub use transport::{
    ReqwestTransport, TransportError, UpstreamRequest, UpstreamResponse, UpstreamTransport,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EgressError {
    #[error("HTTP client configuration error: {0}")]
    Config(String),

    #[error("Upstream request failed after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

pub type Result<T> = std::result::Result<T, EgressError>;
