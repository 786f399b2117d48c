//! Shared ingress types and error mapping

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use flowgate_core::Error;
use thiserror::Error;

/// Correlation id, read from the client and echoed back
pub const HEADER_REQUEST_ID: &str = "x-request-id";
/// Correlation id as seen by backends
pub const HEADER_GATEWAY_REQUEST_ID: &str = "x-gateway-request-id";
pub const HEADER_FORWARDED_SERVICE: &str = "x-forwarded-service";
pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_USER_EMAIL: &str = "x-user-email";
pub const HEADER_GATEWAY_RESPONSE: &str = "x-gateway-response";
pub const HEADER_SERVICE_NAME: &str = "x-service-name";
pub const HEADER_RESPONSE_TIME: &str = "x-response-time";

/// Ingress error types
#[derive(Debug, Error)]
pub enum IngressError {
    /// A gateway-level failure from the core taxonomy
    #[error(transparent)]
    Gateway(#[from] Error),

    /// The inbound body could not be read
    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    /// The inbound body exceeded the configured size limit
    #[error("Request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
}

impl IngressError {
    pub fn status(&self) -> StatusCode {
        match self {
            IngressError::Gateway(err) => match err {
                Error::ServiceNotFound(_) | Error::ServiceUnavailable { .. } => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                Error::RouteNotFound { .. } => StatusCode::NOT_FOUND,
                Error::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
                Error::UpstreamFailed { .. } => StatusCode::BAD_GATEWAY,
                Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                Error::Config(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            IngressError::BodyRead(_) => StatusCode::BAD_REQUEST,
            IngressError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    /// Client-facing message; internal detail stays in the logs
    fn message(&self) -> String {
        match self {
            IngressError::Gateway(err) => match err {
                Error::ServiceNotFound(_) | Error::ServiceUnavailable { .. } => {
                    "Service unavailable".to_string()
                }
                Error::RouteNotFound { .. } => "Route not found".to_string(),
                Error::RateLimitExceeded { .. } => "Rate limit exceeded".to_string(),
                Error::UpstreamFailed { .. } => "Service request failed after retries".to_string(),
                Error::Unauthorized(msg) => msg.clone(),
                Error::Config(_) | Error::Internal(_) => "Internal server error".to_string(),
            },
            IngressError::BodyRead(_) => "Invalid request body".to_string(),
            IngressError::PayloadTooLarge { .. } => "Request body too large".to_string(),
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            IngressError::Gateway(err) => match err {
                Error::ServiceNotFound(_) | Error::ServiceUnavailable { .. } => {
                    "service_unavailable"
                }
                Error::RouteNotFound { .. } => "route_not_found",
                Error::RateLimitExceeded { .. } => "rate_limit_exceeded",
                Error::UpstreamFailed { .. } => "upstream_error",
                Error::Unauthorized(_) => "authentication_error",
                Error::Config(_) | Error::Internal(_) => "internal_error",
            },
            IngressError::BodyRead(_) | IngressError::PayloadTooLarge { .. } => {
                "invalid_request_error"
            }
        }
    }

    fn service(&self) -> Option<&str> {
        match self {
            IngressError::Gateway(
                Error::ServiceNotFound(service)
                | Error::ServiceUnavailable { service, .. }
                | Error::UpstreamFailed { service, .. },
            ) => Some(service),
            _ => None,
        }
    }

    fn retry_after_secs(&self) -> Option<u64> {
        match self {
            IngressError::Gateway(Error::RateLimitExceeded { retry_after_secs }) => {
                Some(*retry_after_secs)
            }
            _ => None,
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let status = self.status();

        let mut body = serde_json::json!({
            "error": {
                "message": self.message(),
                "type": self.error_type(),
                "code": status.as_u16(),
            }
        });
        if let Some(service) = self.service() {
            body["service"] = serde_json::Value::from(service);
        }
        let retry_after = self.retry_after_secs();
        if let Some(secs) = retry_after {
            body["retry_after"] = serde_json::Value::from(secs.to_string());
        }

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Ingress result type
pub type IngressResult<T> = Result<T, IngressError>;
