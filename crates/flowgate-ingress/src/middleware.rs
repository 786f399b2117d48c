//! Shared ingress middleware

use crate::proxy::TargetService;
use crate::types::{HEADER_REQUEST_ID, HEADER_RESPONSE_TIME};
use axum::{
    extract::{ConnectInfo, MatchedPath, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, header},
    middleware::Next,
    response::Response,
};
use flowgate_core::{CallerIdentity, RequestContext};
use flowgate_observability::Metrics;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer, ExposeHeaders};

/// Client address: first `X-Forwarded-For` entry, then `X-Real-IP`, then the peer
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = real_ip {
        return Some(ip.to_string());
    }

    peer.map(|addr| addr.ip().to_string())
}

/// Attach a [`RequestContext`] and echo the correlation id on the response
///
/// An inbound `X-Request-ID` is reused; otherwise a UUID is generated.
pub async fn request_context_middleware(mut req: Request, next: Next) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let inbound_id = req
        .headers()
        .get(HEADER_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty());

    let mut context = match inbound_id {
        Some(id) => RequestContext::new(id),
        None => RequestContext::generate(),
    };
    context.client_ip = client_ip(req.headers(), peer);

    let request_id = context.correlation_id.clone();
    req.extensions_mut().insert(context);

    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(HEADER_REQUEST_ID, value);
    }

    response
}

/// One structured line per request, level chosen by status
pub async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let context = req
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_default();

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as u64;
    let client_ip = context.client_ip.as_deref().unwrap_or("");
    let service = response
        .extensions()
        .get::<TargetService>()
        .map(|t| t.name.as_str())
        .unwrap_or("");
    let user_id = response
        .extensions()
        .get::<CallerIdentity>()
        .map(|c| c.subject_id.as_str())
        .unwrap_or("");

    macro_rules! log_request {
        ($level:ident) => {
            tracing::$level!(
                client_ip,
                method = %method,
                path = %path,
                status,
                latency_ms,
                user_agent = %user_agent,
                request_id = %context.correlation_id,
                service,
                user_id,
                "Request completed"
            )
        };
    }

    match status {
        500.. => log_request!(error),
        400..=499 => log_request!(warn),
        _ => log_request!(info),
    }

    response
}

/// Request counters, latency histogram and `X-Response-Time`
///
/// The path label is the matched route prefix for proxied requests, the
/// axum route for gateway endpoints, and `unmatched` otherwise.
pub async fn metrics_middleware(
    State(metrics): State<Arc<Metrics>>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().as_str().to_string();
    let matched_path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string());

    metrics.request_started();
    let mut response = next.run(req).await;
    metrics.request_finished();

    let elapsed = start.elapsed();
    let (service, path) = match response.extensions().get::<TargetService>() {
        Some(target) => (target.name.clone(), target.route.clone()),
        None => (
            "gateway".to_string(),
            matched_path.unwrap_or_else(|| "unmatched".to_string()),
        ),
    };
    metrics.record_request(
        &service,
        &method,
        &path,
        response.status().as_u16(),
        elapsed.as_secs_f64(),
    );

    if let Ok(value) = HeaderValue::from_str(&format!("{}ms", elapsed.as_millis())) {
        response.headers_mut().insert(HEADER_RESPONSE_TIME, value);
    }

    response
}

fn default_allowed_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:8080".to_string(),
    ]
}

fn default_allowed_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}

fn default_allowed_headers() -> Vec<String> {
    ["Origin", "Content-Type", "Accept", "Authorization", "X-Request-ID"]
        .iter()
        .map(|h| h.to_string())
        .collect()
}

fn default_exposed_headers() -> Vec<String> {
    ["Content-Length", "X-Request-ID", "X-Response-Time"]
        .iter()
        .map(|h| h.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_max_age_secs() -> u64 {
    12 * 3600
}

/// CORS policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Exact origins, or `*` for any (not allowed with credentials)
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,

    #[serde(default = "default_allowed_headers")]
    pub allowed_headers: Vec<String>,

    #[serde(default = "default_exposed_headers")]
    pub exposed_headers: Vec<String>,

    #[serde(default = "default_true")]
    pub allow_credentials: bool,

    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            allowed_methods: default_allowed_methods(),
            allowed_headers: default_allowed_headers(),
            exposed_headers: default_exposed_headers(),
            allow_credentials: true,
            max_age_secs: default_max_age_secs(),
        }
    }
}

fn is_wildcard(values: &[String]) -> bool {
    values.iter().any(|v| v == "*")
}

impl CorsConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.allow_credentials
            && (is_wildcard(&self.allowed_origins)
                || is_wildcard(&self.allowed_methods)
                || is_wildcard(&self.allowed_headers)
                || is_wildcard(&self.exposed_headers))
        {
            return Err("CORS wildcards cannot be combined with allow_credentials".to_string());
        }
        self.layer().map(|_| ())
    }

    /// Build the `tower-http` layer
    pub fn layer(&self) -> Result<CorsLayer, String> {
        let origins = if is_wildcard(&self.allowed_origins) {
            AllowOrigin::any()
        } else {
            let origins = self
                .allowed_origins
                .iter()
                .map(|o| {
                    HeaderValue::from_str(o).map_err(|_| format!("Invalid CORS origin: {}", o))
                })
                .collect::<Result<Vec<_>, _>>()?;
            AllowOrigin::list(origins)
        };

        let methods = if is_wildcard(&self.allowed_methods) {
            AllowMethods::any()
        } else {
            let methods = self
                .allowed_methods
                .iter()
                .map(|m| {
                    Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                        .map_err(|_| format!("Invalid CORS method: {}", m))
                })
                .collect::<Result<Vec<_>, _>>()?;
            AllowMethods::list(methods)
        };

        let headers = if is_wildcard(&self.allowed_headers) {
            AllowHeaders::any()
        } else {
            AllowHeaders::list(parse_header_names(&self.allowed_headers)?)
        };

        let exposed = if is_wildcard(&self.exposed_headers) {
            ExposeHeaders::any()
        } else {
            ExposeHeaders::list(parse_header_names(&self.exposed_headers)?)
        };

        Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
            .expose_headers(exposed)
            .allow_credentials(self.allow_credentials)
            .max_age(Duration::from_secs(self.max_age_secs)))
    }
}

fn parse_header_names(names: &[String]) -> Result<Vec<HeaderName>, String> {
    names
        .iter()
        .map(|h| HeaderName::from_bytes(h.as_bytes()).map_err(|_| format!("Invalid CORS header: {}", h)))
        .collect()
}
