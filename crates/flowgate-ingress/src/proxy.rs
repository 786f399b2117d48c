//! Reverse proxy
//!
//! Per request: resolve a healthy target, match a route, rewrite the path,
//! propagate the request context as headers, and deliver through the retry
//! loop. Failures map to 503, 404 or 502 without leaking upstream detail.

use crate::app::GatewayState;
use crate::types::{
    HEADER_FORWARDED_SERVICE, HEADER_GATEWAY_REQUEST_ID, HEADER_GATEWAY_RESPONSE,
    HEADER_SERVICE_NAME, HEADER_USER_EMAIL, HEADER_USER_ID, IngressError, IngressResult,
};
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header::CONTENT_LENGTH},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{MethodRouter, any},
};
use flowgate_core::{Error, RequestContext};
use flowgate_egress::{
    EgressError, Forwarder, UpstreamRequest, UpstreamResponse, filter_request_headers,
    filter_response_headers,
};
use flowgate_observability::Metrics;
use flowgate_routing::{RouteMatch, ServiceRegistry, normalize_path, rewrite_path};
use http_body_util::LengthLimitError;
use std::sync::Arc;
use tracing::{debug, warn};

/// Largest request body buffered for forwarding unless configured otherwise
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Which service (and route prefix) produced a response
///
/// Set as a response extension for the logging and metrics middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetService {
    pub name: String,
    pub route: String,
}

pub struct ReverseProxy {
    registry: Arc<ServiceRegistry>,
    forwarder: Forwarder,
    metrics: Arc<Metrics>,
    api_prefix: String,
    max_body_bytes: usize,
}

impl ReverseProxy {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        forwarder: Forwarder,
        metrics: Arc<Metrics>,
        api_prefix: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            forwarder,
            metrics,
            api_prefix: api_prefix.into(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Proxy `req` to the named service
    pub async fn handle(&self, service: &str, req: Request) -> Response {
        let mut route_label = None;
        let mut response = match self.forward(service, req, &mut route_label).await {
            Ok(response) => response,
            Err(e) => {
                warn!(service, error = %e, "Proxy request failed");
                e.into_response()
            }
        };

        response.extensions_mut().insert(TargetService {
            name: service.to_string(),
            route: route_label.unwrap_or_else(|| "unmatched".to_string()),
        });
        response
    }

    async fn forward(
        &self,
        service: &str,
        req: Request,
        route_label: &mut Option<String>,
    ) -> IngressResult<Response> {
        let descriptor = self.registry.resolve_healthy(service)?;

        let method = req.method().clone();
        let full_path = req.uri().path().to_string();
        let route = normalize_path(&full_path, &self.api_prefix)
            .and_then(|relative| descriptor.match_route(method.as_str(), relative))
            .ok_or_else(|| Error::RouteNotFound {
                method: method.to_string(),
                path: full_path.clone(),
            })?;
        *route_label = Some(route.path.clone());

        let mut target = rewrite_path(&descriptor, route, &full_path, &self.api_prefix);
        if let Some(query) = req.uri().query() {
            target.push('?');
            target.push_str(query);
        }
        let url = format!("{}{}", descriptor.base_url.trim_end_matches('/'), target);
        let timeout = descriptor.effective_timeout(Some(route));

        let context = req
            .extensions()
            .get::<RequestContext>()
            .cloned()
            .unwrap_or_default();
        let mut headers = filter_request_headers(req.headers());
        propagate_context(&mut headers, &descriptor.name, &context);

        let body = read_body(req, self.max_body_bytes).await?;

        debug!(
            service,
            method = %method,
            path = %full_path,
            url = %url,
            timeout_ms = timeout.as_millis() as u64,
            request_id = %context.correlation_id,
            "Forwarding request"
        );

        let request = UpstreamRequest::new(method, url, timeout)
            .with_headers(headers)
            .with_body(body);

        match self.forwarder.forward(&request, descriptor.attempts()).await {
            Ok(outcome) => {
                self.record_retries(service, outcome.retries());
                Ok(relay_response(outcome.response, &descriptor.name))
            }
            Err(EgressError::Exhausted {
                attempts,
                last_error,
            }) => {
                self.record_retries(service, attempts.saturating_sub(1));
                Err(Error::UpstreamFailed {
                    service: service.to_string(),
                    attempts,
                    last_error,
                }
                .into())
            }
            Err(e) => Err(Error::Internal(e.to_string()).into()),
        }
    }

    fn record_retries(&self, service: &str, retries: u32) {
        for _ in 0..retries {
            self.metrics.record_retry(service);
        }
    }
}

/// Buffer the request body, refusing anything over `limit` bytes
async fn read_body(req: Request, limit: usize) -> IngressResult<Bytes> {
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        return Err(IngressError::PayloadTooLarge { limit });
    }

    axum::body::to_bytes(req.into_body(), limit)
        .await
        .map_err(|e| {
            let over_limit = std::error::Error::source(&e)
                .is_some_and(|source| source.is::<LengthLimitError>());
            if over_limit {
                IngressError::PayloadTooLarge { limit }
            } else {
                IngressError::BodyRead(e.to_string())
            }
        })
}

/// Replace any client-supplied identity headers with the gateway's own
///
/// Values that are not valid header values are skipped.
fn propagate_context(headers: &mut HeaderMap, service: &str, context: &RequestContext) {
    for name in [
        HEADER_FORWARDED_SERVICE,
        HEADER_GATEWAY_REQUEST_ID,
        HEADER_USER_ID,
        HEADER_USER_EMAIL,
    ] {
        headers.remove(name);
    }

    let values = [
        (HEADER_FORWARDED_SERVICE, Some(service)),
        (
            HEADER_GATEWAY_REQUEST_ID,
            Some(context.correlation_id.as_str()).filter(|id| !id.is_empty()),
        ),
        (HEADER_USER_ID, context.caller_id.as_deref()),
        (HEADER_USER_EMAIL, context.caller_email.as_deref()),
    ];
    for (name, value) in values {
        if let Some(value) = value
            && let Ok(value) = HeaderValue::from_str(value)
        {
            headers.insert(name, value);
        }
    }
}

fn relay_response(upstream: UpstreamResponse, service: &str) -> Response {
    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;
    *response.headers_mut() = filter_response_headers(&upstream.headers);

    let headers = response.headers_mut();
    headers.insert(HEADER_GATEWAY_RESPONSE, HeaderValue::from_static("true"));
    if let Ok(value) = HeaderValue::from_str(service) {
        headers.insert(HEADER_SERVICE_NAME, value);
    }
    response
}

/// How a gated router finds the service behind a request
#[derive(Debug, Clone)]
pub enum RouteSelector {
    /// Scan the ordered service table
    Directory,
    /// A single service mounted with [`proxy`]
    Service(Arc<str>),
}

impl RouteSelector {
    pub fn service(name: impl Into<String>) -> Self {
        RouteSelector::Service(Arc::from(name.into()))
    }
}

/// Resolve the target once and store the [`RouteMatch`] as a request extension
///
/// The gates and [`dispatch`] read the stored match instead of resolving again.
pub async fn select_route_middleware(
    State((state, selector)): State<(GatewayState, RouteSelector)>,
    mut req: Request,
    next: Next,
) -> Response {
    let method = req.method().as_str();
    let path = req.uri().path();
    let matched = match &selector {
        RouteSelector::Directory => state.directory.resolve(method, path),
        RouteSelector::Service(name) => state.directory.resolve_in(name, method, path),
    };
    if let Some(matched) = matched {
        req.extensions_mut().insert(matched);
    }
    next.run(req).await
}

/// Catch-all handler: pick the service from the route table, then proxy
pub async fn dispatch(State(state): State<GatewayState>, req: Request) -> Response {
    let matched = match req.extensions().get::<RouteMatch>() {
        Some(matched) => Some(matched.clone()),
        None => state
            .directory
            .resolve(req.method().as_str(), req.uri().path()),
    };

    match matched {
        Some(m) => state.proxy.handle(&m.service.name, req).await,
        None => IngressError::from(Error::RouteNotFound {
            method: req.method().to_string(),
            path: req.uri().path().to_string(),
        })
        .into_response(),
    }
}

/// Handler bound to one service, for mounting a service explicitly
pub fn proxy(service: impl Into<String>) -> MethodRouter<GatewayState> {
    let service: Arc<str> = Arc::from(service.into());
    any(move |State(state): State<GatewayState>, req: Request| {
        let service = Arc::clone(&service);
        async move { state.proxy.handle(&service, req).await }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use flowgate_core::{RouteRule, ServiceDescriptor};
    use flowgate_egress::{HttpClientConfig, NoBackoff, ReqwestTransport};
    use flowgate_routing::{CircuitBreakerConfig, ProbeOutcome};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mark_healthy(registry: &ServiceRegistry, name: &str) {
        let breaker = registry.circuit(name).unwrap();
        registry.record_probe(name, &breaker, &ProbeOutcome::success(Duration::from_millis(1)));
    }

    fn proxy_for(descriptor: ServiceDescriptor, healthy: bool) -> (ReverseProxy, Arc<Metrics>) {
        let registry = Arc::new(ServiceRegistry::new(CircuitBreakerConfig::default()));
        let name = descriptor.name.clone();
        registry.register(descriptor);
        if healthy {
            mark_healthy(&registry, &name);
        }

        let transport = ReqwestTransport::new(&HttpClientConfig::default()).unwrap();
        let forwarder = Forwarder::new(Arc::new(transport)).with_backoff(Arc::new(NoBackoff));
        let metrics = Arc::new(Metrics::new().unwrap());
        (
            ReverseProxy::new(registry, forwarder, metrics.clone(), "/api/v1"),
            metrics,
        )
    }

    fn request(method: &str, uri: &str, ctx: RequestContext) -> Request {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user-id", "spoofed")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(ctx);
        req
    }

    #[tokio::test]
    async fn test_unhealthy_service_returns_503_without_contact() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let service = ServiceDescriptor::new("flowtime", server.uri())
            .with_route(RouteRule::prefix("/tasks"));
        let (proxy, _) = proxy_for(service, false);

        let response = proxy
            .handle("flowtime", request("GET", "/api/v1/tasks", RequestContext::generate()))
            .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.extensions().get::<TargetService>().unwrap().route,
            "unmatched"
        );
    }

    #[tokio::test]
    async fn test_rewrites_and_propagates_context() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/energy/today"))
            .and(query_param("tz", "UTC"))
            .and(header("x-forwarded-service", "flowtime"))
            .and(header("x-gateway-request-id", "req-9"))
            .and(header("x-user-id", "u-7"))
            .and(header("x-user-email", "u7@example.com"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-backend", "1")
                    .set_body_string("ok"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let service = ServiceDescriptor::new("flowtime", server.uri())
            .with_route(RouteRule::prefix("/energy").with_target_path("/v2/energy"));
        let (proxy, _) = proxy_for(service, true);

        let mut ctx = RequestContext::new("req-9");
        ctx.caller_id = Some("u-7".to_string());
        ctx.caller_email = Some("u7@example.com".to_string());

        let response = proxy
            .handle("flowtime", request("GET", "/api/v1/energy/today?tz=UTC", ctx))
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get("x-gateway-response").unwrap(), "true");
        assert_eq!(response.headers().get("x-service-name").unwrap(), "flowtime");
        assert_eq!(response.headers().get("x-backend").unwrap(), "1");
        assert_eq!(
            response.extensions().get::<TargetService>().unwrap(),
            &TargetService {
                name: "flowtime".to_string(),
                route: "/energy".to_string()
            }
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"ok");
    }

    #[tokio::test]
    async fn test_unknown_route_in_service_is_404() {
        let server = MockServer::start().await;
        let service = ServiceDescriptor::new("flowtime", server.uri())
            .with_route(RouteRule::prefix("/tasks").with_method("GET"));
        let (proxy, _) = proxy_for(service, true);

        let response = proxy
            .handle("flowtime", request("POST", "/api/v1/tasks", RequestContext::generate()))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_502() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let service = ServiceDescriptor::new("flowtime", server.uri())
            .with_route(RouteRule::prefix("/tasks"))
            .with_retry_count(3);
        let (proxy, metrics) = proxy_for(service, true);

        let response = proxy
            .handle("flowtime", request("GET", "/api/v1/tasks", RequestContext::generate()))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let retries: f64 = metrics
            .registry()
            .gather()
            .iter()
            .find(|f| f.name() == "flowgate_upstream_retries_total")
            .map(|f| {
                f.metric
                    .iter()
                    .filter_map(|m| m.counter.as_ref())
                    .map(|c| c.value.unwrap_or(0.0))
                    .sum()
            })
            .unwrap_or(0.0);
        assert_eq!(retries, 2.0);
    }

    #[tokio::test]
    async fn test_oversized_body_is_refused_before_forwarding() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let service = ServiceDescriptor::new("flowtime", server.uri())
            .with_route(RouteRule::prefix("/tasks"));
        let (proxy, _) = proxy_for(service, true);
        let proxy = proxy.with_max_body_bytes(8);

        let mut req = Request::builder()
            .method("POST")
            .uri("/api/v1/tasks")
            .body(Body::from("0123456789abcdef"))
            .unwrap();
        req.extensions_mut().insert(RequestContext::generate());

        let response = proxy.handle("flowtime", req).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_read_body_limits_undeclared_length() {
        let chunks = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"01234")),
            Ok(Bytes::from_static(b"56789")),
        ]);
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/tasks")
            .body(Body::from_stream(chunks))
            .unwrap();
        assert!(matches!(
            read_body(req, 8).await,
            Err(IngressError::PayloadTooLarge { limit: 8 })
        ));

        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/tasks")
            .body(Body::from("small"))
            .unwrap();
        assert_eq!(read_body(req, 8).await.unwrap().as_ref(), b"small");
    }

    #[test]
    fn test_propagate_context_skips_absent_and_invalid_values() {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER_USER_ID, HeaderValue::from_static("spoofed"));

        let mut ctx = RequestContext::new("req-1");
        ctx.caller_email = Some("bad\nvalue".to_string());
        propagate_context(&mut headers, "auth", &ctx);

        assert!(headers.get(HEADER_USER_ID).is_none());
        assert!(headers.get(HEADER_USER_EMAIL).is_none());
        assert_eq!(headers.get(HEADER_FORWARDED_SERVICE).unwrap(), "auth");
        assert_eq!(headers.get(HEADER_GATEWAY_REQUEST_ID).unwrap(), "req-1");
    }
}
