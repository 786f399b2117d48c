//! Router assembly
//!
//! Layer order, outermost first: panic recovery, request context, request
//! logging, CORS, metrics. API routes then resolve their target once, pass
//! the client rate limit, the auth gate and the per-caller rate limit, and
//! reach dispatch.

use crate::auth::{AuthGate, auth_middleware};
use crate::middleware::{logging_middleware, metrics_middleware, request_context_middleware};
use crate::proxy::{ReverseProxy, RouteSelector, dispatch, select_route_middleware};
use crate::rate_limit::{RateLimitGate, caller_rate_limit_middleware, rate_limit_middleware};
use crate::types::IngressError;
use axum::{
    Router,
    extract::Request,
    middleware,
    response::{IntoResponse, Response},
    routing::any,
};
use flowgate_core::Error;
use flowgate_observability::{HealthState, Metrics, health_router};
use flowgate_routing::ServiceDirectory;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;

/// Shared state for API handlers and gates
#[derive(Clone)]
pub struct GatewayState {
    pub proxy: Arc<ReverseProxy>,
    pub directory: Arc<ServiceDirectory>,
    pub auth: AuthGate,
    /// `None` when rate limiting is disabled
    pub rate_limit: Option<RateLimitGate>,
    pub metrics: Arc<Metrics>,
}

async fn route_not_found(req: Request) -> Response {
    IngressError::from(Error::RouteNotFound {
        method: req.method().to_string(),
        path: req.uri().path().to_string(),
    })
    .into_response()
}

/// Put the API gates in front of every route of `routes`
///
/// Use [`RouteSelector::Directory`] for catch-all dispatch and
/// [`RouteSelector::Service`] for routes mounted with [`crate::proxy`].
pub fn gate_routes(
    routes: Router<GatewayState>,
    state: &GatewayState,
    selector: RouteSelector,
) -> Router<GatewayState> {
    // route_layer: the last layer added runs first
    routes
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            caller_rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            (state.clone(), selector),
            select_route_middleware,
        ))
}

/// Build the complete gateway router
pub fn build_router(state: GatewayState, health: HealthState, cors: CorsLayer) -> Router {
    let api_route = format!(
        "{}/{{*path}}",
        state.directory.api_prefix().trim_end_matches('/')
    );

    let api = gate_routes(
        Router::new().route(&api_route, any(dispatch)),
        &state,
        RouteSelector::Directory,
    )
    .with_state(state.clone());

    Router::new()
        .merge(health_router(health))
        .merge(api)
        .fallback(route_not_found)
        .layer(
            ServiceBuilder::new()
                .layer(CatchPanicLayer::new())
                .layer(middleware::from_fn(request_context_middleware))
                .layer(middleware::from_fn(logging_middleware))
                .layer(cors)
                .layer(middleware::from_fn_with_state(
                    state.metrics.clone(),
                    metrics_middleware,
                )),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::JwtValidator;
    use crate::middleware::CorsConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use flowgate_core::{RateLimitRule, RouteRule, ServiceDescriptor};
    use flowgate_egress::{Forwarder, HttpClientConfig, NoBackoff, ReqwestTransport};
    use flowgate_observability::ServiceStatusSource;
    use flowgate_ratelimit::{MemoryRateLimiter, RateLimitConfig};
    use flowgate_routing::{CircuitBreakerConfig, ProbeOutcome, ServiceRegistry};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn app(services: Vec<ServiceDescriptor>, burst: u32) -> Router {
        let (state, health) = state(services, burst);
        build_router(state, health, CorsConfig::default().layer().unwrap())
    }

    fn state(services: Vec<ServiceDescriptor>, burst: u32) -> (GatewayState, HealthState) {
        let registry = Arc::new(ServiceRegistry::new(CircuitBreakerConfig::default()));
        for service in &services {
            registry.register(service.clone());
            let breaker = registry.circuit(&service.name).unwrap();
            registry.record_probe(
                &service.name,
                &breaker,
                &ProbeOutcome::success(Duration::from_millis(1)),
            );
        }

        let metrics = Arc::new(Metrics::new().unwrap());
        let transport = ReqwestTransport::new(&HttpClientConfig::default()).unwrap();
        let forwarder = Forwarder::new(Arc::new(transport)).with_backoff(Arc::new(NoBackoff));
        let limiter = Arc::new(MemoryRateLimiter::new(
            RateLimitRule::new(60, burst),
            Duration::from_secs(600),
        ));

        let state = GatewayState {
            proxy: Arc::new(ReverseProxy::new(
                registry.clone(),
                forwarder,
                metrics.clone(),
                "/api/v1",
            )),
            directory: Arc::new(ServiceDirectory::new(services, "/api/v1")),
            auth: AuthGate::new(
                Arc::new(JwtValidator::new("secret", None)),
                vec!["/api/v1/auth/*".to_string()],
            ),
            rate_limit: Some(RateLimitGate::new(limiter, &RateLimitConfig::default())),
            metrics: metrics.clone(),
        };
        let status_source: Arc<dyn ServiceStatusSource> = registry;
        let health = HealthState::with_status_source(metrics, status_source);
        (state, health)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-forwarded-for", "203.0.113.1")
            .body(Body::empty())
            .unwrap()
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_path_is_404_json() {
        let response = app(vec![], 10).oneshot(get("/nowhere")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get("x-request-id").is_some());
        assert_eq!(json(response).await["error"]["message"], "Route not found");
    }

    #[tokio::test]
    async fn test_api_requires_token() {
        let service = ServiceDescriptor::new("flowtime", "http://127.0.0.1:9")
            .with_route(RouteRule::prefix("/tasks"));
        let response = app(vec![service], 10)
            .oneshot(get("/api/v1/tasks"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json(response).await["error"]["message"],
            "Authorization header required"
        );
    }

    #[tokio::test]
    async fn test_skip_listed_route_is_proxied_and_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/auth/signin"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .expect(2)
            .mount(&server)
            .await;

        let service = ServiceDescriptor::new("auth", server.uri())
            .with_route(RouteRule::prefix("/auth"));
        let app = app(vec![service], 2);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/api/v1/auth/signin")
                        .header("x-forwarded-for", "203.0.113.1")
                        .body(Body::from("{}"))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers().get("x-service-name").unwrap(), "auth");
            assert!(response.headers().get("x-response-time").is_some());
        }

        let limited = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/auth/signin")
                    .header("x-forwarded-for", "203.0.113.1")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(limited.headers().get("retry-after").unwrap(), "1");
    }

    #[tokio::test]
    async fn test_health_endpoint_is_not_gated() {
        let service = ServiceDescriptor::new("auth", "http://127.0.0.1:9")
            .with_route(RouteRule::prefix("/auth"));
        let app = app(vec![service], 1);

        for _ in 0..3 {
            let response = app.clone().oneshot(get("/health")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let body = json(app.oneshot(get("/health")).await.unwrap()).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["services"]["auth"]["status"], "healthy");
    }

    #[tokio::test]
    async fn test_bad_credentials_still_spend_client_budget() {
        let service = ServiceDescriptor::new("flowtime", "http://127.0.0.1:9")
            .with_route(RouteRule::prefix("/tasks"));
        let app = app(vec![service], 2);

        let mut statuses = Vec::new();
        for _ in 0..4 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/api/v1/tasks")
                        .header("x-forwarded-for", "203.0.113.1")
                        .header("authorization", "Bearer forged.token.value")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            statuses.push(response.status());
        }
        assert_eq!(
            statuses,
            [
                StatusCode::UNAUTHORIZED,
                StatusCode::UNAUTHORIZED,
                StatusCode::TOO_MANY_REQUESTS,
                StatusCode::TOO_MANY_REQUESTS,
            ]
        );
    }

    #[tokio::test]
    async fn test_explicit_mount_uses_its_own_service_rules() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        // Both services claim /tasks; the directory would pick "flowtime"
        let services = vec![
            ServiceDescriptor::new("flowtime", server.uri())
                .with_auth_required(false)
                .with_route(RouteRule::prefix("/tasks")),
            ServiceDescriptor::new("tasks-v2", server.uri())
                .with_auth_required(false)
                .with_rate_limit(RateLimitRule::new(60, 1))
                .with_route(RouteRule::prefix("/tasks")),
        ];
        let (state, _) = state(services, 10);
        let app: Router = gate_routes(
            Router::new().route("/api/v1/tasks", crate::proxy::proxy("tasks-v2")),
            &state,
            RouteSelector::service("tasks-v2"),
        )
        .with_state(state);

        let first = app.clone().oneshot(get("/api/v1/tasks")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers().get("x-service-name").unwrap(), "tasks-v2");

        let second = app.oneshot(get("/api/v1/tasks")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
