//! Gateway assembly
//!
//! Turns a validated [`GatewayConfig`] into the HTTP router plus the
//! background pieces (health monitor, rate limiter) that `main` drives.
//! Nothing here spawns tasks or binds sockets.

use anyhow::Context;
use axum::Router;
use axum::http::StatusCode;
use flowgate_egress::{Forwarder, HttpClientConfig, ReqwestTransport};
use flowgate_ingress::{AuthGate, GatewayState, RateLimitGate, ReverseProxy, build_router};
use flowgate_observability::{HealthState, Metrics};
use flowgate_ratelimit::{RateLimiter, create_rate_limiter};
use flowgate_routing::{HealthMonitor, HttpHealthProbe, ServiceDirectory, ServiceRegistry};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};

use crate::config::GatewayConfig;

pub struct Gateway {
    pub router: Router,
    pub registry: Arc<ServiceRegistry>,
    pub monitor: HealthMonitor,
    /// `None` when rate limiting is disabled
    pub limiter: Option<Arc<dyn RateLimiter>>,
}

/// Build every component from configuration
pub fn build_gateway(config: &GatewayConfig) -> anyhow::Result<Gateway> {
    let metrics = Arc::new(Metrics::new().context("Failed to create metrics registry")?);

    let registry = Arc::new(ServiceRegistry::new(
        config.circuit_breaker.to_breaker_config(),
    ));
    for service in &config.services {
        registry.register(service.clone());
    }
    let directory = Arc::new(ServiceDirectory::new(
        config.services.clone(),
        config.api_prefix.clone(),
    ));

    let transport = ReqwestTransport::new(&HttpClientConfig::default())
        .context("Failed to create upstream HTTP client")?;
    let proxy = Arc::new(
        ReverseProxy::new(
            registry.clone(),
            Forwarder::new(Arc::new(transport)),
            metrics.clone(),
            config.api_prefix.clone(),
        )
        .with_max_body_bytes(config.max_body_bytes),
    );

    let limiter = if config.rate_limit.enabled {
        Some(create_rate_limiter(&config.rate_limit).context("Failed to create rate limiter")?)
    } else {
        None
    };

    let state = GatewayState {
        proxy,
        directory,
        auth: AuthGate::from_config(&config.auth),
        rate_limit: limiter
            .clone()
            .map(|limiter| RateLimitGate::new(limiter, &config.rate_limit)),
        metrics: metrics.clone(),
    };

    let health = HealthState::with_status_source(metrics, registry.clone());
    let cors = config.cors.layer().map_err(anyhow::Error::msg)?;

    let router = build_router(state, health, cors).layer(
        ServiceBuilder::new()
            .layer(TimeoutLayer::with_status_code(
                StatusCode::GATEWAY_TIMEOUT,
                config.timeouts.write(),
            ))
            .layer(RequestBodyTimeoutLayer::new(config.timeouts.read())),
    );

    let monitor_config = config.health.to_monitor_config();
    let probe = HttpHealthProbe::new(monitor_config.probe_timeout)
        .context("Failed to create health check client")?;
    let monitor = HealthMonitor::new(registry.clone(), Arc::new(probe), monitor_config);

    Ok(Gateway {
        router,
        registry,
        monitor,
        limiter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use flowgate_core::{HealthStatus, RouteRule, ServiceDescriptor};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(base_url: &str) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.auth.enabled = false;
        config.services = vec![
            ServiceDescriptor::new("tasks", base_url)
                .with_strip_prefix(true)
                .with_retry_count(1)
                .with_route(RouteRule::prefix("/tasks")),
        ];
        config
    }

    #[tokio::test]
    async fn test_gateway_serves_after_first_sweep() {
        let backend = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&backend)
            .await;
        Mock::given(method("GET"))
            .and(path("/tasks/7"))
            .respond_with(ResponseTemplate::new(200).set_body_string("task 7"))
            .mount(&backend)
            .await;

        let config = config_for(&backend.uri());
        assert!(config.validate().is_ok());
        let gateway = build_gateway(&config).unwrap();

        // Unknown health is refused until a probe has run
        let response = gateway
            .router
            .clone()
            .oneshot(Request::get("/api/v1/tasks/7").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        assert_eq!(gateway.monitor.sweep().await, 1);
        assert_eq!(
            gateway.registry.health_snapshot("tasks").unwrap().status,
            HealthStatus::Healthy
        );

        let response = gateway
            .router
            .oneshot(Request::get("/api/v1/tasks/7").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"task 7");
    }

    #[tokio::test]
    async fn test_oversized_body_gets_413() {
        let backend = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&backend)
            .await;
        Mock::given(method("POST"))
            .and(path("/tasks"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&backend)
            .await;

        let mut config = config_for(&backend.uri());
        config.max_body_bytes = 16;
        let gateway = build_gateway(&config).unwrap();
        gateway.monitor.sweep().await;

        let post = |body: &'static str| {
            Request::post("/api/v1/tasks")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap()
        };

        let response = gateway
            .router
            .clone()
            .oneshot(post(r#"{"title": "a long task title"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let response = gateway.router.oneshot(post(r#"{"t": 1}"#)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_disabled_rate_limit_has_no_limiter() {
        let mut config = config_for("http://127.0.0.1:1");
        config.rate_limit.enabled = false;
        let gateway = build_gateway(&config).unwrap();
        assert!(gateway.limiter.is_none());

        config.rate_limit.enabled = true;
        let gateway = build_gateway(&config).unwrap();
        assert!(gateway.limiter.is_some());
    }

    #[tokio::test]
    async fn test_invalid_cors_is_rejected() {
        let mut config = config_for("http://127.0.0.1:1");
        config.cors.allowed_origins = vec!["bad\norigin".to_string()];
        assert!(build_gateway(&config).is_err());
    }

    #[tokio::test]
    async fn test_health_endpoint_reports_unprobed_services() {
        let config = config_for("http://127.0.0.1:1");
        let gateway = build_gateway(&config).unwrap();

        let response = gateway
            .router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["services"]["tasks"]["status"], "unknown");
    }
}
