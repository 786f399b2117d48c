//! End-to-end harness for Flowgate
//!
//! Wires every crate together the way the server binary does and serves the
//! resulting router on an ephemeral local port, so tests talk to the gateway
//! over real TCP with `reqwest` while backends are `wiremock` servers.

use flowgate_core::ServiceDescriptor;
use flowgate_egress::{Forwarder, HttpClientConfig, LinearBackoff, ReqwestTransport};
use flowgate_ingress::auth::AccessClaims;
use flowgate_ingress::{
    AuthGate, CorsConfig, GatewayState, JwtValidator, RateLimitGate, ReverseProxy, build_router,
};
use flowgate_observability::{HealthState, Metrics};
use flowgate_ratelimit::{RateLimitConfig, create_rate_limiter};
use flowgate_routing::{
    CircuitBreakerConfig, HealthMonitor, HealthMonitorConfig, HttpHealthProbe, ServiceDirectory,
    ServiceRegistry,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const API_PREFIX: &str = "/api/v1";
pub const JWT_SECRET: &str = "integration-secret";
pub const JWT_ISSUER: &str = "flowtime-auth";

/// Signed access token for `user_id`, valid for an hour
pub fn access_token(user_id: &str, email: &str) -> String {
    let claims = AccessClaims {
        user_id: user_id.to_string(),
        email: Some(email.to_string()),
        token_type: "access".to_string(),
        exp: chrono::Utc::now().timestamp() + 3600,
        iss: Some(JWT_ISSUER.to_string()),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("token encoding")
}

/// Mount `GET /health -> 200` on a backend
pub async fn mount_healthy(backend: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(backend)
        .await;
}

pub struct GatewayOptions {
    pub services: Vec<ServiceDescriptor>,
    pub auth_enabled: bool,
    pub skip_paths: Vec<String>,
    pub rate_limit: RateLimitConfig,
    pub breaker: CircuitBreakerConfig,
    pub backoff_step: Duration,
}

impl GatewayOptions {
    pub fn new(services: Vec<ServiceDescriptor>) -> Self {
        Self {
            services,
            auth_enabled: false,
            skip_paths: vec!["/api/v1/auth/*".to_string()],
            rate_limit: RateLimitConfig {
                enabled: false,
                ..Default::default()
            },
            breaker: CircuitBreakerConfig::default(),
            backoff_step: Duration::from_millis(10),
        }
    }

    pub fn with_auth(mut self) -> Self {
        self.auth_enabled = true;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_min: u32, burst_size: u32) -> Self {
        self.rate_limit = RateLimitConfig {
            enabled: true,
            requests_per_min,
            burst_size,
            ..Default::default()
        };
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }
}

/// A gateway listening on `127.0.0.1:<ephemeral>`
pub struct TestGateway {
    pub addr: SocketAddr,
    pub registry: Arc<ServiceRegistry>,
    pub monitor: HealthMonitor,
    pub client: reqwest::Client,
    shutdown: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl TestGateway {
    pub async fn spawn(options: GatewayOptions) -> Self {
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let registry = Arc::new(ServiceRegistry::new(options.breaker.clone()));
        for service in &options.services {
            registry.register(service.clone());
        }

        let transport = ReqwestTransport::new(&HttpClientConfig::default()).expect("transport");
        let forwarder = Forwarder::new(Arc::new(transport))
            .with_backoff(Arc::new(LinearBackoff::new(options.backoff_step)));
        let proxy = ReverseProxy::new(registry.clone(), forwarder, metrics.clone(), API_PREFIX);

        let auth = if options.auth_enabled {
            AuthGate::new(
                Arc::new(JwtValidator::new(JWT_SECRET, Some(JWT_ISSUER))),
                options.skip_paths.clone(),
            )
        } else {
            AuthGate::disabled()
        };

        let rate_limit = if options.rate_limit.enabled {
            let limiter = create_rate_limiter(&options.rate_limit).expect("rate limiter");
            Some(RateLimitGate::new(limiter, &options.rate_limit))
        } else {
            None
        };

        let state = GatewayState {
            proxy: Arc::new(proxy),
            directory: Arc::new(ServiceDirectory::new(options.services.clone(), API_PREFIX)),
            auth,
            rate_limit,
            metrics: metrics.clone(),
        };
        let health = HealthState::with_status_source(metrics, registry.clone());
        let cors = CorsConfig::default().layer().expect("cors");
        let router = build_router(state, health, cors);

        let monitor_config = HealthMonitorConfig {
            check_interval: Duration::from_secs(3600),
            probe_timeout: Duration::from_secs(2),
        };
        let probe = HttpHealthProbe::new(monitor_config.probe_timeout).expect("probe client");
        let monitor = HealthMonitor::new(registry.clone(), Arc::new(probe), monitor_config);

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let server = tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;
        });

        Self {
            addr,
            registry,
            monitor,
            client: reqwest::Client::new(),
            shutdown: Some(shutdown_tx),
            server: Some(server),
        }
    }

    /// Absolute URL for a gateway path
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Run one health sweep; returns the number of outcomes applied
    pub async fn probe(&self) -> usize {
        self.monitor.sweep().await
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("gateway request")
    }

    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(server) = self.server.take() {
            let _ = server.await;
        }
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
