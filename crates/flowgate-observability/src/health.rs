//! Health endpoints
//!
//! This module provides the gateway's own HTTP endpoints:
//! - `/health` - Aggregate backend health (503 when no service is healthy)
//! - `/metrics` - Prometheus metrics endpoint

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use flowgate_core::ServiceHealth;
use prometheus::TextEncoder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::metrics::{CircuitBreakerState, Metrics};

/// Health and breaker state of one service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    #[serde(flatten)]
    pub health: ServiceHealth,
    pub circuit: CircuitBreakerState,
}

/// Source of per-service status, implemented by the service registry
pub trait ServiceStatusSource: Send + Sync {
    /// Defensive copy of every registered service's status
    fn service_statuses(&self) -> Vec<ServiceStatus>;
}

/// Aggregate gateway status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl OverallStatus {
    /// All healthy (or none registered) → healthy, none healthy → unhealthy, otherwise degraded
    pub fn from_statuses(statuses: &[ServiceStatus]) -> Self {
        let not_healthy = statuses
            .iter()
            .filter(|s| !s.health.status.is_healthy())
            .count();

        if not_healthy == 0 {
            OverallStatus::Healthy
        } else if not_healthy == statuses.len() {
            OverallStatus::Unhealthy
        } else {
            OverallStatus::Degraded
        }
    }
}

/// `/health` response body
#[derive(Debug, Clone, Serialize)]
pub struct GatewayHealthResponse {
    pub status: OverallStatus,
    pub services: BTreeMap<String, ServiceStatus>,
    pub timestamp: DateTime<Utc>,
}

/// Health endpoint state
#[derive(Clone)]
pub struct HealthState {
    /// Metrics collector
    pub metrics: Arc<Metrics>,
    /// Optional status source; without one the gateway reports healthy
    pub status_source: Option<Arc<dyn ServiceStatusSource>>,
}

impl HealthState {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            metrics,
            status_source: None,
        }
    }

    pub fn with_status_source(
        metrics: Arc<Metrics>,
        status_source: Arc<dyn ServiceStatusSource>,
    ) -> Self {
        Self {
            metrics,
            status_source: Some(status_source),
        }
    }

    fn statuses(&self) -> Vec<ServiceStatus> {
        self.status_source
            .as_ref()
            .map(|source| source.service_statuses())
            .unwrap_or_default()
    }
}

/// Create health check router
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<HealthState>) -> Response {
    let statuses = state.statuses();
    let status = OverallStatus::from_statuses(&statuses);

    let code = if status == OverallStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let body = GatewayHealthResponse {
        status,
        services: statuses
            .into_iter()
            .map(|s| (s.health.name.clone(), s))
            .collect(),
        timestamp: Utc::now(),
    };

    (code, Json(body)).into_response()
}

/// Prometheus metrics handler
///
/// State gauges are refreshed from the status source before encoding.
async fn metrics_handler(State(state): State<HealthState>) -> Response {
    for status in state.statuses() {
        state
            .metrics
            .update_service_health(&status.health.name, status.health.status);
        state
            .metrics
            .update_circuit_breaker_state(&status.health.name, status.circuit);
    }

    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    match encoder.encode_to_string(&metric_families) {
        Ok(body) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", err),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt; // for oneshot

    struct FixedStatuses(Vec<ServiceStatus>);

    impl ServiceStatusSource for FixedStatuses {
        fn service_statuses(&self) -> Vec<ServiceStatus> {
            self.0.clone()
        }
    }

    fn status(name: &str, healthy: bool) -> ServiceStatus {
        let health = if healthy {
            ServiceHealth::healthy(name, "http://x/health", Duration::from_millis(3))
        } else {
            ServiceHealth::unhealthy(name, "http://x/health", Duration::from_millis(3), "down")
        };
        ServiceStatus {
            health,
            circuit: CircuitBreakerState::Closed,
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let code = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (code, serde_json::from_slice(&bytes).unwrap())
    }

    fn app_with(statuses: Vec<ServiceStatus>) -> Router {
        let metrics = Arc::new(Metrics::new().unwrap());
        health_router(HealthState::with_status_source(
            metrics,
            Arc::new(FixedStatuses(statuses)),
        ))
    }

    #[test]
    fn test_overall_status() {
        assert_eq!(OverallStatus::from_statuses(&[]), OverallStatus::Healthy);
        assert_eq!(
            OverallStatus::from_statuses(&[status("a", true), status("b", true)]),
            OverallStatus::Healthy
        );
        assert_eq!(
            OverallStatus::from_statuses(&[status("a", true), status("b", false)]),
            OverallStatus::Degraded
        );
        assert_eq!(
            OverallStatus::from_statuses(&[status("a", false)]),
            OverallStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn test_health_all_healthy() {
        let (code, body) = get_json(app_with(vec![status("auth", true)]), "/health").await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["services"]["auth"]["status"], "healthy");
        assert_eq!(body["services"]["auth"]["circuit"], "closed");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_health_degraded_is_ok() {
        let (code, body) = get_json(
            app_with(vec![status("auth", true), status("flowtime", false)]),
            "/health",
        )
        .await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["services"]["flowtime"]["error"], "down");
    }

    #[tokio::test]
    async fn test_health_unhealthy_returns_503() {
        let (code, body) = get_json(app_with(vec![status("auth", false)]), "/health").await;

        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");
    }

    #[tokio::test]
    async fn test_health_without_source() {
        let app = health_router(HealthState::new(Arc::new(Metrics::new().unwrap())));
        let (code, body) = get_json(app, "/health").await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_metrics_refreshes_gauges() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let mut down = status("auth", false);
        down.circuit = CircuitBreakerState::Open;
        let app = health_router(HealthState::with_status_source(
            metrics.clone(),
            Arc::new(FixedStatuses(vec![down])),
        ));

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/plain; version=0.0.4"
        );
        let text = String::from_utf8(
            response.into_body().collect().await.unwrap().to_bytes().to_vec(),
        )
        .unwrap();
        assert!(text.contains("flowgate_circuit_breaker_state{service=\"auth\"} 1"));
        assert_eq!(
            metrics
                .service_health_status
                .with_label_values(&["auth"])
                .get(),
            3.0
        );
    }
}
