//! Metrics collection with Prometheus
//!
//! This module provides Prometheus metrics for Flowgate:
//! - Request counts, error counts and latency histograms by service, method and path
//! - In-flight request gauge
//! - Upstream retry and rate-limit rejection counters
//! - Service health and circuit breaker state gauges

use flowgate_core::HealthStatus;
use prometheus::{CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for Flowgate
#[derive(Clone)]
pub struct Metrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Total requests handled
    pub requests_total: CounterVec,
    /// Requests answered with status >= 400
    pub request_errors_total: CounterVec,
    /// End-to-end request duration
    pub request_duration_seconds: HistogramVec,
    /// Requests currently being served
    pub requests_in_flight: Gauge,

    /// Upstream attempts beyond the first
    pub upstream_retries_total: CounterVec,
    /// Requests rejected by the rate limiter, by key scope
    pub rate_limited_total: CounterVec,

    /// Service health status (0=unknown, 1=healthy, 2=degraded, 3=unhealthy)
    pub service_health_status: GaugeVec,
    /// Circuit breaker state (0=closed, 1=open, 2=half-open)
    pub circuit_breaker_state: GaugeVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = CounterVec::new(
            Opts::new("flowgate_requests_total", "Total number of requests"),
            &["service", "method", "path"],
        )?;

        let request_errors_total = CounterVec::new(
            Opts::new(
                "flowgate_request_errors_total",
                "Total number of requests answered with status >= 400",
            ),
            &["service", "method", "path", "status"],
        )?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "flowgate_request_duration_seconds",
                "Request duration in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
            ]),
            &["service", "method", "path"],
        )?;

        let requests_in_flight = Gauge::new(
            "flowgate_requests_in_flight",
            "Number of requests currently being served",
        )?;

        let upstream_retries_total = CounterVec::new(
            Opts::new(
                "flowgate_upstream_retries_total",
                "Upstream delivery attempts beyond the first",
            ),
            &["service"],
        )?;

        let rate_limited_total = CounterVec::new(
            Opts::new(
                "flowgate_rate_limited_total",
                "Requests rejected by the rate limiter",
            ),
            &["scope"],
        )?;

        let service_health_status = GaugeVec::new(
            Opts::new(
                "flowgate_service_health_status",
                "Service health status (0=unknown, 1=healthy, 2=degraded, 3=unhealthy)",
            ),
            &["service"],
        )?;

        let circuit_breaker_state = GaugeVec::new(
            Opts::new(
                "flowgate_circuit_breaker_state",
                "Circuit breaker state (0=closed, 1=open, 2=half-open)",
            ),
            &["service"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_errors_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(requests_in_flight.clone()))?;
        registry.register(Box::new(upstream_retries_total.clone()))?;
        registry.register(Box::new(rate_limited_total.clone()))?;
        registry.register(Box::new(service_health_status.clone()))?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            requests_total,
            request_errors_total,
            request_duration_seconds,
            requests_in_flight,
            upstream_retries_total,
            rate_limited_total,
            service_health_status,
            circuit_breaker_state,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a completed request
    pub fn record_request(
        &self,
        service: &str,
        method: &str,
        path: &str,
        status: u16,
        duration_secs: f64,
    ) {
        self.requests_total
            .with_label_values(&[service, method, path])
            .inc();
        self.request_duration_seconds
            .with_label_values(&[service, method, path])
            .observe(duration_secs);
        if status >= 400 {
            let status = status.to_string();
            self.request_errors_total
                .with_label_values(&[service, method, path, status.as_str()])
                .inc();
        }
    }

    pub fn request_started(&self) {
        self.requests_in_flight.inc();
    }

    pub fn request_finished(&self) {
        self.requests_in_flight.dec();
    }

    pub fn record_retry(&self, service: &str) {
        self.upstream_retries_total
            .with_label_values(&[service])
            .inc();
    }

    /// Record a rate-limit rejection; `scope` is "user", "ip" or "global"
    pub fn record_rate_limited(&self, scope: &str) {
        self.rate_limited_total.with_label_values(&[scope]).inc();
    }

    /// Update service health status
    pub fn update_service_health(&self, service: &str, status: HealthStatus) {
        let value = match status {
            HealthStatus::Unknown => 0.0,
            HealthStatus::Healthy => 1.0,
            HealthStatus::Degraded => 2.0,
            HealthStatus::Unhealthy => 3.0,
        };
        self.service_health_status
            .with_label_values(&[service])
            .set(value);
    }

    /// Update circuit breaker state
    pub fn update_circuit_breaker_state(&self, service: &str, state: CircuitBreakerState) {
        self.circuit_breaker_state
            .with_label_values(&[service])
            .set(state as i64 as f64);
    }
}

/// Circuit breaker state for metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CircuitBreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl CircuitBreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}
