//! Health probing
//!
//! A probe issues one `GET {base_url}{health_check_path}` per service per
//! sweep. HTTP 200 is a success; any other status, a transport error or a
//! timeout is a failure.

use async_trait::async_trait;
use flowgate_core::ServiceDescriptor;
use std::time::Duration;
use tokio::time::Instant;

/// Result of a single probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub success: bool,
    pub latency: Duration,
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn success(latency: Duration) -> Self {
        Self {
            success: true,
            latency,
            error: None,
        }
    }

    pub fn failure(latency: Duration, error: impl Into<String>) -> Self {
        Self {
            success: false,
            latency,
            error: Some(error.into()),
        }
    }
}

/// Out-of-band liveness check for one service
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, service: &ServiceDescriptor) -> ProbeOutcome;
}

/// Configuration for health monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthMonitorConfig {
    /// Time between sweeps
    pub check_interval: Duration,
    /// Client timeout for each probe, independent of proxy timeouts
    pub probe_timeout: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl HealthMonitorConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.check_interval.is_zero() {
            return Err("check_interval must be greater than 0".to_string());
        }
        if self.probe_timeout.is_zero() {
            return Err("probe_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Probe over HTTP with a dedicated client
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("flowgate-health/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, service: &ServiceDescriptor) -> ProbeOutcome {
        let url = service.health_url();
        let start = Instant::now();

        match self.client.get(&url).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                ProbeOutcome::success(start.elapsed())
            }
            Ok(response) => ProbeOutcome::failure(
                start.elapsed(),
                format!("HTTP status {}", response.status().as_u16()),
            ),
            Err(e) => ProbeOutcome::failure(start.elapsed(), e.to_string()),
        }
    }
}
