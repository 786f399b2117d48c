//! Service health snapshots
//!
//! A [`ServiceHealth`] is overwritten wholesale after every probe and handed
//! out by value, so readers never observe a snapshot changing underneath them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health status of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// No probe has completed yet
    #[default]
    Unknown,
    /// Last probe returned 200
    Healthy,
    /// Last probe failed
    Unhealthy,
    /// Reserved for partial availability
    Degraded,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Degraded => "degraded",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Most recent probe result for one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub name: String,
    pub url: String,
    pub status: HealthStatus,
    pub last_checked: Option<DateTime<Utc>>,
    /// Latency of the last probe in milliseconds
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

impl ServiceHealth {
    /// Snapshot for a freshly registered service
    pub fn unknown(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            status: HealthStatus::Unknown,
            last_checked: None,
            latency_ms: None,
            error: None,
        }
    }

    pub fn healthy(name: impl Into<String>, url: impl Into<String>, latency: Duration) -> Self {
        Self {
            status: HealthStatus::Healthy,
            last_checked: Some(Utc::now()),
            latency_ms: Some(latency.as_millis() as u64),
            ..Self::unknown(name, url)
        }
    }

    pub fn unhealthy(
        name: impl Into<String>,
        url: impl Into<String>,
        latency: Duration,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            last_checked: Some(Utc::now()),
            latency_ms: Some(latency.as_millis() as u64),
            error: Some(error.into()),
            ..Self::unknown(name, url)
        }
    }
}
