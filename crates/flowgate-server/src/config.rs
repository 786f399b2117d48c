use flowgate_core::{RouteRule, ServiceDescriptor};
use flowgate_ingress::{AuthConfig, CorsConfig, DEFAULT_MAX_BODY_BYTES};
use flowgate_observability::LoggingConfig;
use flowgate_ratelimit::RateLimitConfig;
use flowgate_routing::{CircuitBreakerConfig, HealthMonitorConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// External prefix under which every service is mounted
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Largest request body the proxy buffers; larger bodies get 413
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Dispatch order; the first service with a matching route wins
    #[serde(default = "default_services")]
    pub services: Vec<ServiceDescriptor>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub circuit_breaker: BreakerSettings,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub timeouts: TimeoutSettings,

    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    /// Seconds after the last failure before a half-open trial
    #[serde(default = "default_breaker_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Bound on reading a request body
    #[serde(default = "default_read_secs")]
    pub read_secs: u64,

    /// Bound on producing a response, retries included
    #[serde(default = "default_write_secs")]
    pub write_secs: u64,

    /// Grace period for in-flight requests after a shutdown signal
    #[serde(default = "default_shutdown_secs")]
    pub shutdown_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_success_threshold() -> u32 {
    2
}

fn default_breaker_timeout_secs() -> u64 {
    30
}

fn default_check_interval_secs() -> u64 {
    30
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_read_secs() -> u64 {
    15
}

fn default_write_secs() -> u64 {
    15
}

fn default_shutdown_secs() -> u64 {
    30
}

fn default_services() -> Vec<ServiceDescriptor> {
    let auth = ServiceDescriptor::new("auth", "http://auth-service:8080")
        .with_timeout(Duration::from_secs(5))
        .with_retry_count(2)
        .with_auth_required(false)
        .with_strip_prefix(true)
        .with_route(RouteRule::prefix("/auth"));

    let flowtime = ["/tasks", "/energy", "/sessions", "/schedule", "/stats", "/preferences"]
        .into_iter()
        .fold(
            ServiceDescriptor::new("flowtime", "http://flowtime-service:8081")
                .with_timeout(Duration::from_secs(5))
                .with_retry_count(2),
            |service, prefix| service.with_route(RouteRule::prefix(prefix)),
        );

    vec![auth, flowtime]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_prefix: default_api_prefix(),
            max_body_bytes: default_max_body_bytes(),
            logging: LoggingConfig::default(),
            services: default_services(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: BreakerSettings::default(),
            health: HealthSettings::default(),
            auth: AuthConfig::default(),
            timeouts: TimeoutSettings::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_secs: default_breaker_timeout_secs(),
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            read_secs: default_read_secs(),
            write_secs: default_write_secs(),
            shutdown_secs: default_shutdown_secs(),
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

impl HealthSettings {
    pub fn to_monitor_config(&self) -> HealthMonitorConfig {
        HealthMonitorConfig {
            check_interval: Duration::from_secs(self.check_interval_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
        }
    }
}

impl TimeoutSettings {
    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    pub fn write(&self) -> Duration {
        Duration::from_secs(self.write_secs)
    }

    pub fn shutdown(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }
}

/// `FLOWGATE_SERVICE_<NAME>_URL`, with the name upper-cased and `-` mapped to `_`
pub fn service_url_env_var(name: &str) -> String {
    format!(
        "FLOWGATE_SERVICE_{}_URL",
        name.to_ascii_uppercase().replace('-', "_")
    )
}

impl GatewayConfig {
    /// Load from a YAML file, or TOML when the extension is `.toml`
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&contents)?
        } else {
            // Default to YAML
            serde_yaml::from_str(&contents)?
        };

        Ok(config)
    }

    /// Merge environment variables into config (env vars take precedence)
    pub fn merge_env(&mut self) {
        if let Ok(val) = std::env::var("FLOWGATE_HOST") {
            self.host = val;
        }

        if let Ok(val) = std::env::var("FLOWGATE_PORT") {
            match val.parse() {
                Ok(port) => self.port = port,
                Err(_) => eprintln!("Warning: Invalid FLOWGATE_PORT '{}', ignoring", val),
            }
        }

        if let Ok(val) = std::env::var("FLOWGATE_LOG_LEVEL") {
            self.logging.level = val;
        }

        if let Ok(val) = std::env::var("FLOWGATE_JWT_SECRET") {
            self.auth.jwt_secret = val;
        }

        for service in &mut self.services {
            if let Ok(url) = std::env::var(service_url_env_var(&service.name)) {
                service.base_url = url;
            }
        }
    }

    /// Reject configurations the gateway cannot run with
    pub fn validate(&self) -> Result<(), String> {
        if !self.api_prefix.starts_with('/') {
            return Err(format!(
                "api_prefix '{}' must start with '/'",
                self.api_prefix
            ));
        }

        let mut seen = HashSet::new();
        for service in &self.services {
            service.validate()?;
            if !seen.insert(service.name.as_str()) {
                return Err(format!("duplicate service name '{}'", service.name));
            }

            let url = reqwest::Url::parse(&service.base_url).map_err(|e| {
                format!(
                    "service '{}' has an invalid base_url '{}': {}",
                    service.name, service.base_url, e
                )
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(format!(
                    "service '{}' base_url must use http or https, got '{}'",
                    service.name,
                    url.scheme()
                ));
            }
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err("circuit_breaker.failure_threshold must be greater than 0".to_string());
        }
        if self.circuit_breaker.success_threshold == 0 {
            return Err("circuit_breaker.success_threshold must be greater than 0".to_string());
        }

        self.health.to_monitor_config().validate()?;
        self.rate_limit.validate().map_err(|e| e.to_string())?;
        self.auth.validate()?;
        self.cors.validate()?;

        if self.max_body_bytes == 0 {
            return Err("max_body_bytes must be greater than 0".to_string());
        }
        if self.timeouts.read_secs == 0 || self.timeouts.write_secs == 0 {
            return Err("timeouts.read_secs and timeouts.write_secs must be greater than 0".to_string());
        }

        Ok(())
    }
}
