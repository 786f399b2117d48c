//! Service, route and rate-limit configuration model
//!
//! These types are deserialized once at startup and shared read-only
//! (behind `Arc`) by the registry, the rate limiter and the proxy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Method value matching any HTTP method
pub const WILDCARD_METHOD: &str = "*";

fn default_health_check_path() -> String {
    "/health".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retry_count() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_method() -> String {
    WILDCARD_METHOD.to_string()
}

/// Token-bucket parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Sustained rate, refilled continuously
    pub requests_per_min: u32,
    /// Bucket capacity
    pub burst_size: u32,
}

impl RateLimitRule {
    pub fn new(requests_per_min: u32, burst_size: u32) -> Self {
        Self {
            requests_per_min,
            burst_size,
        }
    }

    /// Tokens added per second
    pub fn refill_per_sec(&self) -> f64 {
        f64::from(self.requests_per_min) / 60.0
    }

    /// Seconds until an empty bucket holds one token again (at least 1)
    pub fn retry_after_secs(&self) -> u64 {
        if self.requests_per_min == 0 {
            return 60;
        }
        let secs = (60.0 / f64::from(self.requests_per_min)).ceil() as u64;
        secs.max(1)
    }
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self {
            requests_per_min: 60,
            burst_size: 10,
        }
    }
}

/// Declarative mapping from (method, path prefix) to a backend path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRule {
    /// HTTP method, or "*" for any
    #[serde(default = "default_method")]
    pub method: String,

    /// Path prefix matched against the request path with the API prefix removed
    pub path: String,

    /// Replacement for the matched prefix on the outgoing request
    #[serde(default)]
    pub target_path: Option<String>,

    /// Route-specific rate limit, takes precedence over service and global rules
    #[serde(default)]
    pub rate_limit: Option<RateLimitRule>,

    /// Route-specific per-attempt timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RouteRule {
    /// Route matching any method under `path`
    pub fn prefix(path: impl Into<String>) -> Self {
        Self {
            method: default_method(),
            path: path.into(),
            target_path: None,
            rate_limit: None,
            timeout_ms: None,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_target_path(mut self, target: impl Into<String>) -> Self {
        self.target_path = Some(target.into());
        self
    }

    pub fn with_rate_limit(mut self, rule: RateLimitRule) -> Self {
        self.rate_limit = Some(rule);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Method match (case-insensitive, "*" matches all) AND path-prefix match
    pub fn matches(&self, method: &str, path: &str) -> bool {
        let method_ok =
            self.method == WILDCARD_METHOD || self.method.eq_ignore_ascii_case(method);
        method_ok && path.starts_with(&self.path)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Backend selection strategy for multi-backend services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    Random,
    LeastConnections,
}

/// Load-balancing hint; forwarding currently uses `base_url` only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LoadBalancing {
    #[serde(default)]
    pub strategy: LoadBalancingStrategy,
    #[serde(default)]
    pub backends: Vec<String>,
}

/// Static description of one backend service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Unique service name
    pub name: String,

    /// Base URL, e.g. `http://tasks:8080`
    pub base_url: String,

    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,

    /// Default per-attempt timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Delivery attempts per request; 0 is treated as 1
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Remove the external API prefix before forwarding
    #[serde(default)]
    pub strip_prefix: bool,

    #[serde(default = "default_true")]
    pub auth_required: bool,

    /// Ordered route rules; first match wins
    #[serde(default)]
    pub routes: Vec<RouteRule>,

    /// Service-wide rate limit, below route overrides and above the global default
    #[serde(default)]
    pub rate_limit: Option<RateLimitRule>,

    #[serde(default)]
    pub load_balancing: Option<LoadBalancing>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            health_check_path: default_health_check_path(),
            timeout_ms: default_timeout_ms(),
            retry_count: default_retry_count(),
            strip_prefix: false,
            auth_required: true,
            routes: Vec::new(),
            rate_limit: None,
            load_balancing: None,
        }
    }

    pub fn with_route(mut self, route: RouteRule) -> Self {
        self.routes.push(route);
        self
    }

    pub fn with_strip_prefix(mut self, strip: bool) -> Self {
        self.strip_prefix = strip;
        self
    }

    pub fn with_retry_count(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_health_check_path(mut self, path: impl Into<String>) -> Self {
        self.health_check_path = path.into();
        self
    }

    pub fn with_auth_required(mut self, required: bool) -> Self {
        self.auth_required = required;
        self
    }

    pub fn with_rate_limit(mut self, rule: RateLimitRule) -> Self {
        self.rate_limit = Some(rule);
        self
    }

    /// First route rule matching `(method, path)`
    pub fn match_route(&self, method: &str, path: &str) -> Option<&RouteRule> {
        self.routes.iter().find(|r| r.matches(method, path))
    }

    /// Number of delivery attempts, never below one
    pub fn attempts(&self) -> u32 {
        self.retry_count.max(1)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Route override, else the service default
    pub fn effective_timeout(&self, route: Option<&RouteRule>) -> Duration {
        route
            .and_then(RouteRule::timeout)
            .unwrap_or_else(|| self.timeout())
    }

    /// Full URL probed by the health monitor
    pub fn health_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.health_check_path
        )
    }

    /// Structural checks that need no network or URL parser
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("service name must not be empty".to_string());
        }
        if self.base_url.trim().is_empty() {
            return Err(format!("service '{}' has an empty base_url", self.name));
        }
        if !self.health_check_path.starts_with('/') {
            return Err(format!(
                "service '{}' health_check_path must start with '/'",
                self.name
            ));
        }
        for route in &self.routes {
            if !route.path.starts_with('/') {
                return Err(format!(
                    "service '{}' route '{}' must start with '/'",
                    self.name, route.path
                ));
            }
            if let Some(rule) = route.rate_limit
                && (rule.requests_per_min == 0 || rule.burst_size == 0)
            {
                return Err(format!(
                    "service '{}' route '{}' has a zero rate limit",
                    self.name, route.path
                ));
            }
        }
        if let Some(rule) = self.rate_limit
            && (rule.requests_per_min == 0 || rule.burst_size == 0)
        {
            return Err(format!("service '{}' has a zero rate limit", self.name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_matches_method_and_prefix() {
        let route = RouteRule::prefix("/tasks").with_method("GET");
        assert!(route.matches("GET", "/tasks/42"));
        assert!(route.matches("get", "/tasks"));
        assert!(!route.matches("POST", "/tasks/42"));
        assert!(!route.matches("GET", "/energy"));
    }

    #[test]
    fn test_wildcard_method() {
        let route = RouteRule::prefix("/tasks");
        assert!(route.matches("DELETE", "/tasks/1"));
    }

    #[test]
    fn test_first_match_wins() {
        let svc = ServiceDescriptor::new("tasks", "http://localhost:9000")
            .with_route(RouteRule::prefix("/tasks").with_target_path("/first"))
            .with_route(RouteRule::prefix("/tasks/special").with_target_path("/second"));

        let route = svc.match_route("GET", "/tasks/special/1").unwrap();
        assert_eq!(route.target_path.as_deref(), Some("/first"));
    }

    #[test]
    fn test_attempts_minimum_one() {
        let svc = ServiceDescriptor::new("a", "http://a").with_retry_count(0);
        assert_eq!(svc.attempts(), 1);
    }

    #[test]
    fn test_effective_timeout_prefers_route() {
        let svc = ServiceDescriptor::new("a", "http://a").with_timeout(Duration::from_secs(30));
        let route = RouteRule::prefix("/slow").with_timeout(Duration::from_secs(90));
        assert_eq!(svc.effective_timeout(Some(&route)), Duration::from_secs(90));
        assert_eq!(
            svc.effective_timeout(Some(&RouteRule::prefix("/x"))),
            Duration::from_secs(30)
        );
        assert_eq!(svc.effective_timeout(None), Duration::from_secs(30));
    }

    #[test]
    fn test_health_url_joins_without_double_slash() {
        let svc = ServiceDescriptor::new("a", "http://a:8080/").with_health_check_path("/healthz");
        assert_eq!(svc.health_url(), "http://a:8080/healthz");
    }

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(RateLimitRule::new(60, 5).retry_after_secs(), 1);
        assert_eq!(RateLimitRule::new(120, 5).retry_after_secs(), 1);
        assert_eq!(RateLimitRule::new(25, 5).retry_after_secs(), 3);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let yaml = r#"
name: flowtime
base_url: http://flowtime:8080
strip_prefix: true
routes:
  - path: /tasks
  - path: /energy
    method: POST
    rate_limit:
      requests_per_min: 10
      burst_size: 2
load_balancing:
  strategy: least_connections
  backends: ["http://a", "http://b"]
"#;
        let svc: ServiceDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(svc.health_check_path, "/health");
        assert_eq!(svc.retry_count, 3);
        assert!(svc.auth_required);
        assert_eq!(svc.routes[0].method, "*");
        assert_eq!(svc.routes[1].rate_limit, Some(RateLimitRule::new(10, 2)));
        assert_eq!(
            svc.load_balancing.unwrap().strategy,
            LoadBalancingStrategy::LeastConnections
        );
    }

    #[test]
    fn test_validate_rejects_relative_route() {
        let svc = ServiceDescriptor::new("a", "http://a").with_route(RouteRule::prefix("tasks"));
        assert!(svc.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_rate() {
        let svc = ServiceDescriptor::new("a", "http://a").with_rate_limit(RateLimitRule::new(0, 1));
        assert!(svc.validate().is_err());
    }
}
