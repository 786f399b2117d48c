//! Route table and path rewriting
//!
//! Resolves an inbound `(method, path)` to a service and route rule, and
//! computes the outgoing path for the matched rule:
//! - `target_path` set: the matched prefix is replaced by the target
//! - `strip_prefix` on the service: the external API prefix is removed
//! - otherwise the path is forwarded unchanged

use flowgate_core::{RateLimitRule, RouteRule, ServiceDescriptor};
use std::sync::Arc;

/// Strip the external API prefix from `path`
///
/// The prefix must be followed by `/` or the end of the path; an empty
/// remainder becomes `/`. Returns `None` for paths outside the prefix.
pub fn normalize_path<'a>(path: &'a str, api_prefix: &str) -> Option<&'a str> {
    let prefix = api_prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return Some(if path.is_empty() { "/" } else { path });
    }
    match path.strip_prefix(prefix) {
        Some("") => Some("/"),
        Some(rest) if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

/// Outgoing path (without query) for a matched route
pub fn rewrite_path(
    service: &ServiceDescriptor,
    route: &RouteRule,
    full_path: &str,
    api_prefix: &str,
) -> String {
    let relative = normalize_path(full_path, api_prefix).unwrap_or(full_path);

    if let Some(target) = &route.target_path {
        let rest = relative.strip_prefix(route.path.as_str()).unwrap_or("");
        return join_paths(target, rest);
    }

    if service.strip_prefix {
        relative.to_string()
    } else {
        full_path.to_string()
    }
}

fn join_paths(base: &str, rest: &str) -> String {
    if rest.is_empty() {
        return base.to_string();
    }
    match (base.ends_with('/'), rest.starts_with('/')) {
        (true, true) => format!("{}{}", base, &rest[1..]),
        _ => format!("{}{}", base, rest),
    }
}

/// A service and the first of its rules matching a request
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub service: Arc<ServiceDescriptor>,
    route_index: usize,
}

impl RouteMatch {
    pub fn route(&self) -> &RouteRule {
        &self.service.routes[self.route_index]
    }

    /// Route override, else the service override
    pub fn rate_limit(&self) -> Option<RateLimitRule> {
        self.route().rate_limit.or(self.service.rate_limit)
    }
}

/// Ordered service table used for catch-all dispatch
///
/// Services are scanned in configuration order and each service's rules in
/// order; the first structural match wins.
#[derive(Debug, Clone)]
pub struct ServiceDirectory {
    services: Vec<Arc<ServiceDescriptor>>,
    api_prefix: String,
}

impl ServiceDirectory {
    pub fn new(services: Vec<ServiceDescriptor>, api_prefix: impl Into<String>) -> Self {
        Self {
            services: services.into_iter().map(Arc::new).collect(),
            api_prefix: api_prefix.into(),
        }
    }

    pub fn api_prefix(&self) -> &str {
        &self.api_prefix
    }

    pub fn services(&self) -> &[Arc<ServiceDescriptor>] {
        &self.services
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ServiceDescriptor>> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Find the service and route for a full inbound path
    pub fn resolve(&self, method: &str, full_path: &str) -> Option<RouteMatch> {
        let path = normalize_path(full_path, &self.api_prefix)?;

        let found = self.services.iter().find_map(|service| {
            service
                .routes
                .iter()
                .position(|r| r.matches(method, path))
                .map(|route_index| RouteMatch {
                    service: Arc::clone(service),
                    route_index,
                })
        });

        match &found {
            Some(m) => tracing::debug!(
                method,
                path,
                service = %m.service.name,
                prefix = %m.route().path,
                "Matched route"
            ),
            None => tracing::debug!(method, path, "No route matched"),
        }
        found
    }

    /// Route within one named service
    pub fn resolve_in(&self, service: &str, method: &str, full_path: &str) -> Option<RouteMatch> {
        let path = normalize_path(full_path, &self.api_prefix)?;
        let service = self.get(service)?;
        service
            .routes
            .iter()
            .position(|r| r.matches(method, path))
            .map(|route_index| RouteMatch {
                service: Arc::clone(service),
                route_index,
            })
    }
}
