//! Service registry
//!
//! Owns the registered services together with their health snapshot and
//! circuit breaker. The three are stored in one entry so registration and
//! removal are atomic as a unit. Locks are held only for in-memory work;
//! probes and breaker checks run on cloned handles.

use flowgate_core::{
    Error, HealthStatus, Result, ServiceDescriptor, ServiceHealth, UnavailableReason,
};
use flowgate_observability::{CircuitBreakerState, ServiceStatus, ServiceStatusSource};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, SharedCircuitBreaker,
};
use crate::health::ProbeOutcome;

#[derive(Debug)]
struct ServiceEntry {
    descriptor: Arc<ServiceDescriptor>,
    health: ServiceHealth,
    breaker: SharedCircuitBreaker,
}

/// Registered services with their health and breaker state
#[derive(Debug)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, ServiceEntry>>,
    breaker_config: CircuitBreakerConfig,
}

impl ServiceRegistry {
    pub fn new(breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            breaker_config,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, ServiceEntry>> {
        self.services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, ServiceEntry>> {
        self.services
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add or replace a service; health starts `unknown` with a fresh closed breaker
    pub fn register(&self, descriptor: ServiceDescriptor) {
        let name = descriptor.name.clone();
        let entry = ServiceEntry {
            health: ServiceHealth::unknown(&name, &descriptor.base_url),
            breaker: Arc::new(CircuitBreaker::new(&name, self.breaker_config.clone())),
            descriptor: Arc::new(descriptor),
        };

        if let Some(lb) = &entry.descriptor.load_balancing
            && !lb.backends.is_empty()
        {
            tracing::info!(
                service = %name,
                backends = lb.backends.len(),
                "Load-balancing backends configured; forwarding uses base_url only"
            );
        }

        tracing::info!(service = %name, url = %entry.descriptor.base_url, "Service registered");
        self.write().insert(name, entry);
    }

    /// Remove a service; returns false if it was not registered
    pub fn deregister(&self, name: &str) -> bool {
        let removed = self.write().remove(name).is_some();
        if removed {
            tracing::info!(service = %name, "Service deregistered");
        }
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Registered names, sorted
    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn descriptor(&self, name: &str) -> Option<Arc<ServiceDescriptor>> {
        self.read().get(name).map(|e| Arc::clone(&e.descriptor))
    }

    pub fn circuit(&self, name: &str) -> Option<SharedCircuitBreaker> {
        self.read().get(name).map(|e| Arc::clone(&e.breaker))
    }

    /// Most recent health snapshot
    pub fn health_snapshot(&self, name: &str) -> Result<ServiceHealth> {
        self.read()
            .get(name)
            .map(|e| e.health.clone())
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))
    }

    /// Copy of every snapshot, keyed by service name
    pub fn all_health_snapshots(&self) -> HashMap<String, ServiceHealth> {
        self.read()
            .iter()
            .map(|(name, e)| (name.clone(), e.health.clone()))
            .collect()
    }

    /// The single gate consulted before every proxy attempt
    ///
    /// Succeeds only if the last probe was healthy and the breaker allows an
    /// attempt. The breaker is consulted only for healthy services, since
    /// that query may move an open breaker to half-open.
    pub fn resolve_healthy(&self, name: &str) -> Result<Arc<ServiceDescriptor>> {
        let (descriptor, status, breaker) = {
            let services = self.read();
            let entry = services
                .get(name)
                .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
            (
                Arc::clone(&entry.descriptor),
                entry.health.status,
                Arc::clone(&entry.breaker),
            )
        };

        let unavailable = |reason| Error::ServiceUnavailable {
            service: name.to_string(),
            reason,
        };

        match status {
            HealthStatus::Healthy => {}
            HealthStatus::Unknown => {
                return Err(unavailable(UnavailableReason::HealthUnknown));
            }
            _ => return Err(unavailable(UnavailableReason::Unhealthy)),
        }

        if !breaker.can_attempt() {
            return Err(unavailable(UnavailableReason::CircuitOpen));
        }

        Ok(descriptor)
    }

    /// Everything a sweep needs, copied out so no lock is held during probes
    pub(crate) fn probe_targets(&self) -> Vec<(Arc<ServiceDescriptor>, SharedCircuitBreaker)> {
        self.read()
            .values()
            .map(|e| (Arc::clone(&e.descriptor), Arc::clone(&e.breaker)))
            .collect()
    }

    /// Apply a probe outcome to the health snapshot and the breaker
    ///
    /// Dropped when the service was deregistered or re-registered since the
    /// probe started, so a late result never resurrects or corrupts an entry.
    pub fn record_probe(
        &self,
        name: &str,
        breaker: &SharedCircuitBreaker,
        outcome: &ProbeOutcome,
    ) -> bool {
        let mut services = self.write();
        let Some(entry) = services.get_mut(name) else {
            return false;
        };
        if !Arc::ptr_eq(&entry.breaker, breaker) {
            return false;
        }

        let url = entry.descriptor.base_url.clone();
        entry.health = if outcome.success {
            ServiceHealth::healthy(name, url, outcome.latency)
        } else {
            ServiceHealth::unhealthy(
                name,
                url,
                outcome.latency,
                outcome.error.clone().unwrap_or_default(),
            )
        };
        drop(services);

        if outcome.success {
            breaker.record_success();
        } else {
            breaker.record_failure();
        }
        true
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl From<CircuitState> for CircuitBreakerState {
    fn from(state: CircuitState) -> Self {
        match state {
            CircuitState::Closed => CircuitBreakerState::Closed,
            CircuitState::Open => CircuitBreakerState::Open,
            CircuitState::HalfOpen => CircuitBreakerState::HalfOpen,
        }
    }
}

impl ServiceStatusSource for ServiceRegistry {
    fn service_statuses(&self) -> Vec<ServiceStatus> {
        let mut statuses: Vec<ServiceStatus> = self
            .read()
            .values()
            .map(|e| ServiceStatus {
                health: e.health.clone(),
                circuit: e.breaker.state().into(),
            })
            .collect();
        statuses.sort_by(|a, b| a.health.name.cmp(&b.health.name));
        statuses
    }
}
