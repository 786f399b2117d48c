//! Background health monitor
//!
//! Runs one sweep immediately and then one per `check_interval`. A sweep
//! probes every registered service concurrently and waits for all probes
//! before the next tick. The loop exits when the shutdown signal flips to
//! `true` or its sender is dropped.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

use crate::health::{HealthMonitorConfig, HealthProbe};
use crate::registry::ServiceRegistry;

/// Periodic prober feeding the registry
pub struct HealthMonitor {
    registry: Arc<ServiceRegistry>,
    probe: Arc<dyn HealthProbe>,
    config: HealthMonitorConfig,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        probe: Arc<dyn HealthProbe>,
        config: HealthMonitorConfig,
    ) -> Self {
        Self {
            registry,
            probe,
            config,
        }
    }

    /// Probe every registered service once, concurrently
    ///
    /// Returns the number of outcomes applied to the registry.
    pub async fn sweep(&self) -> usize {
        let targets = self.registry.probe_targets();
        if targets.is_empty() {
            return 0;
        }

        let probes = targets.into_iter().map(|(descriptor, breaker)| {
            let probe = Arc::clone(&self.probe);
            let registry = Arc::clone(&self.registry);
            async move {
                let outcome = probe.probe(&descriptor).await;
                if !outcome.success {
                    tracing::warn!(
                        service = %descriptor.name,
                        url = %descriptor.health_url(),
                        latency_ms = outcome.latency.as_millis() as u64,
                        error = outcome.error.as_deref().unwrap_or(""),
                        "Health check failed"
                    );
                } else {
                    tracing::debug!(
                        service = %descriptor.name,
                        latency_ms = outcome.latency.as_millis() as u64,
                        "Health check passed"
                    );
                }
                registry.record_probe(&descriptor.name, &breaker, &outcome)
            }
        });

        join_all(probes).await.into_iter().filter(|applied| *applied).count()
    }

    /// Sweep loop; returns once shutdown is signalled
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.config.check_interval.as_secs(),
            services = self.registry.len(),
            "Health monitor started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                // First tick completes immediately
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = self.sweep() => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        tracing::info!("Health monitor stopped");
    }

    /// Spawn the loop with its own shutdown signal
    pub fn start(self) -> MonitorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { self.run(shutdown_rx).await });
        MonitorHandle {
            shutdown_tx,
            handle,
        }
    }
}

/// Handle to a monitor started with [`HealthMonitor::start`]
pub struct MonitorHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal shutdown and wait for the loop to exit
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!("Health monitor task failed: {}", e);
        }
    }
}
