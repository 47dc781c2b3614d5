//! Backend health monitoring

use crate::backend::{BindingHealth, HealthState};
use crate::gateway::ServiceGateway;
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Periodic health-check loop.
///
/// Runs independently of request traffic and can force a circuit open on
/// repeated probe failures even when no calls are flowing. Request
/// handling reads the resulting snapshots without blocking.
pub struct HealthMonitor {
    gateway: Arc<ServiceGateway>,
}

impl HealthMonitor {
    /// Monitor over the gateway's bindings
    pub fn new(gateway: Arc<ServiceGateway>) -> Self {
        Self { gateway }
    }

    /// Run forever at the configured interval. Spawn as a background
    /// task.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.gateway.config().health_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.check_all().await;
        }
    }

    /// Probe every binding once
    pub async fn check_all(&self) {
        let threshold = self.gateway.config().probe_failure_threshold;

        for (backend, binding) in self.gateway.all_bindings() {
            let probe = binding.client.health_check().await;
            binding.health.store(Arc::new(BindingHealth {
                state: probe.status,
                last_checked: Utc::now(),
                latency_ms: probe.latency_ms,
            }));

            match probe.status {
                HealthState::Healthy => {
                    binding.probe_failures.store(0, Ordering::Relaxed);
                }
                HealthState::Degraded => {
                    tracing::info!(%backend, message = %probe.message, "backend degraded");
                }
                HealthState::Unavailable => {
                    let failures = binding.probe_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(%backend, failures, message = %probe.message, "backend probe failed");
                    if failures >= threshold {
                        binding.breaker.force_open();
                    }
                }
            }
        }
    }
}
