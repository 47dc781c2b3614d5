//! Service gateway

use crate::backend::{
    BackendClient, BindingHealth, CredentialRef, InvokeRequest, InvokeResponse,
};
use crate::breaker::{BreakerConfig, CircuitBreaker, CircuitState, Permit};
use arc_swap::ArcSwap;
use conductor_catalog::{CapabilityRegistry, InvocationMode};
use conductor_common::{BackendId, ErrorCode};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Gateway configuration
#[derive(Clone, Copy, Debug)]
pub struct GatewayConfig {
    /// Retry policy for idempotent calls
    pub retry: RetryPolicy,
    /// Circuit breaker settings, applied per binding
    pub breaker: BreakerConfig,
    /// Health probe interval
    pub health_interval: Duration,
    /// Consecutive probe failures before the health loop force-opens a
    /// circuit
    pub probe_failure_threshold: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            health_interval: Duration::from_secs(30),
            probe_failure_threshold: 3,
        }
    }
}

/// Retry policy. Applies to idempotent capability calls only;
/// side-effecting calls are never auto-retried.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base backoff between attempts, doubled each retry
    pub base_backoff: Duration,
    /// Upper bound of the random jitter added to each backoff
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff: Duration::from_millis(100),
            max_jitter: Duration::from_millis(50),
        }
    }
}

pub(crate) struct Binding {
    pub(crate) client: Arc<dyn BackendClient>,
    pub(crate) credentials: CredentialRef,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) health: ArcSwap<BindingHealth>,
    pub(crate) probe_failures: AtomicU32,
}

/// Uniform entry point to every external backend.
///
/// Bindings are registered at startup; the request path only reads the
/// binding map.
pub struct ServiceGateway {
    bindings: RwLock<HashMap<BackendId, Arc<Binding>>>,
    config: GatewayConfig,
}

impl ServiceGateway {
    /// Gateway with the given policy
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Register a backend binding
    pub fn register(&self, client: Arc<dyn BackendClient>, credentials: CredentialRef) {
        let backend = client.id();
        let binding = Arc::new(Binding {
            client,
            credentials,
            breaker: CircuitBreaker::new(self.config.breaker),
            health: ArcSwap::from_pointee(BindingHealth::unknown()),
            probe_failures: AtomicU32::new(0),
        });
        tracing::info!(%backend, "backend binding registered");
        self.bindings.write().insert(backend, binding);
    }

    /// Registered backend identifiers
    pub fn backend_ids(&self) -> HashSet<BackendId> {
        self.bindings.read().keys().cloned().collect()
    }

    /// Invoke a capability on a backend, applying timeout, retry and
    /// circuit-breaker policy.
    pub async fn invoke(
        &self,
        backend: &BackendId,
        request: InvokeRequest,
    ) -> Result<InvokeResponse, GatewayError> {
        let binding = self
            .binding(backend)
            .ok_or_else(|| GatewayError::UnknownBackend(backend.clone()))?;

        let permit = binding.breaker.try_acquire().map_err(|retry_after| {
            GatewayError::BackendUnavailable {
                backend: backend.clone(),
                retry_after,
            }
        })?;

        // The half-open probe is a single shot; so is anything
        // side-effecting.
        let max_attempts = if permit == Permit::Probe || request.mode == InvocationMode::SideEffecting
        {
            1
        } else {
            1 + self.config.retry.max_retries
        };

        let timeout = Duration::from_millis(request.timeout_ms);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.backoff(attempt)).await;
            }

            match tokio::time::timeout(timeout, binding.client.invoke(&request)).await {
                Ok(Ok(response)) => {
                    binding.breaker.record_success();
                    return Ok(response);
                }
                Ok(Err(e)) => {
                    binding.breaker.record_failure();
                    last_error = e.to_string();
                }
                Err(_) => {
                    binding.breaker.record_failure();
                    last_error = format!("timed out after {}ms", request.timeout_ms);
                }
            }
            tracing::warn!(
                %backend,
                capability = %request.capability,
                attempt,
                error = %last_error,
                "backend call attempt failed"
            );
        }

        Err(GatewayError::BackendError {
            backend: backend.clone(),
            detail: last_error,
        })
    }

    /// Credential handle a protocol client resolves before connecting
    pub fn credential_ref(&self, backend: &BackendId) -> Option<CredentialRef> {
        self.binding(backend).map(|b| b.credentials.clone())
    }

    /// Health snapshot and circuit state of a binding
    pub fn binding_status(&self, backend: &BackendId) -> Option<(BindingHealth, CircuitState)> {
        let binding = self.binding(backend)?;
        let health = (*binding.health.load_full()).clone();
        Some((health, binding.breaker.state()))
    }

    /// Cross-check catalog bindings against each backend's advertised
    /// capability list. Drift is logged for operators; it does not fail
    /// startup because the catalog, not the advertisement, is
    /// authoritative.
    pub async fn verify_catalog(&self, registry: &CapabilityRegistry) {
        for (backend, binding) in self.all_bindings() {
            let expected: HashSet<String> = registry
                .for_backend(&backend)
                .iter()
                .map(|c| c.id.as_str().to_string())
                .collect();
            match binding.client.describe().await {
                Ok(description) => {
                    let advertised: HashSet<String> =
                        description.capabilities.into_iter().collect();
                    for missing in expected.difference(&advertised) {
                        tracing::warn!(
                            %backend,
                            capability = %missing,
                            "catalog maps capability the backend does not advertise"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(%backend, error = %e, "backend description unavailable");
                }
            }
        }
    }

    pub(crate) fn binding(&self, backend: &BackendId) -> Option<Arc<Binding>> {
        self.bindings.read().get(backend).cloned()
    }

    pub(crate) fn all_bindings(&self) -> Vec<(BackendId, Arc<Binding>)> {
        self.bindings
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.retry.base_backoff * 2u32.pow(attempt - 1);
        let jitter_ms = self.config.retry.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        base + jitter
    }
}

/// Gateway errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No binding registered for the backend (configuration defect)
    #[error("unknown backend: {0}")]
    UnknownBackend(BackendId),

    /// Circuit open; the backend is not being contacted
    #[error("backend {backend} unavailable, retry after {retry_after:?}")]
    BackendUnavailable {
        /// Affected backend
        backend: BackendId,
        /// Suggested cooldown before retrying
        retry_after: Duration,
    },

    /// Call failed after allowed retries
    #[error("backend {backend} error: {detail}")]
    BackendError {
        /// Affected backend, for operator root-causing
        backend: BackendId,
        /// Last attempt's failure detail
        detail: String,
    },
}

impl ErrorCode for GatewayError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownBackend(_) => "unknown_backend",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::BackendError { .. } => "backend_error",
        }
    }
}
