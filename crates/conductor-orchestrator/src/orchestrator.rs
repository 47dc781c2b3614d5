//! Main Orchestrator

use crate::error::OrchestrationError;
use crate::request::RequestState;
use chrono::Utc;
use conductor_catalog::CapabilityRegistry;
use conductor_common::{BundleId, CapabilityId, MetricKind, TenantId};
use conductor_entitlement::{
    Bundle, EntitlementEngine, Subscription, SubscriptionChange, SubscriptionManager,
};
use conductor_gateway::{GatewayError, InvokeRequest, ServiceGateway};
use conductor_ledger::{CostEntry, CostRecorder, LedgerError, UsageLedger};
use conductor_pricing::unit_cost;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Orchestrator configuration
#[derive(Clone, Copy, Debug)]
pub struct OrchestratorConfig {
    /// Backend call timeout when the caller does not specify one
    pub default_timeout_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
        }
    }
}

/// The facade the web/API layer calls.
///
/// Given a tenant, a capability and a payload: validate entitlement,
/// reserve usage, invoke the backend through the gateway, record cost,
/// and return a structured result or a typed failure. Failed backend
/// calls always refund the reservation before the caller sees the error.
pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    entitlements: Arc<EntitlementEngine>,
    subscriptions: Arc<SubscriptionManager>,
    ledger: Arc<UsageLedger>,
    gateway: Arc<ServiceGateway>,
    costs: Arc<dyn CostRecorder>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Wire the orchestrator from its engines
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        entitlements: Arc<EntitlementEngine>,
        subscriptions: Arc<SubscriptionManager>,
        ledger: Arc<UsageLedger>,
        gateway: Arc<ServiceGateway>,
        costs: Arc<dyn CostRecorder>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            registry,
            entitlements,
            subscriptions,
            ledger,
            gateway,
            costs,
            config,
        }
    }

    /// Execute a capability request with the default timeout
    pub async fn execute(
        &self,
        tenant_id: TenantId,
        capability_id: &CapabilityId,
        payload: serde_json::Value,
    ) -> Result<Execution, OrchestrationError> {
        self.execute_with_timeout(tenant_id, capability_id, payload, self.config.default_timeout_ms)
            .await
    }

    /// Execute a capability request with a caller-specified timeout.
    ///
    /// Steps, each a possible failure point:
    /// 1. resolve the capability,
    /// 2. check entitlement,
    /// 3. reserve usage,
    /// 4. invoke the backend (releasing the reservation on failure),
    /// 5. commit usage and record cost.
    pub async fn execute_with_timeout(
        &self,
        tenant_id: TenantId,
        capability_id: &CapabilityId,
        payload: serde_json::Value,
        timeout_ms: u64,
    ) -> Result<Execution, OrchestrationError> {
        let request_id = Uuid::new_v4();
        let mut state = RequestState::Pending;

        let capability = self.resolve(capability_id)?.clone();
        self.check_entitlement(&tenant_id, capability_id)?;
        state.advance(RequestState::Entitled);

        let reservation = self
            .reserve(tenant_id, MetricKind::AiOperation, 1)
            .await?;
        state.advance(RequestState::Reserved);

        // The backend call and the commit/release settlement run in a
        // task the caller's cancellation cannot kill, so a dropped
        // caller never orphans the reservation.
        let gateway = self.gateway.clone();
        let ledger = self.ledger.clone();
        let costs = self.costs.clone();
        let capability_id = capability_id.clone();
        let handle = tokio::spawn(async move {
            let mut state = state;
            let request = InvokeRequest {
                capability: capability_id.clone(),
                payload,
                timeout_ms,
                mode: capability.mode,
            };

            match gateway.invoke(&capability.backend, request).await {
                Ok(response) => {
                    state.advance(RequestState::Invoked);
                    if let Err(e) = ledger.commit(reservation).await {
                        tracing::error!(%tenant_id, error = %e, "usage commit failed after backend success");
                    }
                    state.advance(RequestState::Committed);

                    let cost_cents = unit_cost(&capability, response.units_consumed);
                    let entry = CostEntry {
                        id: Uuid::new_v4(),
                        tenant_id,
                        capability: capability_id.clone(),
                        units: response.units_consumed,
                        cents: cost_cents,
                        at: Utc::now(),
                    };
                    // A recording failure must not cost the caller the
                    // result it already obtained.
                    let cost_recorded = match costs.record(entry) {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::warn!(
                                %tenant_id,
                                capability = %capability_id,
                                error = %e,
                                "cost recording failed; flagged for reconciliation"
                            );
                            false
                        }
                    };

                    Ok(Execution {
                        request_id,
                        tenant_id,
                        capability: capability_id,
                        state,
                        result: response.payload,
                        cost_cents,
                        cost_recorded,
                        latency_ms: response.latency_ms,
                    })
                }
                Err(e) => {
                    state.advance(RequestState::Invoked);
                    if let Err(le) = ledger.release(reservation).await {
                        tracing::error!(%tenant_id, error = %le, "reservation release failed");
                    }
                    state.advance(RequestState::Released);
                    Err(Self::map_gateway_error(e))
                }
            }
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => Err(OrchestrationError::Internal(format!(
                "orchestration task failed: {e}"
            ))),
        }
    }

    /// Execute one idempotent capability against a batch of payloads.
    ///
    /// One entitlement check, one reservation of `n` units; units that
    /// fail are released at settlement.
    pub async fn execute_batch(
        &self,
        tenant_id: TenantId,
        capability_id: &CapabilityId,
        payloads: Vec<serde_json::Value>,
    ) -> Result<BatchExecution, OrchestrationError> {
        let request_id = Uuid::new_v4();
        let capability = self.resolve(capability_id)?.clone();
        if !capability.is_idempotent() {
            return Err(OrchestrationError::BatchUnsupported(capability_id.clone()));
        }
        self.check_entitlement(&tenant_id, capability_id)?;

        if payloads.is_empty() {
            return Ok(BatchExecution {
                request_id,
                tenant_id,
                capability: capability_id.clone(),
                items: vec![],
                committed_units: 0,
                released_units: 0,
                cost_cents: 0,
            });
        }

        let amount = payloads.len() as u64;
        let reservation = self
            .reserve(tenant_id, MetricKind::AiOperation, amount)
            .await?;

        let gateway = self.gateway.clone();
        let ledger = self.ledger.clone();
        let costs = self.costs.clone();
        let timeout_ms = self.config.default_timeout_ms;
        let capability_id = capability_id.clone();
        let handle = tokio::spawn(async move {
            let mut items = Vec::with_capacity(payloads.len());
            let mut committed = 0u64;
            let mut units_total = 0u64;

            for payload in payloads {
                let request = InvokeRequest {
                    capability: capability_id.clone(),
                    payload,
                    timeout_ms,
                    mode: capability.mode,
                };
                match gateway.invoke(&capability.backend, request).await {
                    Ok(response) => {
                        committed += 1;
                        units_total += response.units_consumed;
                        items.push(Ok(response.payload));
                    }
                    Err(e) => items.push(Err(Self::map_gateway_error(e).to_string())),
                }
            }

            if let Err(e) = ledger.settle(reservation, committed).await {
                tracing::error!(%tenant_id, error = %e, "batch settlement failed");
            }

            let cost_cents = if committed > 0 {
                let cents = unit_cost(&capability, units_total);
                let entry = CostEntry {
                    id: Uuid::new_v4(),
                    tenant_id,
                    capability: capability_id.clone(),
                    units: units_total,
                    cents,
                    at: Utc::now(),
                };
                if let Err(e) = costs.record(entry) {
                    tracing::warn!(%tenant_id, error = %e, "batch cost recording failed; flagged for reconciliation");
                }
                cents
            } else {
                0
            };

            BatchExecution {
                request_id,
                tenant_id,
                capability: capability_id,
                released_units: amount - committed,
                committed_units: committed,
                items,
                cost_cents,
            }
        });

        handle.await.map_err(|e| {
            OrchestrationError::Internal(format!("orchestration task failed: {e}"))
        })
    }

    /// Provision a tenant: create the subscription and open the first
    /// usage period with the bundle's ceilings.
    pub async fn provision(
        &self,
        tenant_id: TenantId,
        bundle_id: &BundleId,
        seats: u32,
    ) -> Result<Subscription, OrchestrationError> {
        let subscription = self.subscriptions.create(tenant_id, bundle_id, seats)?;
        self.open_period(&subscription).await?;
        Ok(subscription)
    }

    /// Provision a trial tenant
    pub async fn provision_trial(
        &self,
        tenant_id: TenantId,
        bundle_id: &BundleId,
        seats: u32,
        trial_days: u32,
    ) -> Result<Subscription, OrchestrationError> {
        let subscription = self
            .subscriptions
            .start_trial(tenant_id, bundle_id, seats, trial_days)?;
        self.open_period(&subscription).await?;
        Ok(subscription)
    }

    /// Ingest a billing webhook change. Entitlement reflects it
    /// immediately; an upgrade also raises live usage ceilings, while a
    /// downgrade's lower ceilings wait for the next rollover.
    pub async fn handle_subscription_change(
        &self,
        change: SubscriptionChange,
    ) -> Result<Subscription, OrchestrationError> {
        let subscription = self.subscriptions.apply_change(change)?;
        if let Some(bundle) = self.entitlements.bundles().get(&subscription.bundle_id) {
            self.ledger
                .apply_upgrade(subscription.tenant_id, &Self::ceilings_of(bundle))
                .await
                .map_err(|e| OrchestrationError::Internal(e.to_string()))?;
        }
        Ok(subscription)
    }

    /// Billing-cycle rollover: advance the subscription period (applying
    /// any scheduled downgrade) and open fresh usage rows with the
    /// then-current bundle's ceilings.
    pub async fn renew(&self, tenant_id: &TenantId) -> Result<Subscription, OrchestrationError> {
        let subscription = self.subscriptions.renew(tenant_id)?;
        self.open_period(&subscription).await?;
        Ok(subscription)
    }

    /// Subscription manager handle
    pub fn subscriptions(&self) -> Arc<SubscriptionManager> {
        self.subscriptions.clone()
    }

    /// Usage ledger handle
    pub fn ledger(&self) -> Arc<UsageLedger> {
        self.ledger.clone()
    }

    /// Entitlement engine handle
    pub fn entitlements(&self) -> Arc<EntitlementEngine> {
        self.entitlements.clone()
    }

    fn resolve(
        &self,
        capability_id: &CapabilityId,
    ) -> Result<&conductor_catalog::Capability, OrchestrationError> {
        self.registry.resolve(capability_id).map_err(|_| {
            // Always a programming/config error, never user-triggerable.
            tracing::error!(
                capability = %capability_id,
                "request references capability absent from catalog"
            );
            OrchestrationError::UnknownCapability(capability_id.clone())
        })
    }

    fn check_entitlement(
        &self,
        tenant_id: &TenantId,
        capability_id: &CapabilityId,
    ) -> Result<(), OrchestrationError> {
        let entitled = self
            .subscriptions
            .get(tenant_id)
            .map(|s| self.entitlements.is_entitled(&s, capability_id))
            .unwrap_or(false);
        if entitled {
            return Ok(());
        }
        let recommended = self.entitlements.recommend_upgrade(capability_id).ok().cloned();
        Err(OrchestrationError::NotEntitled {
            capability: capability_id.clone(),
            recommended,
        })
    }

    async fn reserve(
        &self,
        tenant_id: TenantId,
        kind: MetricKind,
        amount: u64,
    ) -> Result<conductor_ledger::Reservation, OrchestrationError> {
        self.ledger
            .check_and_reserve(tenant_id, kind, amount)
            .await
            .map_err(|e| match e {
                LedgerError::QuotaExceeded { current, ceiling } => {
                    OrchestrationError::QuotaExceeded { current, ceiling }
                }
                other => OrchestrationError::Internal(other.to_string()),
            })
    }

    async fn open_period(&self, subscription: &Subscription) -> Result<(), OrchestrationError> {
        let bundle = self
            .entitlements
            .bundles()
            .get(&subscription.bundle_id)
            .ok_or_else(|| {
                OrchestrationError::Internal(format!(
                    "subscription references unknown bundle {}",
                    subscription.bundle_id
                ))
            })?;
        self.ledger
            .rollover(
                subscription.tenant_id,
                subscription.current_period_start,
                subscription.current_period_end,
                &Self::ceilings_of(bundle),
            )
            .await
            .map_err(|e| OrchestrationError::Internal(e.to_string()))
    }

    fn ceilings_of(bundle: &Bundle) -> Vec<(MetricKind, u64)> {
        vec![
            (MetricKind::ApiCall, bundle.ceilings.max_api_calls),
            (MetricKind::AiOperation, bundle.ceilings.max_ai_operations),
            (MetricKind::StorageByte, bundle.ceilings.max_storage_bytes),
        ]
    }

    fn map_gateway_error(e: GatewayError) -> OrchestrationError {
        match e {
            GatewayError::BackendUnavailable { backend, retry_after } => {
                OrchestrationError::BackendUnavailable { backend, retry_after }
            }
            GatewayError::BackendError { backend, detail } => {
                OrchestrationError::BackendError { backend, detail }
            }
            GatewayError::UnknownBackend(backend) => {
                tracing::error!(%backend, "capability bound to unregistered backend");
                OrchestrationError::BackendError {
                    backend,
                    detail: "no binding registered".into(),
                }
            }
        }
    }
}

/// Successful orchestration outcome
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Execution {
    /// Request identifier
    pub request_id: Uuid,
    /// Calling tenant
    pub tenant_id: TenantId,
    /// Invoked capability
    pub capability: CapabilityId,
    /// Final request state (always committed on success)
    pub state: RequestState,
    /// Backend result payload
    pub result: serde_json::Value,
    /// Cost incurred in cents
    pub cost_cents: i64,
    /// False when cost recording failed and the entry is flagged for
    /// reconciliation
    pub cost_recorded: bool,
    /// Backend-observed latency
    pub latency_ms: u64,
}

/// Batch orchestration outcome
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchExecution {
    /// Request identifier
    pub request_id: Uuid,
    /// Calling tenant
    pub tenant_id: TenantId,
    /// Invoked capability
    pub capability: CapabilityId,
    /// Per-item results, in input order
    pub items: Vec<Result<serde_json::Value, String>>,
    /// Units committed against the quota
    pub committed_units: u64,
    /// Units refunded at settlement
    pub released_units: u64,
    /// Cost incurred in cents across successful items
    pub cost_cents: i64,
}
