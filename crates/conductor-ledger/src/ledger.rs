//! Two-phase usage ledger

use crate::store::{PeriodKey, StoreError, UsageMetric, UsageStore};
use chrono::{DateTime, Utc};
use conductor_common::{ErrorCode, MetricKind, TenantId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Usage ledger over a pluggable store.
///
/// The orchestrator reserves before invoking the external backend,
/// commits on success and releases on failure, so failed calls never
/// count against the tenant's quota.
pub struct UsageLedger {
    store: Arc<dyn UsageStore>,
    audit: Arc<RwLock<Vec<AdminAdjustment>>>,
}

impl UsageLedger {
    /// Ledger over the given store
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self {
            store,
            audit: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Open a fresh period for every metric kind at billing rollover.
    ///
    /// The ceiling snapshot is the *current* bundle's ceiling at rollover
    /// time: a mid-period downgrade's lower ceiling takes effect here, not
    /// before.
    pub async fn rollover(
        &self,
        tenant_id: TenantId,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        ceilings: &[(MetricKind, u64)],
    ) -> Result<(), LedgerError> {
        for (kind, ceiling) in ceilings {
            self.store
                .open_period(
                    PeriodKey { tenant_id, kind: *kind },
                    period_start,
                    period_end,
                    *ceiling,
                )
                .await?;
        }
        tracing::info!(%tenant_id, "usage period rolled over");
        Ok(())
    }

    /// Raise live ceilings after an upgrade. Lower ceilings are ignored;
    /// a downgrade waits for the next rollover.
    pub async fn apply_upgrade(
        &self,
        tenant_id: TenantId,
        ceilings: &[(MetricKind, u64)],
    ) -> Result<(), LedgerError> {
        for (kind, ceiling) in ceilings {
            self.store
                .raise_ceiling(PeriodKey { tenant_id, kind: *kind }, *ceiling)
                .await?;
        }
        Ok(())
    }

    /// Reserve quota ahead of a costed operation.
    ///
    /// Atomic check-then-increment: a reservation never pushes charged
    /// usage above the ceiling snapshot.
    pub async fn check_and_reserve(
        &self,
        tenant_id: TenantId,
        kind: MetricKind,
        amount: u64,
    ) -> Result<Reservation, LedgerError> {
        let key = PeriodKey { tenant_id, kind };
        match self.store.try_reserve(key, amount).await {
            Ok(row) => Ok(Reservation {
                id: Uuid::new_v4(),
                tenant_id,
                kind,
                amount,
                period_start: row.period_start,
            }),
            Err(StoreError::CeilingReached { charged, ceiling }) => {
                Err(LedgerError::QuotaExceeded { current: charged, ceiling })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Commit a reservation after the costed operation succeeded
    pub async fn commit(&self, reservation: Reservation) -> Result<(), LedgerError> {
        let key = PeriodKey {
            tenant_id: reservation.tenant_id,
            kind: reservation.kind,
        };
        self.store
            .commit(key, reservation.period_start, reservation.amount)
            .await?;
        Ok(())
    }

    /// Settle a multi-unit reservation: commit the units that succeeded,
    /// release the rest
    pub async fn settle(
        &self,
        reservation: Reservation,
        committed: u64,
    ) -> Result<(), LedgerError> {
        let key = PeriodKey {
            tenant_id: reservation.tenant_id,
            kind: reservation.kind,
        };
        let commit_amount = committed.min(reservation.amount);
        let release_amount = reservation.amount - commit_amount;
        if commit_amount > 0 {
            self.store
                .commit(key, reservation.period_start, commit_amount)
                .await?;
        }
        if release_amount > 0 {
            self.store
                .release(key, reservation.period_start, release_amount)
                .await?;
            tracing::warn!(
                tenant_id = %reservation.tenant_id,
                kind = reservation.kind.as_str(),
                released = release_amount,
                "partial reservation released"
            );
        }
        Ok(())
    }

    /// Release a reservation after the costed operation failed
    pub async fn release(&self, reservation: Reservation) -> Result<(), LedgerError> {
        let key = PeriodKey {
            tenant_id: reservation.tenant_id,
            kind: reservation.kind,
        };
        self.store
            .release(key, reservation.period_start, reservation.amount)
            .await?;
        tracing::warn!(
            tenant_id = %reservation.tenant_id,
            kind = reservation.kind.as_str(),
            amount = reservation.amount,
            "usage reservation released"
        );
        Ok(())
    }

    /// Active usage row
    pub async fn usage(&self, tenant_id: TenantId, kind: MetricKind) -> Option<UsageMetric> {
        self.store.get(PeriodKey { tenant_id, kind }).await
    }

    /// Archived periods for billing reconciliation
    pub async fn history(&self, tenant_id: TenantId, kind: MetricKind) -> Vec<UsageMetric> {
        self.store.history(PeriodKey { tenant_id, kind }).await
    }

    /// Administrative correction. Bypasses ceilings, may decrement (the
    /// only decrement path), and is always audited.
    pub async fn admin_adjust(
        &self,
        tenant_id: TenantId,
        kind: MetricKind,
        delta: i64,
        actor: &str,
        reason: &str,
    ) -> Result<u64, LedgerError> {
        let consumed = self
            .store
            .adjust(PeriodKey { tenant_id, kind }, delta)
            .await?;
        let entry = AdminAdjustment {
            id: Uuid::new_v4(),
            tenant_id,
            kind,
            delta,
            actor: actor.to_string(),
            reason: reason.to_string(),
            at: Utc::now(),
        };
        tracing::info!(
            %tenant_id,
            kind = kind.as_str(),
            delta,
            actor,
            reason,
            "admin usage adjustment"
        );
        self.audit.write().push(entry);
        Ok(consumed)
    }

    /// Audit trail of administrative corrections
    pub fn audit_trail(&self) -> Vec<AdminAdjustment> {
        self.audit.read().clone()
    }
}

/// Provisional quota debit. Committed or released exactly once based on
/// the outcome of the operation it covers.
#[derive(Clone, Debug)]
pub struct Reservation {
    /// Reservation identifier
    pub id: Uuid,
    /// Tenant
    pub tenant_id: TenantId,
    /// Metric kind
    pub kind: MetricKind,
    /// Reserved amount
    pub amount: u64,
    /// Period the reservation was made against
    pub period_start: DateTime<Utc>,
}

/// Audited administrative correction
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdminAdjustment {
    /// Adjustment identifier
    pub id: Uuid,
    /// Tenant
    pub tenant_id: TenantId,
    /// Metric kind
    pub kind: MetricKind,
    /// Signed correction applied to consumed
    pub delta: i64,
    /// Operator who made the correction
    pub actor: String,
    /// Stated reason
    pub reason: String,
    /// When
    pub at: DateTime<Utc>,
}

/// Ledger errors
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Reservation denied: ceiling would be exceeded
    #[error("quota exceeded: {current}/{ceiling}")]
    QuotaExceeded {
        /// Charged usage at check time, for client display
        current: u64,
        /// Ceiling snapshot, for client display
        ceiling: u64,
    },

    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ErrorCode for LedgerError {
    fn code(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Store(_) => "usage_store_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryUsageStore;
    use chrono::Duration;

    fn ledger() -> UsageLedger {
        UsageLedger::new(Arc::new(InMemoryUsageStore::new()))
    }

    async fn open(ledger: &UsageLedger, tenant: TenantId, ceiling: u64) {
        let start = Utc::now();
        ledger
            .rollover(
                tenant,
                start,
                start + Duration::days(30),
                &[(MetricKind::AiOperation, ceiling)],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reserve_commit() {
        let ledger = ledger();
        let tenant = Uuid::new_v4();
        open(&ledger, tenant, 10).await;

        let reservation = ledger
            .check_and_reserve(tenant, MetricKind::AiOperation, 3)
            .await
            .unwrap();
        let row = ledger.usage(tenant, MetricKind::AiOperation).await.unwrap();
        assert_eq!(row.pending, 3);
        assert_eq!(row.consumed, 0);

        ledger.commit(reservation).await.unwrap();
        let row = ledger.usage(tenant, MetricKind::AiOperation).await.unwrap();
        assert_eq!(row.pending, 0);
        assert_eq!(row.consumed, 3);
    }

    #[tokio::test]
    async fn test_release_leaves_counter_unchanged() {
        let ledger = ledger();
        let tenant = Uuid::new_v4();
        open(&ledger, tenant, 10).await;

        let before = ledger.usage(tenant, MetricKind::AiOperation).await.unwrap();
        let reservation = ledger
            .check_and_reserve(tenant, MetricKind::AiOperation, 5)
            .await
            .unwrap();
        ledger.release(reservation).await.unwrap();

        let after = ledger.usage(tenant, MetricKind::AiOperation).await.unwrap();
        assert_eq!(after.consumed, before.consumed);
        assert_eq!(after.pending, 0);
    }

    #[tokio::test]
    async fn test_quota_exceeded_reports_usage() {
        let ledger = ledger();
        let tenant = Uuid::new_v4();
        open(&ledger, tenant, 1000).await;

        ledger
            .admin_adjust(tenant, MetricKind::AiOperation, 999, "ops", "seed")
            .await
            .unwrap();

        // 999 -> 1000 still fits
        let reservation = ledger
            .check_and_reserve(tenant, MetricKind::AiOperation, 1)
            .await
            .unwrap();
        ledger.commit(reservation).await.unwrap();

        // second call is refused with current/ceiling attached
        let err = ledger
            .check_and_reserve(tenant, MetricKind::AiOperation, 1)
            .await
            .unwrap_err();
        match err {
            LedgerError::QuotaExceeded { current, ceiling } => {
                assert_eq!(current, 1000);
                assert_eq!(ceiling, 1000);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_overshoot() {
        let ledger = Arc::new(ledger());
        let tenant = Uuid::new_v4();
        let n = 16u64;
        open(&ledger, tenant, n - 1).await;

        let mut handles = Vec::new();
        for _ in 0..n {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .check_and_reserve(tenant, MetricKind::AiOperation, 1)
                    .await
            }));
        }

        let mut ok = 0;
        let mut exceeded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(LedgerError::QuotaExceeded { .. }) => exceeded += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, n - 1);
        assert_eq!(exceeded, 1);

        let row = ledger.usage(tenant, MetricKind::AiOperation).await.unwrap();
        assert!(row.charged() <= row.ceiling);
    }

    #[tokio::test]
    async fn test_rollover_snapshots_current_ceiling() {
        let ledger = ledger();
        let tenant = Uuid::new_v4();
        open(&ledger, tenant, 1000).await;

        let reservation = ledger
            .check_and_reserve(tenant, MetricKind::AiOperation, 10)
            .await
            .unwrap();
        ledger.commit(reservation).await.unwrap();

        // Downgrade mid-period: live ceiling unchanged
        ledger
            .apply_upgrade(tenant, &[(MetricKind::AiOperation, 200)])
            .await
            .unwrap();
        let row = ledger.usage(tenant, MetricKind::AiOperation).await.unwrap();
        assert_eq!(row.ceiling, 1000);

        // Upgrade mid-period: live ceiling raised immediately
        ledger
            .apply_upgrade(tenant, &[(MetricKind::AiOperation, 20_000)])
            .await
            .unwrap();
        let row = ledger.usage(tenant, MetricKind::AiOperation).await.unwrap();
        assert_eq!(row.ceiling, 20_000);

        // Next rollover takes the then-current bundle ceiling and resets
        // consumption; the old row is archived for reconciliation.
        open(&ledger, tenant, 200).await;
        let row = ledger.usage(tenant, MetricKind::AiOperation).await.unwrap();
        assert_eq!(row.ceiling, 200);
        assert_eq!(row.consumed, 0);

        let history = ledger.history(tenant, MetricKind::AiOperation).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].consumed, 10);
    }

    #[tokio::test]
    async fn test_admin_adjust_is_audited_and_may_decrement() {
        let ledger = ledger();
        let tenant = Uuid::new_v4();
        open(&ledger, tenant, 100).await;

        ledger
            .admin_adjust(tenant, MetricKind::AiOperation, 50, "ops", "migration backfill")
            .await
            .unwrap();
        let consumed = ledger
            .admin_adjust(tenant, MetricKind::AiOperation, -20, "ops", "double count fix")
            .await
            .unwrap();
        assert_eq!(consumed, 30);

        let trail = ledger.audit_trail();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1].delta, -20);
        assert_eq!(trail[1].actor, "ops");
    }
}
