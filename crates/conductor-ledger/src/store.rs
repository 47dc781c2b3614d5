//! Usage storage interface

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_common::{MetricKind, TenantId};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Key of the active usage row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeriodKey {
    /// Tenant
    pub tenant_id: TenantId,
    /// Metric kind
    pub kind: MetricKind,
}

/// Consumption counter for one (tenant, metric, period)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UsageMetric {
    /// Tenant
    pub tenant_id: TenantId,
    /// Metric kind
    pub kind: MetricKind,
    /// Period start
    pub period_start: DateTime<Utc>,
    /// Period end
    pub period_end: DateTime<Utc>,
    /// Committed consumption
    pub consumed: u64,
    /// Reserved but not yet committed
    pub pending: u64,
    /// Ceiling snapshot taken when the period opened
    pub ceiling: u64,
}

impl UsageMetric {
    /// Consumption visible to quota checks (committed + in-flight)
    pub fn charged(&self) -> u64 {
        self.consumed + self.pending
    }

    /// Remaining headroom under the ceiling
    pub fn remaining(&self) -> u64 {
        self.ceiling.saturating_sub(self.charged())
    }
}

/// Storage for usage counters.
///
/// Implementations must make `try_reserve` an atomic check-then-increment
/// per key (a conditional update clause in a database, the shard lock in
/// the in-memory store). Two racing reservations that together exceed the
/// ceiling must never both succeed.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Open a fresh period, archiving any existing row for reconciliation.
    /// The ceiling snapshot is fixed for the life of the period except via
    /// [`UsageStore::raise_ceiling`].
    async fn open_period(
        &self,
        key: PeriodKey,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        ceiling: u64,
    ) -> Result<(), StoreError>;

    /// Atomically reserve `amount` iff `consumed + pending + amount`
    /// stays within the ceiling. Returns the row as of the reservation.
    async fn try_reserve(&self, key: PeriodKey, amount: u64) -> Result<UsageMetric, StoreError>;

    /// Move `amount` from pending to consumed
    async fn commit(
        &self,
        key: PeriodKey,
        period_start: DateTime<Utc>,
        amount: u64,
    ) -> Result<(), StoreError>;

    /// Drop `amount` from pending (refund)
    async fn release(
        &self,
        key: PeriodKey,
        period_start: DateTime<Utc>,
        amount: u64,
    ) -> Result<(), StoreError>;

    /// Raise the ceiling of the active period. Never lowers it; a lower
    /// ceiling waits for the next rollover.
    async fn raise_ceiling(&self, key: PeriodKey, ceiling: u64) -> Result<(), StoreError>;

    /// Apply a signed correction to consumed, bypassing the ceiling
    async fn adjust(&self, key: PeriodKey, delta: i64) -> Result<u64, StoreError>;

    /// Active row, if a period is open
    async fn get(&self, key: PeriodKey) -> Option<UsageMetric>;

    /// Archived rows for billing reconciliation, oldest first
    async fn history(&self, key: PeriodKey) -> Vec<UsageMetric>;
}

/// In-memory store. DashMap entry access serializes mutations per key,
/// which gives the atomic check-then-increment the trait requires within
/// a single process. Multi-instance deployments use a database-backed
/// implementation with a conditional update clause.
pub struct InMemoryUsageStore {
    active: DashMap<PeriodKey, UsageMetric>,
    archive: RwLock<Vec<UsageMetric>>,
}

impl InMemoryUsageStore {
    /// Empty store
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
            archive: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryUsageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn open_period(
        &self,
        key: PeriodKey,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        ceiling: u64,
    ) -> Result<(), StoreError> {
        let fresh = UsageMetric {
            tenant_id: key.tenant_id,
            kind: key.kind,
            period_start,
            period_end,
            consumed: 0,
            pending: 0,
            ceiling,
        };
        if let Some(previous) = self.active.insert(key, fresh) {
            self.archive.write().push(previous);
        }
        Ok(())
    }

    async fn try_reserve(&self, key: PeriodKey, amount: u64) -> Result<UsageMetric, StoreError> {
        let mut row = self.active.get_mut(&key).ok_or(StoreError::NoActivePeriod)?;
        if row.charged() + amount > row.ceiling {
            return Err(StoreError::CeilingReached {
                charged: row.charged(),
                ceiling: row.ceiling,
            });
        }
        row.pending += amount;
        Ok(row.clone())
    }

    async fn commit(
        &self,
        key: PeriodKey,
        period_start: DateTime<Utc>,
        amount: u64,
    ) -> Result<(), StoreError> {
        let mut row = self.active.get_mut(&key).ok_or(StoreError::NoActivePeriod)?;
        if row.period_start != period_start {
            return Err(StoreError::StalePeriod);
        }
        row.pending = row.pending.saturating_sub(amount);
        row.consumed += amount;
        Ok(())
    }

    async fn release(
        &self,
        key: PeriodKey,
        period_start: DateTime<Utc>,
        amount: u64,
    ) -> Result<(), StoreError> {
        let mut row = self.active.get_mut(&key).ok_or(StoreError::NoActivePeriod)?;
        if row.period_start != period_start {
            return Err(StoreError::StalePeriod);
        }
        row.pending = row.pending.saturating_sub(amount);
        Ok(())
    }

    async fn raise_ceiling(&self, key: PeriodKey, ceiling: u64) -> Result<(), StoreError> {
        let mut row = self.active.get_mut(&key).ok_or(StoreError::NoActivePeriod)?;
        if ceiling > row.ceiling {
            row.ceiling = ceiling;
        }
        Ok(())
    }

    async fn adjust(&self, key: PeriodKey, delta: i64) -> Result<u64, StoreError> {
        let mut row = self.active.get_mut(&key).ok_or(StoreError::NoActivePeriod)?;
        row.consumed = if delta.is_negative() {
            row.consumed.saturating_sub(delta.unsigned_abs())
        } else {
            row.consumed + delta as u64
        };
        Ok(row.consumed)
    }

    async fn get(&self, key: PeriodKey) -> Option<UsageMetric> {
        self.active.get(&key).map(|r| r.clone())
    }

    async fn history(&self, key: PeriodKey) -> Vec<UsageMetric> {
        self.archive
            .read()
            .iter()
            .filter(|m| m.tenant_id == key.tenant_id && m.kind == key.kind)
            .cloned()
            .collect()
    }
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No open period for the key
    #[error("no active period")]
    NoActivePeriod,

    /// Reservation would exceed the ceiling snapshot
    #[error("ceiling reached: {charged}/{ceiling}")]
    CeilingReached {
        /// Committed plus pending at check time
        charged: u64,
        /// Ceiling snapshot
        ceiling: u64,
    },

    /// Settlement against a period that has since rolled over
    #[error("period rolled over since reservation")]
    StalePeriod,
}
