//! Cost recording

use chrono::{DateTime, Utc};
use conductor_common::{CapabilityId, TenantId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cost incurred by one successful capability invocation
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CostEntry {
    /// Entry identifier
    pub id: Uuid,
    /// Charged tenant
    pub tenant_id: TenantId,
    /// Invoked capability
    pub capability: CapabilityId,
    /// Units consumed, in the capability's declared cost unit
    pub units: u64,
    /// Cost in cents
    pub cents: i64,
    /// When the call completed
    pub at: DateTime<Utc>,
}

/// Sink for cost entries. A recording failure after a successful backend
/// call never loses the caller's result; the orchestrator logs it and
/// flags the request for reconciliation.
pub trait CostRecorder: Send + Sync {
    /// Persist one cost entry
    fn record(&self, entry: CostEntry) -> Result<(), CostError>;
}

/// In-memory cost ledger
pub struct InMemoryCostLedger {
    entries: RwLock<Vec<CostEntry>>,
}

impl InMemoryCostLedger {
    /// Empty ledger
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// All entries for a tenant
    pub fn entries_for(&self, tenant_id: &TenantId) -> Vec<CostEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| &e.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    /// Total recorded cost for a tenant in cents
    pub fn total_for(&self, tenant_id: &TenantId) -> i64 {
        self.entries
            .read()
            .iter()
            .filter(|e| &e.tenant_id == tenant_id)
            .map(|e| e.cents)
            .sum()
    }
}

impl Default for InMemoryCostLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl CostRecorder for InMemoryCostLedger {
    fn record(&self, entry: CostEntry) -> Result<(), CostError> {
        self.entries.write().push(entry);
        Ok(())
    }
}

/// Cost recording errors
#[derive(Debug, thiserror::Error)]
pub enum CostError {
    /// Sink rejected or failed to persist the entry
    #[error("cost recording failed: {0}")]
    RecordFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_total() {
        let ledger = InMemoryCostLedger::new();
        let tenant = Uuid::new_v4();

        for cents in [25, 40] {
            ledger
                .record(CostEntry {
                    id: Uuid::new_v4(),
                    tenant_id: tenant,
                    capability: CapabilityId::from("predictive-forecast"),
                    units: 1,
                    cents,
                    at: Utc::now(),
                })
                .unwrap();
        }

        assert_eq!(ledger.entries_for(&tenant).len(), 2);
        assert_eq!(ledger.total_for(&tenant), 65);
        assert_eq!(ledger.total_for(&Uuid::new_v4()), 0);
    }
}
