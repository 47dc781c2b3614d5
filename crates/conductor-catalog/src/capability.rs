//! Capability definitions

use conductor_common::{BackendId, CapabilityId, TierRank};
use serde::{Deserialize, Serialize};

/// A discrete AI/service function a tenant may invoke.
///
/// Immutable catalog entry, created at load time and never mutated at
/// runtime.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Capability {
    /// Catalog identifier
    pub id: CapabilityId,
    /// Human-readable name
    pub name: String,
    /// Minimum bundle tier required to invoke
    pub min_tier: TierRank,
    /// Backend this capability maps to (exactly one at a time)
    pub backend: BackendId,
    /// Declared cost unit
    pub cost: CostUnit,
    /// Whether the gateway may auto-retry a failed call
    pub mode: InvocationMode,
}

/// Declared cost unit for a capability
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "unit", content = "cents")]
pub enum CostUnit {
    /// Flat rate per invocation
    PerCall(i64),
    /// Rate per 1,000 tokens consumed
    PerThousandTokens(i64),
}

/// Retry semantics of a capability call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationMode {
    /// Safe to retry automatically
    Idempotent,
    /// Triggers an external workflow; never auto-retried
    SideEffecting,
}

impl Capability {
    /// Whether the gateway may auto-retry this capability
    pub fn is_idempotent(&self) -> bool {
        self.mode == InvocationMode::Idempotent
    }
}
