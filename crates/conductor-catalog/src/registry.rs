//! Capability Registry

use crate::capability::{Capability, CostUnit, InvocationMode};
use conductor_common::{BackendId, CapabilityId, TierRank};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Read-only capability registry, built once at startup
pub struct CapabilityRegistry {
    capabilities: HashMap<CapabilityId, Capability>,
}

impl CapabilityRegistry {
    /// Build from validated configuration
    pub fn from_config(config: CatalogConfig) -> Result<Self, CatalogError> {
        let mut capabilities = HashMap::new();

        for cap in config.capabilities {
            if capabilities.contains_key(&cap.id) {
                return Err(CatalogError::DuplicateCapability(cap.id));
            }
            capabilities.insert(cap.id.clone(), cap);
        }

        if capabilities.is_empty() {
            return Err(CatalogError::EmptyCatalog);
        }

        tracing::info!(count = capabilities.len(), "capability catalog loaded");
        Ok(Self { capabilities })
    }

    /// Default catalog shipped with the platform
    pub fn builtin() -> Self {
        Self::from_config(CatalogConfig::builtin())
            .expect("builtin catalog is valid")
    }

    /// Resolve a capability identifier.
    ///
    /// An unknown identifier is a configuration defect; callers log it as
    /// such and never retry.
    pub fn resolve(&self, id: &CapabilityId) -> Result<&Capability, CatalogError> {
        self.capabilities
            .get(id)
            .ok_or_else(|| CatalogError::UnknownCapability(id.clone()))
    }

    /// All capabilities in the catalog
    pub fn all(&self) -> impl Iterator<Item = &Capability> {
        self.capabilities.values()
    }

    /// Capabilities served by a given backend
    pub fn for_backend(&self, backend: &BackendId) -> Vec<&Capability> {
        self.capabilities
            .values()
            .filter(|c| &c.backend == backend)
            .collect()
    }

    /// Distinct backends the catalog binds to
    pub fn backends(&self) -> HashSet<BackendId> {
        self.capabilities.values().map(|c| c.backend.clone()).collect()
    }

    /// Verify every capability maps to a registered backend.
    ///
    /// Run at startup after the gateway bindings are known; a dangling
    /// reference is a deploy-time defect.
    pub fn validate_backends(&self, known: &HashSet<BackendId>) -> Result<(), CatalogError> {
        for cap in self.capabilities.values() {
            if !known.contains(&cap.backend) {
                return Err(CatalogError::UnknownBackend {
                    capability: cap.id.clone(),
                    backend: cap.backend.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Typed catalog configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Capability entries
    pub capabilities: Vec<Capability>,
}

impl CatalogConfig {
    /// The capability set the platform ships with
    pub fn builtin() -> Self {
        let cap = |id: &str, name: &str, tier: u8, backend: &str, cost, mode| Capability {
            id: CapabilityId::from(id),
            name: name.to_string(),
            min_tier: TierRank(tier),
            backend: BackendId::from(backend),
            cost,
            mode,
        };

        Self {
            capabilities: vec![
                cap(
                    "sentiment-analysis",
                    "Financial Sentiment Analysis",
                    0,
                    "fingpt",
                    CostUnit::PerThousandTokens(2),
                    InvocationMode::Idempotent,
                ),
                cap(
                    "entity-extraction",
                    "Financial Entity Extraction",
                    0,
                    "fingpt",
                    CostUnit::PerThousandTokens(1),
                    InvocationMode::Idempotent,
                ),
                cap(
                    "anomaly-detection",
                    "Financial Anomaly Detection",
                    1,
                    "finrobot",
                    CostUnit::PerCall(10),
                    InvocationMode::Idempotent,
                ),
                cap(
                    "payroll-processing",
                    "Payroll Run Processing",
                    1,
                    "erpnext",
                    CostUnit::PerCall(50),
                    InvocationMode::SideEffecting,
                ),
                cap(
                    "predictive-forecast",
                    "Multi-Agent Financial Forecast",
                    2,
                    "finrobot",
                    CostUnit::PerCall(25),
                    InvocationMode::Idempotent,
                ),
                cap(
                    "strategic-analysis",
                    "Strategic Business Analysis",
                    2,
                    "finrobot",
                    CostUnit::PerCall(40),
                    InvocationMode::Idempotent,
                ),
                cap(
                    "bom-optimization",
                    "Bill-of-Materials Optimization",
                    2,
                    "erpnext",
                    CostUnit::PerCall(30),
                    InvocationMode::Idempotent,
                ),
            ],
        }
    }
}

/// Catalog errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Identifier absent from the catalog (configuration defect)
    #[error("unknown capability: {0}")]
    UnknownCapability(CapabilityId),

    /// Same identifier declared twice
    #[error("duplicate capability: {0}")]
    DuplicateCapability(CapabilityId),

    /// Capability references a backend no binding exists for
    #[error("capability {capability} maps to unknown backend {backend}")]
    UnknownBackend {
        /// Offending capability
        capability: CapabilityId,
        /// Dangling backend reference
        backend: BackendId,
    },

    /// Catalog with no entries
    #[error("catalog has no capabilities")]
    EmptyCatalog,
}
