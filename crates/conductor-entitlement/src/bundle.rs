//! Subscription bundles

use conductor_catalog::CapabilityRegistry;
use conductor_common::{BundleId, CapabilityId, MetricKind, TierRank};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A named subscription tier granting a fixed capability set and ceilings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bundle {
    /// Bundle identifier
    pub id: BundleId,
    /// Display name
    pub name: String,
    /// Explicit ordering; higher rank must be a capability superset of
    /// lower ranks except for declared exclusives
    pub rank: TierRank,
    /// Per-seat monthly price in cents
    pub seat_price_cents: i64,
    /// Enabled capability identifiers
    pub capabilities: HashSet<CapabilityId>,
    /// Capabilities intentionally not carried into higher tiers.
    /// Must be explicit; an implicit carve-out fails catalog validation.
    #[serde(default)]
    pub exclusives: HashSet<CapabilityId>,
    /// Usage ceilings
    pub ceilings: UsageCeilings,
}

impl Bundle {
    /// Whether this bundle enables a capability
    pub fn includes(&self, capability: &CapabilityId) -> bool {
        self.capabilities.contains(capability)
    }
}

/// Usage ceilings per billing period
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct UsageCeilings {
    /// Maximum seats
    pub max_seats: u32,
    /// Maximum AI operations per month
    pub max_ai_operations: u64,
    /// Maximum API calls per month
    pub max_api_calls: u64,
    /// Maximum stored bytes
    pub max_storage_bytes: u64,
}

impl UsageCeilings {
    /// Ceiling for a metric kind
    pub fn for_kind(&self, kind: MetricKind) -> u64 {
        match kind {
            MetricKind::ApiCall => self.max_api_calls,
            MetricKind::AiOperation => self.max_ai_operations,
            MetricKind::StorageByte => self.max_storage_bytes,
        }
    }
}

/// Validated, rank-ordered bundle catalog
pub struct BundleCatalog {
    bundles: HashMap<BundleId, Bundle>,
    by_rank: Vec<BundleId>,
}

impl BundleCatalog {
    /// Build from bundle definitions, enforcing the tier invariants
    pub fn from_bundles(bundles: Vec<Bundle>) -> Result<Self, BundleError> {
        if bundles.is_empty() {
            return Err(BundleError::EmptyCatalog);
        }

        let mut by_id = HashMap::new();
        let mut ranks = HashSet::new();
        for bundle in bundles {
            if !ranks.insert(bundle.rank) {
                return Err(BundleError::DuplicateRank(bundle.rank));
            }
            if by_id.insert(bundle.id.clone(), bundle).is_some() {
                return Err(BundleError::DuplicateBundle);
            }
        }

        let mut by_rank: Vec<BundleId> = by_id.keys().cloned().collect();
        by_rank.sort_by_key(|id| by_id[id].rank);

        // Superset invariant: each tier carries everything below it,
        // minus explicitly declared exclusives.
        for pair in by_rank.windows(2) {
            let lower = &by_id[&pair[0]];
            let higher = &by_id[&pair[1]];
            for cap in &lower.capabilities {
                if !lower.exclusives.contains(cap) && !higher.includes(cap) {
                    return Err(BundleError::TierNotSuperset {
                        lower: lower.id.clone(),
                        higher: higher.id.clone(),
                        capability: cap.clone(),
                    });
                }
            }
        }

        Ok(Self { bundles: by_id, by_rank })
    }

    /// Default tiers shipped with the platform
    pub fn builtin() -> Self {
        let caps = |ids: &[&str]| ids.iter().map(|s| CapabilityId::from(*s)).collect();

        Self::from_bundles(vec![
            Bundle {
                id: BundleId::from("starter"),
                name: "Starter".into(),
                rank: TierRank(0),
                seat_price_cents: 2_900,
                capabilities: caps(&["sentiment-analysis", "entity-extraction"]),
                exclusives: HashSet::new(),
                ceilings: UsageCeilings {
                    max_seats: 5,
                    max_ai_operations: 200,
                    max_api_calls: 10_000,
                    max_storage_bytes: 1 << 30,
                },
            },
            Bundle {
                id: BundleId::from("professional"),
                name: "Professional".into(),
                rank: TierRank(1),
                seat_price_cents: 9_900,
                capabilities: caps(&[
                    "sentiment-analysis",
                    "entity-extraction",
                    "anomaly-detection",
                    "payroll-processing",
                ]),
                exclusives: HashSet::new(),
                ceilings: UsageCeilings {
                    max_seats: 50,
                    max_ai_operations: 1_000,
                    max_api_calls: 100_000,
                    max_storage_bytes: 50 << 30,
                },
            },
            Bundle {
                id: BundleId::from("enterprise"),
                name: "Enterprise".into(),
                rank: TierRank(2),
                seat_price_cents: 49_900,
                capabilities: caps(&[
                    "sentiment-analysis",
                    "entity-extraction",
                    "anomaly-detection",
                    "payroll-processing",
                    "predictive-forecast",
                    "strategic-analysis",
                    "bom-optimization",
                ]),
                exclusives: HashSet::new(),
                ceilings: UsageCeilings {
                    max_seats: 500,
                    max_ai_operations: 20_000,
                    max_api_calls: 1_000_000,
                    max_storage_bytes: 1 << 40,
                },
            },
        ])
        .expect("builtin bundles are valid")
    }

    /// Get bundle by id
    pub fn get(&self, id: &BundleId) -> Option<&Bundle> {
        self.bundles.get(id)
    }

    /// Bundles in ascending rank order
    pub fn by_rank(&self) -> impl Iterator<Item = &Bundle> {
        self.by_rank.iter().map(|id| &self.bundles[id])
    }

    /// Lowest-rank bundle that includes a capability
    pub fn lowest_with(&self, capability: &CapabilityId) -> Option<&Bundle> {
        self.by_rank().find(|b| b.includes(capability))
    }

    /// Cross-check bundle membership against the capability catalog.
    ///
    /// Every referenced capability must exist, and no bundle may enable a
    /// capability whose minimum tier exceeds the bundle's rank.
    pub fn validate_against(&self, registry: &CapabilityRegistry) -> Result<(), BundleError> {
        for bundle in self.bundles.values() {
            for cap_id in &bundle.capabilities {
                let cap = registry
                    .resolve(cap_id)
                    .map_err(|_| BundleError::UnknownCapability {
                        bundle: bundle.id.clone(),
                        capability: cap_id.clone(),
                    })?;
                if cap.min_tier > bundle.rank {
                    return Err(BundleError::TierBelowMinimum {
                        bundle: bundle.id.clone(),
                        capability: cap_id.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Bundle catalog errors
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// No bundles defined
    #[error("bundle catalog is empty")]
    EmptyCatalog,

    /// Two bundles share an id
    #[error("duplicate bundle id")]
    DuplicateBundle,

    /// Two bundles share a rank
    #[error("duplicate tier rank {0}")]
    DuplicateRank(TierRank),

    /// Higher tier silently drops a lower tier's capability
    #[error("{higher} does not carry {capability} from {lower}; declare it exclusive or add it")]
    TierNotSuperset {
        /// Lower-ranked bundle
        lower: BundleId,
        /// Higher-ranked bundle
        higher: BundleId,
        /// Missing capability
        capability: CapabilityId,
    },

    /// Bundle references a capability absent from the catalog
    #[error("{bundle} references unknown capability {capability}")]
    UnknownCapability {
        /// Offending bundle
        bundle: BundleId,
        /// Unknown capability
        capability: CapabilityId,
    },

    /// Bundle enables a capability above its own tier
    #[error("{bundle} enables {capability} below its minimum tier")]
    TierBelowMinimum {
        /// Offending bundle
        bundle: BundleId,
        /// Capability with a higher minimum tier
        capability: CapabilityId,
    },
}
