//! Entitlement checks

use crate::bundle::{Bundle, BundleCatalog, BundleError};
use crate::subscription::Subscription;
use conductor_catalog::{Capability, CapabilityRegistry};
use conductor_common::{BundleId, CapabilityId, ErrorCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// When a bundle downgrade takes effect.
///
/// Product documentation is inconsistent on this, so it is a policy flag
/// rather than a hardcoded behavior.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DowngradePolicy {
    /// Downgrade applies as soon as the webhook lands
    #[default]
    Immediate,
    /// Downgrade applies at the next billing renewal
    NextRenewal,
}

/// Entitlement engine: answers "may this subscription invoke this
/// capability" and drives upsell recommendations.
pub struct EntitlementEngine {
    registry: Arc<CapabilityRegistry>,
    bundles: Arc<BundleCatalog>,
}

impl EntitlementEngine {
    /// Build the engine, cross-validating bundles against the capability
    /// catalog. Fails at startup, never per-request.
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        bundles: Arc<BundleCatalog>,
    ) -> Result<Self, BundleError> {
        bundles.validate_against(&registry)?;
        Ok(Self { registry, bundles })
    }

    /// Whether the subscription permits invoking the capability.
    ///
    /// Entitlement always reflects the *current* bundle; a mid-period
    /// bundle change is visible on the next check.
    pub fn is_entitled(&self, subscription: &Subscription, capability: &CapabilityId) -> bool {
        if !subscription.is_usable() {
            return false;
        }
        self.bundles
            .get(&subscription.bundle_id)
            .map(|b| b.includes(capability))
            .unwrap_or(false)
    }

    /// Entitlement check carrying the upgrade recommendation on denial
    pub fn check(
        &self,
        subscription: &Subscription,
        capability: &CapabilityId,
    ) -> Result<(), EntitlementError> {
        if self.is_entitled(subscription, capability) {
            return Ok(());
        }
        let recommended = self.bundles.lowest_with(capability).cloned();
        Err(EntitlementError::NotEntitled {
            capability: capability.clone(),
            recommended,
        })
    }

    /// Lowest-tier bundle that includes the desired capability
    pub fn recommend_upgrade(
        &self,
        capability: &CapabilityId,
    ) -> Result<&Bundle, EntitlementError> {
        self.bundles
            .lowest_with(capability)
            .ok_or_else(|| EntitlementError::NoBundleProvidesCapability(capability.clone()))
    }

    /// Capabilities enabled by a bundle
    pub fn capabilities_for(
        &self,
        bundle_id: &BundleId,
    ) -> Result<Vec<&Capability>, EntitlementError> {
        let bundle = self
            .bundles
            .get(bundle_id)
            .ok_or_else(|| EntitlementError::UnknownBundle(bundle_id.clone()))?;
        let mut caps = Vec::with_capacity(bundle.capabilities.len());
        for id in &bundle.capabilities {
            if let Ok(cap) = self.registry.resolve(id) {
                caps.push(cap);
            }
        }
        caps.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(caps)
    }

    /// Bundle catalog handle
    pub fn bundles(&self) -> &BundleCatalog {
        &self.bundles
    }
}

/// Entitlement errors
#[derive(Debug, thiserror::Error)]
pub enum EntitlementError {
    /// Subscription does not permit the capability
    #[error("not entitled to {capability}")]
    NotEntitled {
        /// Requested capability
        capability: CapabilityId,
        /// Lowest-tier bundle that would grant it, for upsell messaging
        recommended: Option<Bundle>,
    },

    /// No catalog bundle includes the capability
    #[error("no bundle provides capability {0}")]
    NoBundleProvidesCapability(CapabilityId),

    /// Bundle id absent from the catalog
    #[error("unknown bundle: {0}")]
    UnknownBundle(BundleId),
}

impl ErrorCode for EntitlementError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotEntitled { .. } => "not_entitled",
            Self::NoBundleProvidesCapability(_) => "no_bundle_provides_capability",
            Self::UnknownBundle(_) => "unknown_bundle",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::{SubscriptionManager, SubscriptionStatus};
    use uuid::Uuid;

    fn engine() -> EntitlementEngine {
        EntitlementEngine::new(
            Arc::new(CapabilityRegistry::builtin()),
            Arc::new(BundleCatalog::builtin()),
        )
        .unwrap()
    }

    fn subscription(bundle: &str, status: SubscriptionStatus) -> Subscription {
        let mgr = SubscriptionManager::new(
            Arc::new(BundleCatalog::builtin()),
            DowngradePolicy::Immediate,
        );
        let mut sub = mgr.create(Uuid::new_v4(), &BundleId::from(bundle), 1).unwrap();
        sub.status = status;
        sub
    }

    #[test]
    fn test_starter_denied_forecast_with_recommendation() {
        let engine = engine();
        let sub = subscription("starter", SubscriptionStatus::Active);
        let cap = CapabilityId::from("predictive-forecast");

        assert!(!engine.is_entitled(&sub, &cap));
        match engine.check(&sub, &cap).unwrap_err() {
            EntitlementError::NotEntitled { recommended, .. } => {
                assert_eq!(recommended.unwrap().id, BundleId::from("enterprise"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_past_due_denied_regardless_of_bundle() {
        let engine = engine();
        let sub = subscription("enterprise", SubscriptionStatus::PastDue);

        assert!(!engine.is_entitled(&sub, &CapabilityId::from("sentiment-analysis")));
    }

    #[test]
    fn test_trialing_is_entitled() {
        let engine = engine();
        let sub = subscription("professional", SubscriptionStatus::Trialing);

        assert!(engine.is_entitled(&sub, &CapabilityId::from("anomaly-detection")));
    }

    #[test]
    fn test_recommend_lowest_rank() {
        let engine = engine();

        let bundle = engine
            .recommend_upgrade(&CapabilityId::from("sentiment-analysis"))
            .unwrap();
        assert_eq!(bundle.id, BundleId::from("starter"));

        let bundle = engine
            .recommend_upgrade(&CapabilityId::from("payroll-processing"))
            .unwrap();
        assert_eq!(bundle.id, BundleId::from("professional"));
    }

    #[test]
    fn test_recommend_unknown_capability() {
        let engine = engine();
        let err = engine
            .recommend_upgrade(&CapabilityId::from("time-travel"))
            .unwrap_err();
        assert_eq!(err.code(), "no_bundle_provides_capability");
    }

    #[test]
    fn test_capabilities_for_bundle() {
        let engine = engine();
        let caps = engine.capabilities_for(&BundleId::from("starter")).unwrap();
        let ids: Vec<_> = caps.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["entity-extraction", "sentiment-analysis"]);
    }
}
