//! Subscription lifecycle

use crate::bundle::BundleCatalog;
use crate::engine::DowngradePolicy;
use chrono::{DateTime, Duration, Utc};
use conductor_common::{BundleId, TenantId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Subscription manager.
///
/// Subscriptions are mutated only through the billing webhook path
/// ([`SubscriptionManager::apply_change`]) and explicit lifecycle calls;
/// cancellation is soft so usage history stays available for audit.
pub struct SubscriptionManager {
    subscriptions: Arc<RwLock<HashMap<TenantId, Subscription>>>,
    bundles: Arc<BundleCatalog>,
    policy: DowngradePolicy,
}

impl SubscriptionManager {
    /// Create a manager over the given bundle catalog
    pub fn new(bundles: Arc<BundleCatalog>, policy: DowngradePolicy) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            bundles,
            policy,
        }
    }

    /// Create an active subscription
    pub fn create(
        &self,
        tenant_id: TenantId,
        bundle_id: &BundleId,
        seats: u32,
    ) -> Result<Subscription, SubscriptionError> {
        let bundle = self
            .bundles
            .get(bundle_id)
            .ok_or_else(|| SubscriptionError::UnknownBundle(bundle_id.clone()))?;
        if seats > bundle.ceilings.max_seats {
            return Err(SubscriptionError::SeatLimitExceeded {
                requested: seats,
                max: bundle.ceilings.max_seats,
            });
        }

        let now = Utc::now();
        let subscription = Subscription {
            id: Uuid::new_v4(),
            tenant_id,
            bundle_id: bundle_id.clone(),
            seats,
            status: SubscriptionStatus::Active,
            cycle_anchor: now,
            current_period_start: now,
            current_period_end: now + Duration::days(30),
            trial_end: None,
            scheduled_bundle: None,
            canceled_at: None,
            created_at: now,
        };

        self.subscriptions.write().insert(tenant_id, subscription.clone());
        tracing::info!(%tenant_id, bundle = %bundle_id, seats, "subscription created");
        Ok(subscription)
    }

    /// Start a trial subscription
    pub fn start_trial(
        &self,
        tenant_id: TenantId,
        bundle_id: &BundleId,
        seats: u32,
        trial_days: u32,
    ) -> Result<Subscription, SubscriptionError> {
        let mut subscription = self.create(tenant_id, bundle_id, seats)?;
        let trial_end = subscription.created_at + Duration::days(trial_days as i64);

        let mut subs = self.subscriptions.write();
        let sub = subs
            .get_mut(&tenant_id)
            .ok_or(SubscriptionError::NotFound)?;
        sub.status = SubscriptionStatus::Trialing;
        sub.trial_end = Some(trial_end);
        sub.current_period_end = trial_end;
        subscription = sub.clone();

        Ok(subscription)
    }

    /// Current subscription for a tenant, canceled included
    pub fn get(&self, tenant_id: &TenantId) -> Option<Subscription> {
        self.subscriptions.read().get(tenant_id).cloned()
    }

    /// Apply a change notified by the billing webhook consumer.
    ///
    /// Status changes and upgrades take effect immediately. Downgrades
    /// follow the configured [`DowngradePolicy`].
    pub fn apply_change(
        &self,
        change: SubscriptionChange,
    ) -> Result<Subscription, SubscriptionError> {
        let mut subs = self.subscriptions.write();
        let sub = subs
            .get_mut(&change.tenant_id)
            .ok_or(SubscriptionError::NotFound)?;

        if let Some(status) = change.new_status {
            sub.status = status;
            if status == SubscriptionStatus::Canceled {
                sub.canceled_at = Some(Utc::now());
            }
        }

        if let Some(new_bundle_id) = change.new_bundle_id {
            let current = self
                .bundles
                .get(&sub.bundle_id)
                .ok_or_else(|| SubscriptionError::UnknownBundle(sub.bundle_id.clone()))?;
            let target = self
                .bundles
                .get(&new_bundle_id)
                .ok_or_else(|| SubscriptionError::UnknownBundle(new_bundle_id.clone()))?;

            let is_downgrade = target.rank < current.rank;
            if is_downgrade && self.policy == DowngradePolicy::NextRenewal {
                sub.scheduled_bundle = Some(new_bundle_id.clone());
                tracing::info!(
                    tenant_id = %change.tenant_id,
                    from = %current.id,
                    to = %new_bundle_id,
                    "downgrade scheduled for next renewal"
                );
            } else {
                sub.bundle_id = new_bundle_id.clone();
                sub.scheduled_bundle = None;
                tracing::info!(
                    tenant_id = %change.tenant_id,
                    from = %current.id,
                    to = %new_bundle_id,
                    "bundle changed"
                );
            }
        }

        if let Some(seats) = change.seats {
            sub.seats = seats;
        }

        Ok(sub.clone())
    }

    /// Cancel a subscription (soft delete; history retained)
    pub fn cancel(&self, tenant_id: &TenantId) -> Result<Subscription, SubscriptionError> {
        let mut subs = self.subscriptions.write();
        let sub = subs.get_mut(tenant_id).ok_or(SubscriptionError::NotFound)?;
        if sub.status == SubscriptionStatus::Canceled {
            return Err(SubscriptionError::AlreadyCanceled);
        }
        sub.status = SubscriptionStatus::Canceled;
        sub.canceled_at = Some(Utc::now());
        tracing::info!(%tenant_id, "subscription canceled");
        Ok(sub.clone())
    }

    /// Advance to the next billing period, applying any scheduled
    /// downgrade. Callers roll the usage ledger over with the returned
    /// subscription's bundle.
    pub fn renew(&self, tenant_id: &TenantId) -> Result<Subscription, SubscriptionError> {
        let mut subs = self.subscriptions.write();
        let sub = subs.get_mut(tenant_id).ok_or(SubscriptionError::NotFound)?;

        if let Some(scheduled) = sub.scheduled_bundle.take() {
            tracing::info!(%tenant_id, to = %scheduled, "scheduled downgrade applied at renewal");
            sub.bundle_id = scheduled;
        }

        sub.current_period_start = sub.current_period_end;
        sub.current_period_end = sub.current_period_start + Duration::days(30);
        if sub.status == SubscriptionStatus::Trialing {
            sub.status = SubscriptionStatus::Active;
            sub.trial_end = None;
        }

        Ok(sub.clone())
    }
}

/// Tenant subscription
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription identifier
    pub id: Uuid,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Active bundle
    pub bundle_id: BundleId,
    /// Seat count
    pub seats: u32,
    /// Lifecycle status
    pub status: SubscriptionStatus,
    /// Billing cycle anchor date
    pub cycle_anchor: DateTime<Utc>,
    /// Current period start
    pub current_period_start: DateTime<Utc>,
    /// Current period end
    pub current_period_end: DateTime<Utc>,
    /// Trial end, if trialing
    pub trial_end: Option<DateTime<Utc>>,
    /// Downgrade deferred to the next renewal, if any
    pub scheduled_bundle: Option<BundleId>,
    /// Soft-delete timestamp
    pub canceled_at: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether this subscription may invoke capabilities at all
    pub fn is_usable(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trialing
        )
    }
}

/// Subscription lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// In trial period
    Trialing,
    /// Paid and current
    Active,
    /// Payment lapsed; entitlement denied until resolved
    PastDue,
    /// Soft-deleted; usage history retained
    Canceled,
}

/// One-way change notification from the billing webhook consumer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubscriptionChange {
    /// Affected tenant
    pub tenant_id: TenantId,
    /// New bundle, if the plan changed
    pub new_bundle_id: Option<BundleId>,
    /// New status, if it changed
    pub new_status: Option<SubscriptionStatus>,
    /// New seat count, if it changed
    pub seats: Option<u32>,
}

/// Subscription errors
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// No subscription for tenant
    #[error("subscription not found")]
    NotFound,

    /// Bundle id absent from the catalog
    #[error("unknown bundle: {0}")]
    UnknownBundle(BundleId),

    /// Seat count above the bundle ceiling
    #[error("seat limit exceeded: requested {requested}, max {max}")]
    SeatLimitExceeded {
        /// Requested seats
        requested: u32,
        /// Bundle maximum
        max: u32,
    },

    /// Already soft-deleted
    #[error("subscription already canceled")]
    AlreadyCanceled,
}
