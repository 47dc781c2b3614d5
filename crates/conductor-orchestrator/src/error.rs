//! Orchestration error taxonomy
//!
//! Every variant maps to a stable code via [`ErrorCode`], so the calling
//! layer renders UI from the code alone.

use conductor_common::{BackendId, CapabilityId, ErrorCode};
use conductor_entitlement::{Bundle, SubscriptionError};
use std::time::Duration;

/// Typed orchestration failures
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    /// Capability id absent from the catalog. A configuration defect,
    /// never user-triggerable; logged as such.
    #[error("unknown capability: {0}")]
    UnknownCapability(CapabilityId),

    /// Subscription does not permit the capability
    #[error("not entitled to {capability}")]
    NotEntitled {
        /// Requested capability
        capability: CapabilityId,
        /// Lowest-tier bundle that would grant it, for upsell messaging
        recommended: Option<Bundle>,
    },

    /// Usage ceiling reached for the period
    #[error("quota exceeded: {current}/{ceiling}")]
    QuotaExceeded {
        /// Charged usage at check time
        current: u64,
        /// Ceiling snapshot
        ceiling: u64,
    },

    /// Circuit open; transient, retry after the cooldown
    #[error("backend {backend} unavailable")]
    BackendUnavailable {
        /// Affected backend
        backend: BackendId,
        /// Suggested cooldown before retrying
        retry_after: Duration,
    },

    /// Backend call failed after allowed retries; transient
    #[error("backend {backend} error: {detail}")]
    BackendError {
        /// Affected backend
        backend: BackendId,
        /// Failure detail for operators
        detail: String,
    },

    /// Batch invocation of a side-effecting capability
    #[error("capability {0} does not support batch invocation")]
    BatchUnsupported(CapabilityId),

    /// Subscription lifecycle failure on a management call
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// Ledger or task-level failure that is not the backend's fault
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErrorCode for OrchestrationError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownCapability(_) => "unknown_capability",
            Self::NotEntitled { .. } => "not_entitled",
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::BackendError { .. } => "backend_error",
            Self::BatchUnsupported(_) => "batch_unsupported",
            Self::Subscription(_) => "subscription_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let err = OrchestrationError::UnknownCapability(CapabilityId::from("x"));
        assert_eq!(err.code(), "unknown_capability");

        let err = OrchestrationError::QuotaExceeded { current: 10, ceiling: 10 };
        assert_eq!(err.code(), "quota_exceeded");

        let err = OrchestrationError::BackendUnavailable {
            backend: BackendId::from("fingpt"),
            retry_after: Duration::from_secs(30),
        };
        assert_eq!(err.code(), "backend_unavailable");
    }
}
