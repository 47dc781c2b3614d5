//! Unit rates and invoice reconciliation

use chrono::{DateTime, Utc};
use conductor_catalog::{Capability, CostUnit};
use conductor_common::TenantId;
use serde::{Deserialize, Serialize};

/// Cost of a capability invocation in cents, from the capability's
/// declared cost unit and the units the backend reported.
pub fn unit_cost(capability: &Capability, units_consumed: u64) -> i64 {
    match capability.cost {
        CostUnit::PerCall(cents) => cents * units_consumed as i64,
        CostUnit::PerThousandTokens(cents) => {
            // tokens, rounded half-up to the nearest thousandth
            (cents * units_consumed as i64 + 500) / 1_000
        }
    }
}

/// Invoice read model. Owned by the billing system; the core reads it
/// for reconciliation and never creates or mutates one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Invoice {
    /// Billed tenant
    pub tenant_id: TenantId,
    /// Period start
    pub period_start: DateTime<Utc>,
    /// Period end
    pub period_end: DateTime<Utc>,
    /// Billed total in cents
    pub total_cents: i64,
    /// Billed line items
    pub lines: Vec<InvoiceLine>,
}

/// One invoice line
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvoiceLine {
    /// Line description
    pub description: String,
    /// Line amount in cents
    pub amount_cents: i64,
}

/// Result of comparing an invoice against recorded usage cost
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Cost the core recorded over the period
    pub recorded_cents: i64,
    /// Cost the billing system invoiced
    pub invoiced_cents: i64,
    /// Invoiced minus recorded
    pub delta_cents: i64,
}

impl Reconciliation {
    /// Compare recorded cost against a billed invoice
    pub fn compare(invoice: &Invoice, recorded_cents: i64) -> Self {
        Self {
            recorded_cents,
            invoiced_cents: invoice.total_cents,
            delta_cents: invoice.total_cents - recorded_cents,
        }
    }

    /// Whether the books agree
    pub fn balanced(&self) -> bool {
        self.delta_cents == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_catalog::{CapabilityRegistry, CostUnit};
    use conductor_common::CapabilityId;
    use uuid::Uuid;

    #[test]
    fn test_per_call_cost() {
        let registry = CapabilityRegistry::builtin();
        let cap = registry.resolve(&CapabilityId::from("predictive-forecast")).unwrap();
        assert_eq!(cap.cost, CostUnit::PerCall(25));
        assert_eq!(unit_cost(cap, 1), 25);
        assert_eq!(unit_cost(cap, 4), 100);
    }

    #[test]
    fn test_per_thousand_tokens_rounds_half_up() {
        let registry = CapabilityRegistry::builtin();
        let cap = registry.resolve(&CapabilityId::from("sentiment-analysis")).unwrap();
        assert_eq!(cap.cost, CostUnit::PerThousandTokens(2));
        // 2 cents per 1K tokens
        assert_eq!(unit_cost(cap, 1_000), 2);
        assert_eq!(unit_cost(cap, 250), 1); // 0.5 rounds up
        assert_eq!(unit_cost(cap, 100), 0); // 0.2 rounds down
    }

    #[test]
    fn test_reconciliation() {
        let now = Utc::now();
        let invoice = Invoice {
            tenant_id: Uuid::new_v4(),
            period_start: now,
            period_end: now,
            total_cents: 1_250,
            lines: vec![InvoiceLine {
                description: "AI operations".into(),
                amount_cents: 1_250,
            }],
        };

        let balanced = Reconciliation::compare(&invoice, 1_250);
        assert!(balanced.balanced());

        let off = Reconciliation::compare(&invoice, 1_200);
        assert!(!off.balanced());
        assert_eq!(off.delta_cents, 50);
    }
}
