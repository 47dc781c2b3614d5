//! Usage Ledger
//!
//! Tracks consumption counters per tenant per billing period and enforces
//! ceilings with a two-phase reserve/commit/release discipline, so usage is
//! never charged for calls that fail downstream. Ceiling checks use an
//! atomic check-then-increment at the storage layer; correctness does not
//! depend on a single process instance.

#![warn(missing_docs)]

pub mod cost;
pub mod ledger;
pub mod store;

pub use cost::{CostEntry, CostError, CostRecorder, InMemoryCostLedger};
pub use ledger::{AdminAdjustment, LedgerError, Reservation, UsageLedger};
pub use store::{InMemoryUsageStore, PeriodKey, StoreError, UsageMetric, UsageStore};
