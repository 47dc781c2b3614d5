//! Pricing Calculator
//!
//! Pure function layer: price quotes from bundle selection, seat count,
//! add-ons and discount rules, plus the per-unit rates the orchestrator
//! charges capability calls at. No I/O. All monetary arithmetic happens
//! in integer cents; `rust_decimal` appears only at the display boundary.

#![warn(missing_docs)]

pub mod quote;
pub mod rates;

pub use quote::{
    AddOn, PriceBreakdown, PricingCalculator, PricingConfig, PromoCode, QuoteError,
    QuoteRequest, VolumeTier,
};
pub use rates::{unit_cost, Invoice, InvoiceLine, Reconciliation};
