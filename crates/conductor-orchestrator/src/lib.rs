//! Conductor Orchestration Core
//!
//! Bundle-aware AI orchestration for multi-tenant business platforms.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ORCHESTRATION CORE                               │
//! │                                                                         │
//! │  execute(tenant, capability, payload)                                   │
//! │        │                                                                │
//! │  ┌─────▼─────────┐   ┌───────────────┐   ┌──────────────────────────┐  │
//! │  │  Capability   │──►│  Entitlement  │──►│     Usage Ledger         │  │
//! │  │  Catalog      │   │  (bundles)    │   │  reserve / commit /      │  │
//! │  └───────────────┘   └───────────────┘   │  release                 │  │
//! │                                          └────────────┬─────────────┘  │
//! │  ┌───────────────────────────────────────────────────▼──────────────┐  │
//! │  │                    SERVICE GATEWAY                                │  │
//! │  │   per-backend circuit breakers | retries | health loop            │  │
//! │  │   ┌─────────┐     ┌──────────┐     ┌─────────┐                    │  │
//! │  │   │ fingpt  │     │ finrobot │     │ erpnext │                    │  │
//! │  │   └─────────┘     └──────────┘     └─────────┘                    │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  ┌───────────────────────────────────────────────────────────────────┐  │
//! │  │            PRICING | COST RECORDING | RECONCILIATION              │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod orchestrator;
pub mod request;

pub use error::OrchestrationError;
pub use orchestrator::{BatchExecution, Execution, Orchestrator, OrchestratorConfig};
pub use request::RequestState;
