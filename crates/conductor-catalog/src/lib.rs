//! Capability Catalog
//!
//! Static catalog of AI capabilities. Loaded and validated once at process
//! start; read-only afterwards and safely shared without locking. A request
//! referencing an identifier absent from the catalog is a configuration
//! defect, never a user-triggerable condition.

#![warn(missing_docs)]

pub mod capability;
pub mod registry;

pub use capability::{Capability, CostUnit, InvocationMode};
pub use registry::{CapabilityRegistry, CatalogConfig, CatalogError};
