//! Backend client interface

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conductor_catalog::InvocationMode;
use conductor_common::{BackendId, CapabilityId};
use serde::{Deserialize, Serialize};

/// Uniform request shape for every backend.
///
/// The concrete protocol (HTTP, gRPC, embedded runtime) is the client
/// implementation's concern.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvokeRequest {
    /// Capability being invoked
    pub capability: CapabilityId,
    /// Opaque input payload
    pub payload: serde_json::Value,
    /// Caller-specified timeout
    pub timeout_ms: u64,
    /// Retry semantics, from the capability catalog
    pub mode: InvocationMode,
}

/// Uniform response shape
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvokeResponse {
    /// Result payload
    pub payload: serde_json::Value,
    /// Backend-observed latency
    pub latency_ms: u64,
    /// Units consumed, in the capability's declared cost unit
    /// (calls or tokens)
    pub units_consumed: u64,
}

/// Backend health probe result
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthProbe {
    /// Reported status
    pub status: HealthState,
    /// Probe latency
    pub latency_ms: u64,
    /// Operator-facing detail
    pub message: String,
}

/// Backend health state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Serving normally
    Healthy,
    /// Serving with elevated errors or latency
    Degraded,
    /// Not serving
    Unavailable,
}

/// Advertised backend metadata, from the backend's own discovery endpoint
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendDescription {
    /// Backend identifier
    pub backend: BackendId,
    /// Service name
    pub name: String,
    /// Service version
    pub version: String,
    /// Capability identifiers the backend claims to serve
    pub capabilities: Vec<String>,
}

/// Reference to stored connection credentials. Carries a handle, never
/// the secret itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialRef(String);

impl CredentialRef {
    /// Wrap a credential handle
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// The handle name
    pub fn handle(&self) -> &str {
        &self.0
    }
}

/// Point-in-time health of a binding, written by the health loop and read
/// by the request path without blocking
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BindingHealth {
    /// Last observed state
    pub state: HealthState,
    /// When the state was last refreshed
    pub last_checked: DateTime<Utc>,
    /// Last probe latency
    pub latency_ms: u64,
}

impl BindingHealth {
    /// State before the first probe completes
    pub fn unknown() -> Self {
        Self {
            state: HealthState::Degraded,
            last_checked: Utc::now(),
            latency_ms: 0,
        }
    }
}

/// Client for one external backend
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Backend this client serves
    fn id(&self) -> BackendId;

    /// Execute a capability call
    async fn invoke(&self, request: &InvokeRequest) -> Result<InvokeResponse, BackendCallError>;

    /// Probe backend health
    async fn health_check(&self) -> HealthProbe;

    /// Fetch advertised metadata
    async fn describe(&self) -> Result<BackendDescription, BackendCallError>;
}

/// Raw backend call failure, before gateway policy is applied
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct BackendCallError(pub String);
