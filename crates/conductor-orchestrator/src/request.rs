//! Per-request state machine

use serde::{Deserialize, Serialize};

/// Lifecycle of one orchestration request.
///
/// A request never reaches `Invoked` without passing through `Reserved`,
/// and never reaches `Committed` unless the invocation succeeded. This
/// ordering is the central correctness invariant of the subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Received, nothing checked yet
    Pending,
    /// Entitlement verified
    Entitled,
    /// Usage quota reserved
    Reserved,
    /// Backend call completed
    Invoked,
    /// Reservation committed after backend success
    Committed,
    /// Reservation refunded after backend failure
    Released,
}

impl RequestState {
    /// Legal transitions
    pub fn can_advance_to(self, next: RequestState) -> bool {
        matches!(
            (self, next),
            (RequestState::Pending, RequestState::Entitled)
                | (RequestState::Entitled, RequestState::Reserved)
                | (RequestState::Reserved, RequestState::Invoked)
                | (RequestState::Invoked, RequestState::Committed)
                | (RequestState::Invoked, RequestState::Released)
        )
    }

    /// Advance, panicking in debug builds on an illegal transition
    pub fn advance(&mut self, next: RequestState) {
        debug_assert!(
            self.can_advance_to(next),
            "illegal request transition {self:?} -> {next:?}"
        );
        *self = next;
    }

    /// Whether the request has settled
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Committed | RequestState::Released)
    }
}
