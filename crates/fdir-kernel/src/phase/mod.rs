//! Mission phase control
//!
//! [`PhaseStateMachine`] owns the single current [`Phase`]. Ordinary
//! transitions are serialized and fail fast under contention; the forced
//! transition to [`Phase::SafeMode`] always succeeds and preempts whatever
//! ordinary transition is in flight.

mod machine;
mod policy;

pub use machine::{NoopHook, PhaseStateMachine, TransitionHook};
pub use policy::{allowed_transitions, validate_transition, TransitionPolicy};

use crate::error::StateMachineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Operational phase of the vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Ascent
    Launch,
    /// Appendage and antenna deployment
    Deployment,
    /// Routine operations
    #[default]
    NominalOps,
    /// Payload is active
    PayloadOps,
    /// Universal fallback, reachable from anywhere by forced override
    SafeMode,
}

impl Phase {
    /// Every phase, in mission order
    pub const ALL: [Phase; 5] = [
        Phase::Launch,
        Phase::Deployment,
        Phase::NominalOps,
        Phase::PayloadOps,
        Phase::SafeMode,
    ];

    /// Wire name used in logs and on the command line
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Phase::Launch => "LAUNCH",
            Phase::Deployment => "DEPLOYMENT",
            Phase::NominalOps => "NOMINAL_OPS",
            Phase::PayloadOps => "PAYLOAD_OPS",
            Phase::SafeMode => "SAFE_MODE",
        }
    }

    pub(crate) const fn index(self) -> u64 {
        match self {
            Phase::Launch => 0,
            Phase::Deployment => 1,
            Phase::NominalOps => 2,
            Phase::PayloadOps => 3,
            Phase::SafeMode => 4,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = StateMachineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| StateMachineError::InvalidPhase(s.to_string()))
    }
}

/// Outcome of a transition request
///
/// `success` is `false` only when an ordinary transition was preempted by a
/// forced override; `new_phase` then reports the phase that was actually
/// committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionResult {
    /// Whether the requested phase was committed
    pub success: bool,
    /// Phase observed when the transition started
    pub previous_phase: Phase,
    /// Phase current after the transition
    pub new_phase: Phase,
    /// Whether this was the emergency override
    pub forced: bool,
}
