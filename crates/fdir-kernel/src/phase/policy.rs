use super::Phase;
use crate::error::StateMachineError;
use serde::{Deserialize, Serialize};

/// Phase-compatibility rules applied to ordinary transitions.
///
/// Forced transitions ignore the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// Any phase may follow any phase
    #[default]
    Permissive,
    /// Launch, deployment, then nominal/payload operations; safe mode from anywhere
    MissionSequence,
}

/// Validates an ordinary transition against `policy`.
pub fn validate_transition(
    policy: TransitionPolicy,
    from: Phase,
    to: Phase,
) -> Result<(), StateMachineError> {
    if allowed_transitions(policy, from).contains(&to) {
        Ok(())
    } else {
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

pub fn allowed_transitions(policy: TransitionPolicy, from: Phase) -> Vec<Phase> {
    use Phase::*;
    match policy {
        TransitionPolicy::Permissive => Phase::ALL.to_vec(),
        TransitionPolicy::MissionSequence => match from {
            Launch => vec![Deployment, SafeMode],
            Deployment => vec![NominalOps, SafeMode],
            NominalOps => vec![PayloadOps, SafeMode],
            PayloadOps => vec![NominalOps, SafeMode],
            SafeMode => vec![NominalOps, SafeMode],
        },
    }
}
