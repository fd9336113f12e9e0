//! Lifecycle transition rules for captured transactions.

use super::model::LifecycleState;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
    #[error("Cannot transition from terminal state {state:?}")]
    FromTerminalState { state: LifecycleState },
}

pub struct StateTransition;

impl StateTransition {
    pub fn validate(from: LifecycleState, to: LifecycleState) -> Result<(), TransitionError> {
        if Self::is_terminal(from) {
            return Err(TransitionError::FromTerminalState { state: from });
        }

        let is_valid = matches!(
            (from, to),
            (LifecycleState::Created, LifecycleState::ContextPending)
                | (LifecycleState::ContextPending, LifecycleState::Admitted)
                | (LifecycleState::ContextPending, LifecycleState::Rejected)
                | (LifecycleState::Admitted, LifecycleState::HeadersMerged)
                // no header events at all for this transaction
                | (LifecycleState::Admitted, LifecycleState::Completed)
                | (LifecycleState::Admitted, LifecycleState::Errored)
                | (LifecycleState::HeadersMerged, LifecycleState::Completed)
                | (LifecycleState::HeadersMerged, LifecycleState::Errored)
                | (LifecycleState::Completed, LifecycleState::HandedOff)
                | (LifecycleState::Errored, LifecycleState::HandedOff)
        );

        if is_valid {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition { from, to })
        }
    }

    pub fn is_terminal(state: LifecycleState) -> bool {
        matches!(state, LifecycleState::Rejected | LifecycleState::HandedOff)
    }

    /// States in which the record still accepts headers and telemetry.
    pub fn is_live(state: LifecycleState) -> bool {
        matches!(
            state,
            LifecycleState::Created
                | LifecycleState::ContextPending
                | LifecycleState::Admitted
                | LifecycleState::HeadersMerged
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(
            StateTransition::validate(LifecycleState::Created, LifecycleState::ContextPending)
                .is_ok()
        );
        assert!(
            StateTransition::validate(LifecycleState::Admitted, LifecycleState::Completed).is_ok()
        );
        assert!(
            StateTransition::validate(LifecycleState::Errored, LifecycleState::HandedOff).is_ok()
        );
    }

    #[test]
    fn test_completion_requires_admission() {
        assert!(
            StateTransition::validate(LifecycleState::ContextPending, LifecycleState::Completed)
                .is_err()
        );
        assert!(
            StateTransition::validate(LifecycleState::Created, LifecycleState::Admitted).is_err()
        );
    }

    #[test]
    fn test_terminal_states() {
        assert_eq!(
            StateTransition::validate(LifecycleState::Rejected, LifecycleState::Admitted),
            Err(TransitionError::FromTerminalState {
                state: LifecycleState::Rejected
            })
        );
        assert!(StateTransition::is_terminal(LifecycleState::HandedOff));
        assert!(!StateTransition::is_terminal(LifecycleState::Completed));
    }
}
