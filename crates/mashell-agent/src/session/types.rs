use mashell_llm::Usage;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoopState {
    Idle,
    AwaitingModel,
    DispatchingAction,
    AwaitingPermission,
    AwaitingExecution,
    Done,
    Aborted,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::AwaitingModel => "AWAITING_MODEL",
            Self::DispatchingAction => "DISPATCHING_ACTION",
            Self::AwaitingPermission => "AWAITING_PERMISSION",
            Self::AwaitingExecution => "AWAITING_EXECUTION",
            Self::Done => "DONE",
            Self::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    pub fn can_transition_to(&self, next: &LoopState) -> bool {
        if self == next {
            return true;
        }

        match self {
            Self::Idle | Self::Done | Self::Aborted => matches!(next, Self::AwaitingModel),
            Self::AwaitingModel => matches!(
                next,
                Self::Done | Self::DispatchingAction | Self::Aborted
            ),
            Self::DispatchingAction => matches!(
                next,
                Self::AwaitingPermission | Self::AwaitingModel | Self::Aborted
            ),
            Self::AwaitingPermission => matches!(
                next,
                Self::AwaitingExecution
                    | Self::DispatchingAction
                    | Self::AwaitingModel
                    | Self::Aborted
            ),
            Self::AwaitingExecution => matches!(
                next,
                Self::DispatchingAction | Self::AwaitingModel | Self::Aborted
            ),
        }
    }
}

impl Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one completed prompt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub final_state: LoopState,
    /// Last non-empty assistant text of the run.
    pub assistant_text: String,
    pub steps: usize,
    pub executed_count: usize,
    pub denied_count: usize,
    pub rejected_count: usize,
    pub usage: Usage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_only_restart_into_awaiting_model() {
        for state in [LoopState::Idle, LoopState::Done, LoopState::Aborted] {
            assert!(state.can_transition_to(&LoopState::AwaitingModel));
            assert!(!state.can_transition_to(&LoopState::AwaitingExecution));
        }
    }

    #[test]
    fn execution_requires_passing_through_permission() {
        assert!(!LoopState::DispatchingAction.can_transition_to(&LoopState::AwaitingExecution));
        assert!(LoopState::AwaitingPermission.can_transition_to(&LoopState::AwaitingExecution));
        assert!(!LoopState::AwaitingModel.can_transition_to(&LoopState::AwaitingExecution));
    }
}
