use mashell_llm::SDKError;
use thiserror::Error;

/// Fatal errors: each one ends the current run.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("permission unavailable: {0}")]
    PermissionUnavailable(String),
    #[error("task aborted: exceeded maximum steps ({max_steps})")]
    StepLimitExceeded { max_steps: usize },
    #[error("invalid loop state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
    #[error("event delivery failed: {0}")]
    Event(String),
    #[error(transparent)]
    Llm(#[from] SDKError),
}

impl AgentError {
    /// True for the conditions that move the loop into `Aborted`.
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            Self::PermissionUnavailable(_) | Self::StepLimitExceeded { .. } | Self::Llm(_)
        )
    }
}

/// Mistakes in a model-proposed invocation. Reported back to the model, never fatal.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("invalid invocation of '{action}': {reason}")]
    InvalidInvocation { action: String, reason: String },
}

impl ActionError {
    pub fn invalid(action: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInvocation {
            action: action.into(),
            reason: reason.into(),
        }
    }
}

/// OS-level failures inside the execution environment.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Failed(String),
}

impl ExecutionError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
