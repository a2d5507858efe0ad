use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ActionKind;

/// The model's literal tool call, kept so results can be attributed to it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawOrigin {
    pub call_id: String,
    pub name: String,
    pub raw_arguments: String,
}

/// A validated request to perform one action.
///
/// Only the registry constructs invocations, so every instance has passed
/// schema validation. Edits produce a new invocation rather than mutating this one.
/// Serializable for logs and events, but never deserialized.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionInvocation {
    kind: ActionKind,
    parameters: Value,
    origin: RawOrigin,
}

impl ActionInvocation {
    pub(crate) fn new(kind: ActionKind, parameters: Value, origin: RawOrigin) -> Self {
        Self {
            kind,
            parameters,
            origin,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn parameters(&self) -> &Value {
        &self.parameters
    }

    pub fn origin(&self) -> &RawOrigin {
        &self.origin
    }

    pub fn call_id(&self) -> &str {
        &self.origin.call_id
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    pub fn u64_param(&self, key: &str) -> Option<u64> {
        self.parameters.get(key).and_then(Value::as_u64)
    }

    pub fn bool_param(&self, key: &str) -> Option<bool> {
        self.parameters.get(key).and_then(Value::as_bool)
    }

    /// The command text, path or task id this invocation acts on.
    pub fn subject(&self) -> Option<&str> {
        self.str_param(self.kind.subject_parameter())
    }

    /// One-line rendering for prompts and logs.
    pub fn summary(&self) -> String {
        match self.kind {
            ActionKind::ExecuteCommand => format!("$ {}", self.subject().unwrap_or_default()),
            ActionKind::RunBackground => format!("$ {} &", self.subject().unwrap_or_default()),
            _ => format!("{}({})", self.kind, self.subject().unwrap_or_default()),
        }
    }
}
