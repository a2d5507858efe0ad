mod classify;
mod invocation;
mod registry;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt::{self, Display};

pub use classify::classify_command;
pub use invocation::{ActionInvocation, RawOrigin};
pub use registry::{ActionRegistry, ActionSpec};

pub const EXECUTE_COMMAND_ACTION: &str = "execute_command";
pub const READ_FILE_ACTION: &str = "read_file";
pub const WRITE_FILE_ACTION: &str = "write_file";
pub const DELETE_FILE_ACTION: &str = "delete_file";
pub const LIST_DIRECTORY_ACTION: &str = "list_directory";
pub const RUN_BACKGROUND_ACTION: &str = "run_background";
pub const CHECK_BACKGROUND_ACTION: &str = "check_background";
pub const CANCEL_BACKGROUND_ACTION: &str = "cancel_background";

/// The closed set of actions a model may invoke.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ExecuteCommand,
    ReadFile,
    WriteFile,
    DeleteFile,
    ListDirectory,
    RunBackground,
    CheckBackground,
    CancelBackground,
}

/// Coarse risk category used by the permission policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    ReadOnly,
    Destructive,
    Network,
    Execute,
}

impl RiskClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::Destructive => "destructive",
            Self::Network => "network",
            Self::Execute => "execute",
        }
    }

    pub fn requires_confirmation(&self) -> bool {
        matches!(self, Self::Destructive | Self::Execute)
    }
}

impl Display for RiskClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ActionKind {
    pub const ALL: [ActionKind; 8] = [
        ActionKind::ExecuteCommand,
        ActionKind::ReadFile,
        ActionKind::WriteFile,
        ActionKind::DeleteFile,
        ActionKind::ListDirectory,
        ActionKind::RunBackground,
        ActionKind::CheckBackground,
        ActionKind::CancelBackground,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecuteCommand => EXECUTE_COMMAND_ACTION,
            Self::ReadFile => READ_FILE_ACTION,
            Self::WriteFile => WRITE_FILE_ACTION,
            Self::DeleteFile => DELETE_FILE_ACTION,
            Self::ListDirectory => LIST_DIRECTORY_ACTION,
            Self::RunBackground => RUN_BACKGROUND_ACTION,
            Self::CheckBackground => CHECK_BACKGROUND_ACTION,
            Self::CancelBackground => CANCEL_BACKGROUND_ACTION,
        }
    }

    /// Resolves a model- or config-supplied name. `shell` is the legacy name
    /// for `execute_command`.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        if name == "shell" {
            return Some(Self::ExecuteCommand);
        }
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }

    pub fn base_risk(&self) -> RiskClass {
        match self {
            Self::ReadFile | Self::ListDirectory | Self::CheckBackground => RiskClass::ReadOnly,
            Self::WriteFile | Self::DeleteFile => RiskClass::Destructive,
            Self::ExecuteCommand | Self::RunBackground | Self::CancelBackground => {
                RiskClass::Execute
            }
        }
    }

    /// Parameter that names what the action touches; permission patterns match against it.
    pub fn subject_parameter(&self) -> &'static str {
        match self {
            Self::ExecuteCommand | Self::RunBackground => "command",
            Self::ReadFile | Self::WriteFile | Self::DeleteFile | Self::ListDirectory => "path",
            Self::CheckBackground | Self::CancelBackground => "task_id",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::ExecuteCommand => {
                "Execute a shell command and wait for it to finish. Returns combined stdout/stderr and the exit code. Use for short-lived commands."
            }
            Self::ReadFile => "Read a text file. Returns line-numbered content.",
            Self::WriteFile => {
                "Write content to a file, creating parent directories as needed. Set append to add to the end instead of replacing."
            }
            Self::DeleteFile => {
                "Delete a file. Directories are only removed when recursive is true."
            }
            Self::ListDirectory => {
                "List the entries of a directory, descending up to depth levels (default 1)."
            }
            Self::RunBackground => {
                "Start a long-running shell command in the background (servers, watchers, long builds). Returns a task_id for check_background."
            }
            Self::CheckBackground => {
                "Return new output and the status of a background task, waiting up to wait_seconds for it to finish."
            }
            Self::CancelBackground => "Terminate a running background task.",
        }
    }

    pub fn parameters(&self) -> Value {
        match self {
            Self::ExecuteCommand => json!({
                "type": "object",
                "required": ["command"],
                "properties": {
                    "command": { "type": "string", "minLength": 1, "description": "The shell command to execute" },
                    "working_dir": { "type": "string", "description": "Working directory for the command" },
                    "timeout": { "type": "integer", "description": "Timeout in seconds (default 120)" }
                },
                "additionalProperties": false
            }),
            Self::ReadFile => json!({
                "type": "object",
                "required": ["path"],
                "properties": {
                    "path": { "type": "string", "minLength": 1 },
                    "offset": { "type": "integer", "description": "1-based first line" },
                    "limit": { "type": "integer", "description": "Maximum number of lines" }
                },
                "additionalProperties": false
            }),
            Self::WriteFile => json!({
                "type": "object",
                "required": ["path", "content"],
                "properties": {
                    "path": { "type": "string", "minLength": 1 },
                    "content": { "type": "string" },
                    "append": { "type": "boolean" }
                },
                "additionalProperties": false
            }),
            Self::DeleteFile => json!({
                "type": "object",
                "required": ["path"],
                "properties": {
                    "path": { "type": "string", "minLength": 1 },
                    "recursive": { "type": "boolean" }
                },
                "additionalProperties": false
            }),
            Self::ListDirectory => json!({
                "type": "object",
                "required": ["path"],
                "properties": {
                    "path": { "type": "string", "minLength": 1 },
                    "depth": { "type": "integer" }
                },
                "additionalProperties": false
            }),
            Self::RunBackground => json!({
                "type": "object",
                "required": ["command"],
                "properties": {
                    "command": { "type": "string", "minLength": 1 },
                    "working_dir": { "type": "string" }
                },
                "additionalProperties": false
            }),
            Self::CheckBackground => json!({
                "type": "object",
                "required": ["task_id"],
                "properties": {
                    "task_id": { "type": "string", "minLength": 1 },
                    "wait_seconds": { "type": "integer" }
                },
                "additionalProperties": false
            }),
            Self::CancelBackground => json!({
                "type": "object",
                "required": ["task_id"],
                "properties": {
                    "task_id": { "type": "string", "minLength": 1 }
                },
                "additionalProperties": false
            }),
        }
    }
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_every_kind_and_the_shell_alias() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ActionKind::parse("shell"), Some(ActionKind::ExecuteCommand));
        assert_eq!(ActionKind::parse("launch_missiles"), None);
    }

    #[test]
    fn every_schema_requires_its_subject_parameter() {
        for kind in ActionKind::ALL {
            let schema = kind.parameters();
            let required: Vec<&str> = schema["required"]
                .as_array()
                .expect("required list")
                .iter()
                .filter_map(Value::as_str)
                .collect();
            assert!(
                required.contains(&kind.subject_parameter()),
                "{kind} should require {}",
                kind.subject_parameter()
            );
        }
    }
}
