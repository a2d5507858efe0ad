use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Runtime limits for one agent session.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    /// Action-dispatch cycles allowed per user prompt before the run aborts.
    pub max_steps: usize,
    pub default_command_timeout_ms: u64,
    pub max_command_timeout_ms: u64,
    pub max_background_wait_ms: u64,
    pub background_cancel_grace_ms: u64,
    pub system_prompt_override: Option<String>,
    pub action_output_limits: HashMap<String, usize>,
    pub action_line_limits: HashMap<String, usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            default_command_timeout_ms: 120_000,
            max_command_timeout_ms: 600_000,
            max_background_wait_ms: 30_000,
            background_cancel_grace_ms: 2_000,
            system_prompt_override: None,
            action_output_limits: default_action_output_limits(),
            action_line_limits: default_action_line_limits(),
        }
    }
}

pub fn default_action_output_limits() -> HashMap<String, usize> {
    HashMap::from([
        ("execute_command".to_string(), 10_000),
        ("read_file".to_string(), 50_000),
        ("list_directory".to_string(), 20_000),
        ("check_background".to_string(), 10_000),
        ("write_file".to_string(), 1_000),
        ("delete_file".to_string(), 1_000),
    ])
}

pub fn default_action_line_limits() -> HashMap<String, usize> {
    HashMap::from([
        ("execute_command".to_string(), 200),
        ("check_background".to_string(), 200),
        ("list_directory".to_string(), 500),
    ])
}

/// Static permission lists, as loaded from the `permissions` section of the config file.
///
/// Entries are `kind` or `kind:glob`, e.g. `read_file` or `execute_command:git status*`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    pub auto_approve: Vec<String>,
    pub always_ask: Vec<String>,
    pub auto_approve_read_only: bool,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            auto_approve: Vec::new(),
            always_ask: Vec::new(),
            auto_approve_read_only: true,
        }
    }
}
