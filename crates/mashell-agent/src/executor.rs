use crate::{
    ActionInvocation, ActionKind, BackgroundJobs, DirEntry, ExecResult, ExecutionEnvironment,
    JobSnapshot, JobStatus, SessionConfig, truncate_action_output,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info};

pub const DENIED_BY_USER: &str = "denied by user";
pub const NOT_EXECUTED_ABORTED: &str = "not executed: task aborted";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Completed,
    Failed,
    TimedOut,
    Cancelled,
    Running,
    Denied,
    /// Never reached the executor: unknown action, invalid arguments or abort.
    Rejected,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Running => "running",
            Self::Denied => "denied",
            Self::Rejected => "rejected",
        }
    }
}

/// Outcome of one invocation, exactly as the model will see it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub output: String,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub truncated: bool,
}

impl ActionResult {
    fn new(success: bool, status: ActionStatus, output: impl Into<String>) -> Self {
        Self {
            success,
            output: output.into(),
            status,
            exit_code: None,
            truncated: false,
        }
    }

    pub fn completed(output: impl Into<String>) -> Self {
        Self::new(true, ActionStatus::Completed, output)
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self::new(false, ActionStatus::Failed, output)
    }

    pub fn denied() -> Self {
        Self::new(false, ActionStatus::Denied, DENIED_BY_USER)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(false, ActionStatus::Rejected, message)
    }

    pub fn aborted() -> Self {
        Self::rejected(NOT_EXECUTED_ABORTED)
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// The payload of the tool-result message sent back to the model.
    pub fn to_tool_content(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::String(self.output.clone()))
    }

    pub fn from_tool_content(content: &Value) -> Option<Self> {
        match content {
            Value::String(text) => serde_json::from_str(text).ok(),
            other => serde_json::from_value(other.clone()).ok(),
        }
    }
}

/// Performs approved invocations against the execution environment.
#[derive(Clone)]
pub struct ActionExecutor {
    env: Arc<dyn ExecutionEnvironment>,
    config: SessionConfig,
}

impl ActionExecutor {
    pub fn new(env: Arc<dyn ExecutionEnvironment>, config: SessionConfig) -> Self {
        Self { env, config }
    }

    pub fn environment(&self) -> &Arc<dyn ExecutionEnvironment> {
        &self.env
    }

    /// Never retries and never raises: OS failures become failed results.
    pub async fn run(
        &self,
        invocation: &ActionInvocation,
        jobs: &mut BackgroundJobs,
    ) -> ActionResult {
        let kind = invocation.kind();
        debug!(action = %kind, subject = ?invocation.subject(), "executing action");
        let mut result = match kind {
            ActionKind::ExecuteCommand => self.execute_command(invocation).await,
            ActionKind::ReadFile => self.read_file(invocation).await,
            ActionKind::WriteFile => self.write_file(invocation).await,
            ActionKind::DeleteFile => self.delete_file(invocation).await,
            ActionKind::ListDirectory => self.list_directory(invocation).await,
            ActionKind::RunBackground => self.run_background(invocation, jobs).await,
            ActionKind::CheckBackground => self.check_background(invocation, jobs).await,
            ActionKind::CancelBackground => self.cancel_background(invocation, jobs).await,
        };

        let (output, truncated) = truncate_action_output(&result.output, kind, &self.config);
        result.output = output;
        result.truncated = truncated;
        info!(
            action = %kind,
            status = result.status.as_str(),
            exit_code = ?result.exit_code,
            truncated,
            "action finished"
        );
        result
    }

    fn command_timeout_ms(&self, invocation: &ActionInvocation) -> u64 {
        let default_ms = self.config.default_command_timeout_ms.max(1);
        let max_ms = self.config.max_command_timeout_ms.max(default_ms);
        match invocation.u64_param("timeout") {
            Some(0) | None => default_ms,
            Some(seconds) => seconds.saturating_mul(1_000).min(max_ms),
        }
    }

    async fn execute_command(&self, invocation: &ActionInvocation) -> ActionResult {
        let command = invocation.str_param("command").unwrap_or_default();
        let timeout_ms = self.command_timeout_ms(invocation);
        match self
            .env
            .exec_command(command, timeout_ms, invocation.str_param("working_dir"))
            .await
        {
            Ok(exec) => command_result(exec, timeout_ms),
            Err(error) => ActionResult::failed(format!("Error: {error}")),
        }
    }

    async fn read_file(&self, invocation: &ActionInvocation) -> ActionResult {
        let path = invocation.str_param("path").unwrap_or_default();
        let content = match self.env.read_file(path).await {
            Ok(content) => content,
            Err(error) => return ActionResult::failed(format!("Error: {error}")),
        };
        if content.is_empty() {
            return ActionResult::completed("(empty file)");
        }

        let offset = invocation.u64_param("offset").unwrap_or(1).max(1) as usize;
        let total = content.lines().count();
        let selected: Vec<&str> = content
            .lines()
            .skip(offset - 1)
            .take(
                invocation
                    .u64_param("limit")
                    .map(|limit| limit as usize)
                    .unwrap_or(usize::MAX),
            )
            .collect();
        if selected.is_empty() {
            return ActionResult::completed(format!(
                "(no lines at offset {offset}; the file has {total} lines)"
            ));
        }
        ActionResult::completed(format_line_numbered_content(&selected, offset))
    }

    async fn write_file(&self, invocation: &ActionInvocation) -> ActionResult {
        let path = invocation.str_param("path").unwrap_or_default();
        let content = invocation.str_param("content").unwrap_or_default();
        let append = invocation.bool_param("append").unwrap_or(false);
        match self.env.write_file(path, content, append).await {
            Ok(bytes) if append => ActionResult::completed(format!("Appended {bytes} bytes to {path}")),
            Ok(bytes) => ActionResult::completed(format!("Wrote {bytes} bytes to {path}")),
            Err(error) => ActionResult::failed(format!("Error: {error}")),
        }
    }

    async fn delete_file(&self, invocation: &ActionInvocation) -> ActionResult {
        let path = invocation.str_param("path").unwrap_or_default();
        let recursive = invocation.bool_param("recursive").unwrap_or(false);
        match self.env.delete_path(path, recursive).await {
            Ok(()) => ActionResult::completed(format!("Deleted {path}")),
            Err(error) => ActionResult::failed(format!("Error: {error}")),
        }
    }

    async fn list_directory(&self, invocation: &ActionInvocation) -> ActionResult {
        let path = invocation.str_param("path").unwrap_or_default();
        let depth = invocation.u64_param("depth").unwrap_or(1) as usize;
        match self.env.list_directory(path, depth).await {
            Ok(entries) if entries.is_empty() => ActionResult::completed("(empty directory)"),
            Ok(entries) => ActionResult::completed(format_dir_entries(&entries)),
            Err(error) => ActionResult::failed(format!("Error: {error}")),
        }
    }

    async fn run_background(
        &self,
        invocation: &ActionInvocation,
        jobs: &mut BackgroundJobs,
    ) -> ActionResult {
        let command = invocation.str_param("command").unwrap_or_default();
        match self
            .env
            .spawn_background(command, invocation.str_param("working_dir"))
            .await
        {
            Ok(handle) => {
                let task_id = jobs.insert(handle);
                ActionResult::new(
                    true,
                    ActionStatus::Running,
                    format!(
                        "Started background task {task_id}: {command}\nUse check_background with task_id \"{task_id}\" to read its output."
                    ),
                )
            }
            Err(error) => ActionResult::failed(format!("Error: {error}")),
        }
    }

    async fn check_background(
        &self,
        invocation: &ActionInvocation,
        jobs: &mut BackgroundJobs,
    ) -> ActionResult {
        let task_id = invocation.str_param("task_id").unwrap_or_default();
        let Some(handle) = jobs.get_mut(task_id) else {
            return retired_or_unknown(task_id, jobs);
        };
        let wait_ms = invocation
            .u64_param("wait_seconds")
            .unwrap_or(0)
            .saturating_mul(1_000)
            .min(self.config.max_background_wait_ms);
        let snapshot = handle.poll(Duration::from_millis(wait_ms)).await;
        jobs.retire(task_id);
        job_result(snapshot)
    }

    async fn cancel_background(
        &self,
        invocation: &ActionInvocation,
        jobs: &mut BackgroundJobs,
    ) -> ActionResult {
        let task_id = invocation.str_param("task_id").unwrap_or_default();
        let Some(handle) = jobs.get_mut(task_id) else {
            return retired_or_unknown(task_id, jobs);
        };
        let grace = Duration::from_millis(self.config.background_cancel_grace_ms);
        let snapshot = handle.cancel(grace).await;
        jobs.retire(task_id);
        job_result(snapshot)
    }
}

fn command_result(exec: ExecResult, timeout_ms: u64) -> ActionResult {
    let mut output = exec.stdout;
    if !exec.stderr.is_empty() {
        output.push_str("\n[stderr]:\n");
        output.push_str(&exec.stderr);
    }

    if exec.timed_out {
        output.push_str(&format!(
            "\n[Command timed out after {}s; partial output shown]",
            timeout_ms / 1_000
        ));
        return ActionResult::new(false, ActionStatus::TimedOut, output);
    }

    match exec.exit_code {
        Some(0) => {
            if output.is_empty() {
                output.push_str("(no output)");
            }
            ActionResult::completed(output).with_exit_code(Some(0))
        }
        exit_code => {
            if output.is_empty() {
                output = match exit_code {
                    Some(code) => format!("(no output; exit code {code})"),
                    None => "(no output; terminated by signal)".to_string(),
                };
            }
            ActionResult::failed(output).with_exit_code(exit_code)
        }
    }
}

fn job_result(snapshot: JobSnapshot) -> ActionResult {
    let status_line = match snapshot.status {
        JobStatus::Running => "running".to_string(),
        JobStatus::Completed => "completed".to_string(),
        JobStatus::Failed {
            exit_code: Some(code),
        } => format!("failed (exit code {code})"),
        JobStatus::Failed { exit_code: None } => "failed".to_string(),
        JobStatus::Cancelled => "cancelled".to_string(),
    };
    let body = if snapshot.output.is_empty() {
        "(no new output)".to_string()
    } else {
        snapshot.output
    };
    let output = format!(
        "[task {}: {}, {}s elapsed]\n{}",
        snapshot.task_id,
        status_line,
        snapshot.elapsed.as_secs(),
        body
    );

    let (success, status) = match snapshot.status {
        JobStatus::Running => (true, ActionStatus::Running),
        JobStatus::Completed => (true, ActionStatus::Completed),
        JobStatus::Failed { .. } => (false, ActionStatus::Failed),
        JobStatus::Cancelled => (true, ActionStatus::Cancelled),
    };
    ActionResult::new(success, status, output).with_exit_code(snapshot.status.exit_code())
}

fn retired_or_unknown(task_id: &str, jobs: &BackgroundJobs) -> ActionResult {
    match jobs.finished(task_id) {
        Some(last) => job_result(last.clone()),
        None => unknown_task(task_id, jobs),
    }
}

fn unknown_task(task_id: &str, jobs: &BackgroundJobs) -> ActionResult {
    let known = jobs.ids();
    if known.is_empty() {
        ActionResult::failed(format!("Error: unknown task_id '{task_id}'; no background tasks exist"))
    } else {
        ActionResult::failed(format!(
            "Error: unknown task_id '{task_id}'; known tasks: {}",
            known.join(", ")
        ))
    }
}

fn format_line_numbered_content(lines: &[&str], start_line: usize) -> String {
    lines
        .iter()
        .enumerate()
        .map(|(idx, line)| format!("{} | {}", start_line + idx, line))
        .collect::<Vec<String>>()
        .join("\n")
}

fn format_dir_entries(entries: &[DirEntry]) -> String {
    entries
        .iter()
        .map(|entry| match (entry.is_dir, entry.size) {
            (true, _) => format!("{}/", entry.path),
            (false, Some(size)) => format!("{} ({size} bytes)", entry.path),
            (false, None) => entry.path.clone(),
        })
        .collect::<Vec<String>>()
        .join("\n")
}
