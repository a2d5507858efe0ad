use crate::ExecutionEnvironment;
use serde::{Deserialize, Serialize};

/// Facts about the machine the model is operating on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentContext {
    pub os: String,
    pub os_version: String,
    pub shell: String,
    pub user: String,
    pub working_directory: String,
    pub time: String,
}

impl EnvironmentContext {
    pub fn detect(env: &dyn ExecutionEnvironment) -> Self {
        let working_directory = env
            .working_directory()
            .canonicalize()
            .unwrap_or_else(|_| env.working_directory().to_path_buf());
        Self {
            os: display_os_name(env.platform()),
            os_version: env.os_version().to_string(),
            shell: std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string()),
            user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_else(|_| "user".to_string()),
            working_directory: working_directory.to_string_lossy().into_owned(),
            time: current_local_time(),
        }
    }
}

fn display_os_name(platform: &str) -> String {
    match platform {
        "macos" => "macOS".to_string(),
        "linux" => "Linux".to_string(),
        "windows" => "Windows".to_string(),
        other => other.to_string(),
    }
}

fn current_local_time() -> String {
    #[cfg(not(windows))]
    {
        if let Ok(output) = std::process::Command::new("date")
            .arg("+%Y-%m-%d %H:%M")
            .output()
        {
            let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if output.status.success() && !text.is_empty() {
                return text;
            }
        }
    }
    "unknown".to_string()
}

pub fn build_system_prompt(context: &EnvironmentContext) -> String {
    let macos_notes = if context.os == "macOS" {
        "\n## macOS notes\n- Packages come from `brew`.\n- `open` opens files and URLs in their default app.\n- In-place sed needs an empty suffix: `sed -i ''`.\n"
    } else {
        ""
    };

    format!(
        r#"You are MaShell, an autonomous agent that solves problems on the user's machine.

## System
- OS: {os} {os_version} | Shell: {shell} | User: {user}
- Working directory: {cwd}
- Time: {time}
{macos_notes}
## Language
Answer in the language the user writes in.

## How to work
Investigate the way a careful person would. Start broad, narrow down, and take one small step at a time:
1. Decide what you need to learn next.
2. Run one simple action.
3. Read the result before choosing the next step.

Prefer short commands that are easy to read. Avoid long pipelines and one-liners that try to do everything at once.

## Actions
- `execute_command` runs a shell command to completion (default timeout 120 seconds).
- `read_file`, `write_file`, `delete_file` and `list_directory` work on files directly; prefer them over `cat`, redirection or `rm`.
- `run_background` starts servers, watchers and long builds. Follow up with `check_background` and stop them with `cancel_background`.

Every action may need the user's approval. If an action is denied, do not retry it unchanged; choose a different approach or explain what you need.

## Finishing
Keep going on your own until the task is done; do not ask whether to continue. Stop when you have a verified answer, or when several different approaches have failed and you can say why the task is not possible. Finish with a short summary of the result."#,
        os = context.os,
        os_version = context.os_version,
        shell = context.shell,
        user = context.user,
        cwd = context.working_directory,
        time = context.time,
    )
}
