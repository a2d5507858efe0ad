//! Console rendering of session events.

use colored::Colorize;
use mashell_agent::{AgentError, EventEmitter, EventKind, SessionEvent};
use serde_json::Value;

const OUTPUT_PREVIEW_LINES: usize = 15;

/// Prints session events to the terminal as they happen.
#[derive(Clone, Debug, Default)]
pub struct ConsoleRenderer {
    verbose: bool,
}

impl ConsoleRenderer {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    fn render(&self, event: &SessionEvent) {
        let text = |key: &str| event.str_field(key).unwrap_or_default().to_string();
        let flag = |key: &str| event.data.get(key).and_then(Value::as_bool).unwrap_or(false);

        match event.kind {
            EventKind::SessionStart => {
                if self.verbose {
                    println!(
                        "{}",
                        format!("session {} (model {})", event.session_id, text("model")).dimmed()
                    );
                }
                if flag("approve_all") {
                    println!("{}", "approve-all mode: every action runs without asking".yellow());
                }
            }
            EventKind::StateChanged if self.verbose => {
                println!("{}", format!("  · {} -> {}", text("from"), text("to")).dimmed());
            }
            EventKind::AssistantText => {
                println!();
                if flag("final") {
                    println!("{} {}", "MaShell:".green().bold(), text("content"));
                } else {
                    println!("{} {}", "·".cyan().bold(), text("content"));
                }
            }
            EventKind::ActionProposed if self.verbose => {
                println!(
                    "{}",
                    format!("  proposed {} ({})", text("action"), text("call_id")).dimmed()
                );
            }
            EventKind::ActionRejected => {
                println!(
                    "{} {}: {}",
                    "⚠ Rejected".yellow().bold(),
                    text("action"),
                    text("reason")
                );
            }
            EventKind::ActionApproved if self.verbose => {
                let how = if flag("automatic") {
                    "auto-approved"
                } else if flag("edited") {
                    "approved after edit"
                } else {
                    "approved"
                };
                println!("{}", format!("  {how}: {}", text("summary")).dimmed());
            }
            EventKind::ActionDenied => {
                println!("{} {}", "✗ Denied:".red().bold(), text("summary"));
            }
            EventKind::ActionStarted => {
                println!();
                println!("{}", "▶ Run:".yellow().bold());
                println!("  {}", text("summary").cyan());
            }
            EventKind::ActionFinished => self.render_action_output(event),
            EventKind::Aborted => {
                println!();
                println!("{} {}", "Task aborted:".red().bold(), text("reason"));
            }
            EventKind::Warning => println!("{} {}", "warning:".yellow(), text("message")),
            EventKind::Error => println!("{} {}", "error:".red(), text("message")),
            EventKind::SessionEnd if self.verbose => {
                println!(
                    "{}",
                    format!("session ended in state {}", text("final_state")).dimmed()
                );
            }
            _ => {}
        }
    }

    fn render_action_output(&self, event: &SessionEvent) {
        let status = event.str_field("status").unwrap_or_default();
        let output = event.str_field("output").unwrap_or_default();
        let success = event
            .data
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        match status {
            "cancelled" => println!("{}", "⏹ Cancelled".yellow()),
            "timed_out" => println!("{}", "⏱ Timed out".yellow().bold()),
            "running" => println!("{} {}", "↻".cyan(), output),
            _ if !success => {
                println!("{}", "✗ Failed:".red().bold());
                println!("{}", preview(output, self.verbose).dimmed());
            }
            _ if output.trim().is_empty() || output == "(no output)" => {
                println!("{}", "✓ Done".green());
            }
            _ => {
                println!("{}", "📋 Output:".blue().bold());
                println!("{}", preview(output, self.verbose).dimmed());
            }
        }
    }
}

impl EventEmitter for ConsoleRenderer {
    fn emit(&self, event: SessionEvent) -> Result<(), AgentError> {
        self.render(&event);
        Ok(())
    }
}

/// First lines of an action's output; verbose mode shows everything.
fn preview(output: &str, verbose: bool) -> String {
    let lines: Vec<&str> = output.lines().collect();
    if verbose || lines.len() <= OUTPUT_PREVIEW_LINES {
        return output.to_string();
    }
    let hidden = lines.len() - OUTPUT_PREVIEW_LINES;
    format!(
        "{}\n... ({hidden} more lines)",
        lines[..OUTPUT_PREVIEW_LINES].join("\n")
    )
}
