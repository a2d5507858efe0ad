//! Interactive prompt loop with persistent history.

use colored::Colorize;
use mashell_agent::Session;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, EditMode, Editor};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub enum ReadlineEvent {
    Line(String),
    Interrupted,
    Eof,
}

pub struct ReplEditor {
    editor: Editor<(), DefaultHistory>,
    history_path: Option<PathBuf>,
}

impl ReplEditor {
    /// History lives in `~/.mashell/history`; without a home directory it is
    /// kept in memory only.
    pub fn new() -> Result<Self, String> {
        let config = Config::builder()
            .history_ignore_dups(true)
            .map_err(|error| error.to_string())?
            .edit_mode(EditMode::Emacs)
            .auto_add_history(true)
            .build();
        let mut editor = Editor::with_config(config).map_err(|error| error.to_string())?;

        let history_path = dirs::home_dir().map(|home| home.join(".mashell").join("history"));
        if let Some(path) = &history_path {
            if let Err(error) = ensure_history_parent(path) {
                warn!(path = %path.display(), %error, "cannot create history directory");
            }
            if path.exists() {
                if let Err(error) = editor.load_history(path) {
                    warn!(path = %path.display(), %error, "cannot load history");
                }
            } else {
                debug!(path = %path.display(), "no history yet");
            }
        }

        Ok(Self {
            editor,
            history_path,
        })
    }

    pub fn readline(&mut self) -> ReadlineEvent {
        match self.editor.readline("You: ") {
            Ok(line) => {
                if let Some(path) = &self.history_path {
                    if let Err(error) = self.editor.save_history(path) {
                        debug!(path = %path.display(), %error, "cannot save history");
                    }
                }
                ReadlineEvent::Line(line)
            }
            Err(ReadlineError::Interrupted) => ReadlineEvent::Interrupted,
            Err(_) => ReadlineEvent::Eof,
        }
    }
}

fn ensure_history_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) => std::fs::create_dir_all(parent),
        None => Ok(()),
    }
}

pub fn is_exit_command(input: &str) -> bool {
    matches!(input.to_ascii_lowercase().as_str(), "exit" | "quit" | "q")
}

/// Runs prompts until the user leaves. A failed prompt does not end the loop.
pub async fn run_repl(session: &mut Session) -> Result<(), String> {
    let mut editor = ReplEditor::new()?;
    println!("{}", "Interactive mode. Type 'exit' or 'quit' to exit.".dimmed());
    println!();

    loop {
        match editor.readline() {
            ReadlineEvent::Line(line) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                if is_exit_command(input) {
                    println!("{}", "Goodbye!".dimmed());
                    return Ok(());
                }
                if let Err(error) = session.submit(input).await {
                    if !error.is_abort() {
                        eprintln!("{} {error}", "error:".red().bold());
                    }
                }
                println!();
            }
            ReadlineEvent::Interrupted => {
                println!("{}", "Use 'exit' to quit.".dimmed());
            }
            ReadlineEvent::Eof => {
                println!("{}", "Goodbye!".dimmed());
                return Ok(());
            }
        }
    }
}
