use crate::{ActionKind, SessionConfig};

const DEFAULT_MAX_CHARS: usize = 20_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TruncationMode {
    HeadTail,
    Tail,
}

pub fn default_truncation_mode_for_action(kind: ActionKind) -> TruncationMode {
    match kind {
        ActionKind::CheckBackground => TruncationMode::Tail,
        _ => TruncationMode::HeadTail,
    }
}

/// Applies the per-action character limit, then the line limit.
/// Returns the visible text and whether anything was removed.
pub fn truncate_action_output(
    output: &str,
    kind: ActionKind,
    config: &SessionConfig,
) -> (String, bool) {
    let max_chars = config
        .action_output_limits
        .get(kind.as_str())
        .copied()
        .unwrap_or(DEFAULT_MAX_CHARS);
    let mode = default_truncation_mode_for_action(kind);
    let mut text = truncate_chars(output, max_chars, mode);
    let mut truncated = text != output;

    if let Some(max_lines) = config.action_line_limits.get(kind.as_str()).copied() {
        let limited = truncate_lines(&text, max_lines);
        truncated |= limited != text;
        text = limited;
    }

    (text, truncated)
}

pub fn truncate_chars(output: &str, max_chars: usize, mode: TruncationMode) -> String {
    let char_count = output.chars().count();
    if char_count <= max_chars {
        return output.to_string();
    }

    let removed = char_count.saturating_sub(max_chars);
    match mode {
        TruncationMode::HeadTail => {
            let head = max_chars / 2;
            let tail = max_chars.saturating_sub(head);
            format!(
                "{}\n\n[Output truncated: {} characters removed from the middle of {} total]\n\n{}",
                take_head(output, head),
                removed,
                char_count,
                take_tail(output, tail)
            )
        }
        TruncationMode::Tail => format!(
            "[Output truncated: first {} characters removed]\n\n{}",
            removed,
            take_tail(output, max_chars)
        ),
    }
}

pub fn truncate_lines(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    if lines.len() <= max_lines {
        return output.to_string();
    }

    let head_count = max_lines / 2;
    let tail_count = max_lines.saturating_sub(head_count);
    let omitted = lines.len().saturating_sub(head_count + tail_count);

    let head = lines[..head_count].join("\n");
    let tail = lines[lines.len() - tail_count..].join("\n");
    format!("{head}\n\n[... {omitted} lines omitted ...]\n\n{tail}")
}

fn take_head(input: &str, char_count: usize) -> String {
    input.chars().take(char_count).collect()
}

fn take_tail(input: &str, char_count: usize) -> String {
    let total = input.chars().count();
    input
        .chars()
        .skip(total.saturating_sub(char_count))
        .collect()
}
