use crate::{ActionStatus, ConversationState, SubmitResult, Turn};
use mashell_llm::{Message, Usage};
use std::time::{SystemTime, UNIX_EPOCH};

use super::LoopState;

pub(super) fn convert_history_to_messages(
    system_prompt: &str,
    conversation: &ConversationState,
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(Message::system(system_prompt));

    for turn in conversation.turns() {
        match turn {
            Turn::User(turn) => messages.push(Message::user(turn.content.clone())),
            Turn::Assistant(turn) if turn.tool_calls.is_empty() => {
                messages.push(Message::assistant(turn.content.clone()));
            }
            Turn::Assistant(turn) => messages.push(Message::assistant_with_tool_calls(
                turn.content.clone(),
                turn.tool_calls.clone(),
            )),
            Turn::ActionResult(turn) => messages.push(Message::tool_result(
                turn.tool_call_id.clone(),
                turn.result.to_tool_content(),
            )),
        }
    }

    messages
}

pub(super) fn summarize_run(
    conversation: &ConversationState,
    baseline: usize,
    steps: usize,
    final_state: LoopState,
) -> SubmitResult {
    let mut assistant_text = String::new();
    let mut usage = Usage::default();
    let mut executed_count = 0;
    let mut denied_count = 0;
    let mut rejected_count = 0;

    for turn in conversation.turns().iter().skip(baseline) {
        match turn {
            Turn::Assistant(turn) => {
                if !turn.content.trim().is_empty() {
                    assistant_text = turn.content.clone();
                }
                usage = usage + turn.usage.clone();
            }
            Turn::ActionResult(turn) => match turn.result.status {
                ActionStatus::Denied => denied_count += 1,
                ActionStatus::Rejected => rejected_count += 1,
                _ => executed_count += 1,
            },
            Turn::User(_) => {}
        }
    }

    SubmitResult {
        final_state,
        assistant_text,
        steps,
        executed_count,
        denied_count,
        rejected_count,
        usage,
    }
}

pub(super) fn current_timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs().to_string()
}
