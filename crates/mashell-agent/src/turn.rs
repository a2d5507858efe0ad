use crate::ActionResult;
use mashell_llm::{ToolCall, Usage};
use serde::{Deserialize, Serialize};

pub type Timestamp = String;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserTurn {
    pub content: String,
    pub timestamp: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistantTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub response_id: Option<String>,
    pub timestamp: Timestamp,
}

/// One tool result, attributed to the call that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResultTurn {
    pub tool_call_id: String,
    pub action: String,
    pub result: ActionResult,
    pub timestamp: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Turn {
    User(UserTurn),
    Assistant(AssistantTurn),
    ActionResult(ActionResultTurn),
}

impl UserTurn {
    pub fn new(content: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            content: content.into(),
            timestamp,
        }
    }
}

impl AssistantTurn {
    pub fn new(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
        usage: Usage,
        response_id: Option<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            usage,
            response_id,
            timestamp,
        }
    }
}

impl ActionResultTurn {
    pub fn new(
        tool_call_id: impl Into<String>,
        action: impl Into<String>,
        result: ActionResult,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            action: action.into(),
            result,
            timestamp,
        }
    }
}

/// Ordered record of the conversation. Turns are appended, never edited or removed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    turns: Vec<Turn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Results appended so far, in order.
    pub fn action_results(&self) -> impl Iterator<Item = &ActionResultTurn> {
        self.turns.iter().filter_map(|turn| match turn {
            Turn::ActionResult(result) => Some(result),
            _ => None,
        })
    }

    /// Tool calls that have no result yet. Empty whenever the loop is idle.
    pub fn unanswered_calls(&self) -> Vec<String> {
        let mut pending: Vec<String> = Vec::new();
        for turn in &self.turns {
            match turn {
                Turn::Assistant(assistant) => {
                    pending.extend(assistant.tool_calls.iter().map(|call| call.id.clone()));
                }
                Turn::ActionResult(result) => {
                    pending.retain(|id| id != &result.tool_call_id);
                }
                Turn::User(_) => {}
            }
        }
        pending
    }
}
