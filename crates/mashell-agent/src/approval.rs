use crate::{
    ActionError, ActionInvocation, ActionKind, ActionRegistry, RiskClass, SessionPermissionMemory,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

/// What the human is asked to decide on.
#[derive(Clone, Debug, PartialEq)]
pub struct ApprovalRequest {
    pub invocation: ActionInvocation,
    pub risk: RiskClass,
}

impl ApprovalRequest {
    /// Label for the secondary input line of an edit.
    pub fn edit_hint(&self) -> &'static str {
        if is_command_kind(self.invocation.kind()) {
            "New command"
        } else {
            "New parameters (JSON)"
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApprovalResponse {
    Approve,
    Deny,
    /// Replacement command text, or a JSON parameter object.
    Edit(String),
    AlwaysApprove,
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct ChannelUnavailable {
    pub reason: String,
}

impl ChannelUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Transport for approval prompts. Blocks until the human answers.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    async fn ask(&self, request: &ApprovalRequest) -> Result<ApprovalResponse, ChannelUnavailable>;
}

/// Terminal prompt answering with single characters on stdin.
#[derive(Debug, Default)]
pub struct ConsoleApprovalChannel;

#[async_trait]
impl ApprovalChannel for ConsoleApprovalChannel {
    async fn ask(&self, request: &ApprovalRequest) -> Result<ApprovalResponse, ChannelUnavailable> {
        let request = request.clone();
        tokio::task::spawn_blocking(move || {
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let mut output = io::stderr();
            read_console_answer(&request, &mut input, &mut output)
        })
        .await
        .map_err(|error| ChannelUnavailable::new(format!("console prompt failed: {error}")))?
    }
}

/// Scripted answers. An exhausted queue is an unavailable channel.
#[derive(Default)]
pub struct QueueApprovalChannel {
    responses: Mutex<VecDeque<ApprovalResponse>>,
    asked: Mutex<Vec<ApprovalRequest>>,
}

impl QueueApprovalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = ApprovalResponse>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn push_response(&self, response: ApprovalResponse) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }

    pub fn pending(&self) -> usize {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Every request the channel was asked, in order.
    pub fn asked(&self) -> Vec<ApprovalRequest> {
        self.asked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ApprovalChannel for QueueApprovalChannel {
    async fn ask(&self, request: &ApprovalRequest) -> Result<ApprovalResponse, ChannelUnavailable> {
        self.asked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| ChannelUnavailable::new("no scripted approval left"))
    }
}

type ApprovalCallback = dyn Fn(&ApprovalRequest) -> Option<ApprovalResponse> + Send + Sync;

/// Delegates to a closure; `None` means unavailable.
pub struct CallbackApprovalChannel {
    callback: Arc<ApprovalCallback>,
}

impl CallbackApprovalChannel {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&ApprovalRequest) -> Option<ApprovalResponse> + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }
}

#[async_trait]
impl ApprovalChannel for CallbackApprovalChannel {
    async fn ask(&self, request: &ApprovalRequest) -> Result<ApprovalResponse, ChannelUnavailable> {
        (self.callback)(request)
            .ok_or_else(|| ChannelUnavailable::new("approval callback declined to answer"))
    }
}

/// For non-interactive runs: every request fails.
#[derive(Debug, Default)]
pub struct UnavailableApprovalChannel;

#[async_trait]
impl ApprovalChannel for UnavailableApprovalChannel {
    async fn ask(&self, _request: &ApprovalRequest) -> Result<ApprovalResponse, ChannelUnavailable> {
        Err(ChannelUnavailable::new(
            "no interactive approval channel (run in a terminal or pass --yes)",
        ))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionOutcome {
    Approved,
    Denied,
    ApprovedAlways,
}

/// The human's verdict. `invocation` is what will run, which differs from
/// the proposal when `edited` is set.
#[derive(Clone, Debug, PartialEq)]
pub struct PermissionDecision {
    pub outcome: PermissionOutcome,
    pub invocation: ActionInvocation,
    pub edited: bool,
}

impl PermissionDecision {
    pub fn is_denied(&self) -> bool {
        self.outcome == PermissionOutcome::Denied
    }
}

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("approval channel unavailable: {0}")]
    Unavailable(#[from] ChannelUnavailable),
    #[error(transparent)]
    InvalidEdit(#[from] ActionError),
}

/// Turns channel answers into permission decisions.
#[derive(Clone)]
pub struct InteractiveApprover {
    channel: Arc<dyn ApprovalChannel>,
    registry: ActionRegistry,
}

impl InteractiveApprover {
    pub fn new(channel: Arc<dyn ApprovalChannel>) -> Self {
        Self {
            channel,
            registry: ActionRegistry::builtin(),
        }
    }

    pub async fn request(
        &self,
        invocation: ActionInvocation,
        risk: RiskClass,
        memory: &mut SessionPermissionMemory,
    ) -> Result<PermissionDecision, ApprovalError> {
        let request = ApprovalRequest {
            invocation: invocation.clone(),
            risk,
        };
        let response = self.channel.ask(&request).await?;
        debug!(action = %invocation.kind(), response = ?response, "approval answered");

        let decision = match response {
            ApprovalResponse::Approve => PermissionDecision {
                outcome: PermissionOutcome::Approved,
                invocation,
                edited: false,
            },
            ApprovalResponse::Deny => PermissionDecision {
                outcome: PermissionOutcome::Denied,
                invocation,
                edited: false,
            },
            ApprovalResponse::AlwaysApprove => {
                memory.remember(invocation.kind());
                info!(action = %invocation.kind(), "action approved for the rest of the session");
                PermissionDecision {
                    outcome: PermissionOutcome::ApprovedAlways,
                    invocation,
                    edited: false,
                }
            }
            ApprovalResponse::Edit(text) => {
                let parameters = edited_parameters(&invocation, &text)?;
                let edited = self.registry.revalidate(&invocation, parameters)?;
                PermissionDecision {
                    outcome: PermissionOutcome::Approved,
                    invocation: edited,
                    edited: true,
                }
            }
        };
        Ok(decision)
    }
}

fn is_command_kind(kind: ActionKind) -> bool {
    matches!(kind, ActionKind::ExecuteCommand | ActionKind::RunBackground)
}

/// Commands accept bare replacement text. Everything else needs a JSON object.
fn edited_parameters(invocation: &ActionInvocation, text: &str) -> Result<Value, ActionError> {
    let text = text.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }

    let kind = invocation.kind();
    if !is_command_kind(kind) {
        return Err(ActionError::invalid(
            kind.as_str(),
            "edited parameters must be a JSON object",
        ));
    }

    let mut parameters = invocation.parameters().clone();
    match parameters.as_object_mut() {
        Some(object) => {
            object.insert("command".to_string(), Value::String(text.to_string()));
        }
        None => {
            return Err(ActionError::invalid(
                kind.as_str(),
                "original parameters are not an object",
            ));
        }
    }
    Ok(parameters)
}

/// One full prompt exchange. EOF on input means the channel is gone.
pub fn read_console_answer<R, W>(
    request: &ApprovalRequest,
    input: &mut R,
    output: &mut W,
) -> Result<ApprovalResponse, ChannelUnavailable>
where
    R: BufRead,
    W: Write,
{
    let invocation = &request.invocation;
    let io_error = |error: io::Error| ChannelUnavailable::new(format!("console io: {error}"));

    writeln!(output).map_err(io_error)?;
    writeln!(
        output,
        "[?] {} ({}) wants to run:",
        invocation.kind(),
        request.risk
    )
    .map_err(io_error)?;
    writeln!(output, "    {}", invocation.summary()).map_err(io_error)?;
    if !is_command_kind(invocation.kind()) {
        writeln!(output, "    {}", invocation.parameters()).map_err(io_error)?;
    }

    loop {
        let answer = prompt_line(input, output, "[y]es / [n]o / [e]dit / [a]lways: ")?;
        match answer.to_ascii_lowercase().as_str() {
            "y" | "yes" => return Ok(ApprovalResponse::Approve),
            "n" | "no" => return Ok(ApprovalResponse::Deny),
            "a" | "always" => return Ok(ApprovalResponse::AlwaysApprove),
            "e" | "edit" => {
                let edited = prompt_line(input, output, &format!("{}: ", request.edit_hint()))?;
                if edited.is_empty() {
                    continue;
                }
                return Ok(ApprovalResponse::Edit(edited));
            }
            _ => {
                writeln!(output, "Please answer y, n, e or a.").map_err(io_error)?;
            }
        }
    }
}

fn prompt_line<R, W>(input: &mut R, output: &mut W, prompt: &str) -> Result<String, ChannelUnavailable>
where
    R: BufRead,
    W: Write,
{
    let io_error = |error: io::Error| ChannelUnavailable::new(format!("console io: {error}"));
    write!(output, "{prompt}").map_err(io_error)?;
    output.flush().map_err(io_error)?;

    let mut raw = String::new();
    let read = input.read_line(&mut raw).map_err(io_error)?;
    if read == 0 {
        return Err(ChannelUnavailable::new("stdin closed"));
    }
    Ok(raw.trim().to_string())
}
