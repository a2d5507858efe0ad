use crate::{
    ActionExecutor, ActionRegistry, ActionResult, ActionResultTurn, AgentError, ApprovalChannel,
    ApprovalError, AssistantTurn, BackgroundJobs, ConversationState, EnvironmentContext,
    EventEmitter, EventKind, ExecutionEnvironment, InteractiveApprover, NoopEventEmitter,
    PermissionPolicy, PolicyOutcome, SessionConfig, SessionEvent, SessionPermissionMemory, Turn,
    UserTurn, build_system_prompt,
};
use mashell_llm::{Client, Request, ToolCall, ToolChoice};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

mod utils;
use utils::*;
mod types;
pub use types::{LoopState, SubmitResult};

/// One conversation with the model, from the first prompt until `close`.
///
/// The session owns everything that lives for the whole run: the
/// conversation, the "always approve" memory and the background jobs.
pub struct Session {
    id: String,
    client: Arc<Client>,
    model: String,
    registry: ActionRegistry,
    policy: PermissionPolicy,
    approver: InteractiveApprover,
    executor: ActionExecutor,
    memory: SessionPermissionMemory,
    jobs: BackgroundJobs,
    conversation: ConversationState,
    config: SessionConfig,
    state: LoopState,
    emitter: Arc<dyn EventEmitter>,
    system_prompt: String,
}

impl Session {
    pub fn new(
        client: Arc<Client>,
        model: impl Into<String>,
        execution_env: Arc<dyn ExecutionEnvironment>,
        policy: PermissionPolicy,
        approval_channel: Arc<dyn ApprovalChannel>,
        config: SessionConfig,
    ) -> Result<Self, AgentError> {
        Self::new_with_emitter(
            client,
            model,
            execution_env,
            policy,
            approval_channel,
            config,
            Arc::new(NoopEventEmitter),
        )
    }

    pub fn new_with_emitter(
        client: Arc<Client>,
        model: impl Into<String>,
        execution_env: Arc<dyn ExecutionEnvironment>,
        policy: PermissionPolicy,
        approval_channel: Arc<dyn ApprovalChannel>,
        config: SessionConfig,
        emitter: Arc<dyn EventEmitter>,
    ) -> Result<Self, AgentError> {
        let model = model.into();
        if model.trim().is_empty() {
            return Err(AgentError::InvalidConfiguration(
                "model name must not be empty".to_string(),
            ));
        }
        if config.max_steps == 0 {
            return Err(AgentError::InvalidConfiguration(
                "max_steps must be at least 1".to_string(),
            ));
        }

        let system_prompt = match &config.system_prompt_override {
            Some(prompt) => prompt.clone(),
            None => build_system_prompt(&EnvironmentContext::detect(execution_env.as_ref())),
        };
        let working_directory = execution_env
            .working_directory()
            .to_string_lossy()
            .into_owned();

        let session = Self {
            id: Uuid::new_v4().to_string(),
            client,
            model,
            registry: ActionRegistry::builtin(),
            policy,
            approver: InteractiveApprover::new(approval_channel),
            executor: ActionExecutor::new(execution_env, config.clone()),
            memory: SessionPermissionMemory::new(),
            jobs: BackgroundJobs::new(),
            conversation: ConversationState::new(),
            config,
            state: LoopState::Idle,
            emitter,
            system_prompt,
        };

        info!(session_id = %session.id, model = %session.model, "session started");
        session.emit(
            session
                .event(EventKind::SessionStart)
                .with("model", session.model.clone())
                .with("working_directory", working_directory)
                .with("approve_all", session.policy.approve_all()),
        )?;
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    pub fn permission_memory(&self) -> &SessionPermissionMemory {
        &self.memory
    }

    pub fn background_jobs(&self) -> &BackgroundJobs {
        &self.jobs
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn transition_to(&mut self, next_state: LoopState) -> Result<(), AgentError> {
        if !self.state.can_transition_to(&next_state) {
            return Err(AgentError::InvalidStateTransition {
                from: self.state.to_string(),
                to: next_state.to_string(),
            });
        }
        if self.state == next_state {
            return Ok(());
        }

        let previous = self.state;
        self.state = next_state;
        self.emit(
            self.event(EventKind::StateChanged)
                .with("from", previous.as_str())
                .with("to", next_state.as_str()),
        )
    }

    /// Runs one user prompt until the model gives a final answer.
    ///
    /// Fatal conditions leave the session in `Aborted` and come back as the
    /// error; the session accepts a new prompt afterwards.
    pub async fn submit(
        &mut self,
        user_input: impl Into<String>,
    ) -> Result<SubmitResult, AgentError> {
        let user_input = user_input.into();
        self.transition_to(LoopState::AwaitingModel)?;

        let baseline = self.conversation.len();
        self.conversation.push(Turn::User(UserTurn::new(
            user_input.clone(),
            current_timestamp(),
        )));
        self.emit(self.event(EventKind::UserInput).with("content", user_input))?;

        let mut steps = 0usize;
        loop {
            debug!(
                session_id = %self.id,
                steps,
                turns = self.conversation.len(),
                "requesting model response"
            );
            let request = self.build_request();
            let client = self.client.clone();
            let response = match client.complete(request).await {
                Ok(response) => response,
                Err(error) => {
                    if let Err(emit_error) =
                        self.emit(self.event(EventKind::Error).with("message", error.to_string()))
                    {
                        warn!(error = %emit_error, "failed to deliver error event");
                    }
                    return Err(self.abort(error.into()));
                }
            };

            let text = response.text();
            let tool_calls = response.tool_calls();
            self.conversation.push(Turn::Assistant(AssistantTurn::new(
                text.clone(),
                tool_calls.clone(),
                response.usage.clone(),
                Some(response.id.clone()),
                current_timestamp(),
            )));
            if !text.trim().is_empty() {
                self.emit(
                    self.event(EventKind::AssistantText)
                        .with("content", text)
                        .with("final", tool_calls.is_empty()),
                )?;
            }

            if tool_calls.is_empty() {
                self.transition_to(LoopState::Done)?;
                break;
            }

            self.transition_to(LoopState::DispatchingAction)?;
            for tool_call in &tool_calls {
                if steps >= self.config.max_steps {
                    let error = AgentError::StepLimitExceeded {
                        max_steps: self.config.max_steps,
                    };
                    if let Err(emit_error) = self.emit(
                        self.event(EventKind::StepLimit)
                            .with("max_steps", self.config.max_steps),
                    ) {
                        warn!(error = %emit_error, "failed to deliver step limit event");
                    }
                    return Err(self.abort(error));
                }
                steps += 1;

                if let Err(error) = self.dispatch(tool_call).await {
                    return Err(self.abort(error));
                }
            }
            self.transition_to(LoopState::AwaitingModel)?;
        }

        let result = summarize_run(&self.conversation, baseline, steps, self.state);
        info!(
            session_id = %self.id,
            steps = result.steps,
            executed = result.executed_count,
            denied = result.denied_count,
            rejected = result.rejected_count,
            "prompt finished"
        );
        Ok(result)
    }

    /// Routes one proposed call through validation, permission and execution,
    /// appending exactly one result for it. Only fatal conditions are errors.
    async fn dispatch(&mut self, tool_call: &ToolCall) -> Result<(), AgentError> {
        self.emit(
            self.event(EventKind::ActionProposed)
                .with("call_id", tool_call.id.clone())
                .with("action", tool_call.name.clone()),
        )?;

        let invocation = match self.registry.validate(tool_call) {
            Ok(invocation) => invocation,
            Err(error) => {
                warn!(action = %tool_call.name, error = %error, "rejected invalid action");
                self.append_result(tool_call, ActionResult::rejected(error.to_string()));
                return self.emit(
                    self.event(EventKind::ActionRejected)
                        .with("call_id", tool_call.id.clone())
                        .with("action", tool_call.name.clone())
                        .with("reason", error.to_string()),
                );
            }
        };

        self.transition_to(LoopState::AwaitingPermission)?;
        let risk = self.policy.risk(&invocation);
        let approved = match self.policy.evaluate(&invocation, &self.memory) {
            PolicyOutcome::AutoApprove => {
                self.emit(
                    self.event(EventKind::ActionApproved)
                        .with("summary", invocation.summary())
                        .with("automatic", true),
                )?;
                invocation
            }
            PolicyOutcome::AutoDeny => {
                self.append_result(tool_call, ActionResult::denied());
                self.emit(
                    self.event(EventKind::ActionDenied)
                        .with("summary", invocation.summary()),
                )?;
                return self.transition_to(LoopState::DispatchingAction);
            }
            PolicyOutcome::AskHuman => {
                self.emit(
                    self.event(EventKind::ApprovalRequested)
                        .with("summary", invocation.summary())
                        .with("risk", risk.as_str()),
                )?;
                match self
                    .approver
                    .request(invocation.clone(), risk, &mut self.memory)
                    .await
                {
                    Ok(decision) if decision.is_denied() => {
                        info!(action = %invocation.kind(), "action denied by user");
                        self.append_result(tool_call, ActionResult::denied());
                        self.emit(
                            self.event(EventKind::ActionDenied)
                                .with("summary", invocation.summary()),
                        )?;
                        return self.transition_to(LoopState::DispatchingAction);
                    }
                    Ok(decision) => {
                        self.emit(
                            self.event(EventKind::ActionApproved)
                                .with("summary", decision.invocation.summary())
                                .with("automatic", false)
                                .with("edited", decision.edited),
                        )?;
                        decision.invocation
                    }
                    Err(ApprovalError::InvalidEdit(error)) => {
                        warn!(action = %invocation.kind(), error = %error, "edited invocation is invalid");
                        self.append_result(tool_call, ActionResult::rejected(error.to_string()));
                        self.emit(
                            self.event(EventKind::ActionRejected)
                                .with("call_id", tool_call.id.clone())
                                .with("action", tool_call.name.clone())
                                .with("reason", error.to_string()),
                        )?;
                        return self.transition_to(LoopState::DispatchingAction);
                    }
                    Err(ApprovalError::Unavailable(reason)) => {
                        return Err(AgentError::PermissionUnavailable(reason.to_string()));
                    }
                }
            }
        };

        self.transition_to(LoopState::AwaitingExecution)?;
        self.emit(
            self.event(EventKind::ActionStarted)
                .with("call_id", tool_call.id.clone())
                .with("summary", approved.summary()),
        )?;
        let result = self.executor.run(&approved, &mut self.jobs).await;
        let finished = self
            .event(EventKind::ActionFinished)
            .with("call_id", tool_call.id.clone())
            .with("action", approved.kind().as_str())
            .with("status", result.status.as_str())
            .with("success", result.success)
            .with("truncated", result.truncated)
            .with("output", result.output.clone());
        self.append_result(tool_call, result);
        self.emit(finished)?;
        self.transition_to(LoopState::DispatchingAction)
    }

    fn append_result(&mut self, tool_call: &ToolCall, result: ActionResult) {
        self.conversation.push(Turn::ActionResult(ActionResultTurn::new(
            tool_call.id.clone(),
            tool_call.name.clone(),
            result,
            current_timestamp(),
        )));
    }

    /// Moves to `Aborted`, closing every unanswered call of the current turn
    /// with a synthetic result so the conversation stays well-formed.
    fn abort(&mut self, error: AgentError) -> AgentError {
        let unanswered = self.conversation.unanswered_calls();
        let pending_calls: Vec<ToolCall> = self
            .conversation
            .turns()
            .iter()
            .rev()
            .find_map(|turn| match turn {
                Turn::Assistant(turn) => Some(turn.tool_calls.clone()),
                _ => None,
            })
            .unwrap_or_default()
            .into_iter()
            .filter(|call| unanswered.contains(&call.id))
            .collect();
        for tool_call in &pending_calls {
            self.append_result(tool_call, ActionResult::aborted());
        }

        warn!(
            session_id = %self.id,
            error = %error,
            skipped_calls = pending_calls.len(),
            "task aborted"
        );
        if let Err(transition_error) = self.transition_to(LoopState::Aborted) {
            return transition_error;
        }
        if let Err(emit_error) = self.emit(
            self.event(EventKind::Aborted)
                .with("reason", error.to_string())
                .with("skipped_calls", pending_calls.len()),
        ) {
            warn!(error = %emit_error, "failed to deliver abort event");
        }
        error
    }

    fn build_request(&self) -> Request {
        Request {
            model: self.model.clone(),
            messages: convert_history_to_messages(&self.system_prompt, &self.conversation),
            tools: Some(self.registry.definitions()),
            tool_choice: Some(ToolChoice::auto()),
            ..Request::default()
        }
    }

    /// Cancels running background jobs and ends the session.
    pub async fn close(mut self) -> Result<(), AgentError> {
        let running = self.jobs.running_ids();
        if !running.is_empty() {
            info!(session_id = %self.id, jobs = ?running, "cancelling background jobs");
        }
        self.jobs
            .close_all(Duration::from_millis(self.config.background_cancel_grace_ms))
            .await;
        self.emit(
            self.event(EventKind::SessionEnd)
                .with("final_state", self.state.as_str())
                .with("cancelled_jobs", running.len()),
        )
    }

    fn event(&self, kind: EventKind) -> SessionEvent {
        SessionEvent::new(kind, self.id.clone())
    }

    fn emit(&self, event: SessionEvent) -> Result<(), AgentError> {
        self.emitter.emit(event)
    }
}

#[cfg(test)]
mod tests;
