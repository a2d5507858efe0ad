use super::*;
use crate::{
    ActionStatus, ApprovalResponse, BufferedEventEmitter, LocalExecutionEnvironment,
    PermissionConfig, QueueApprovalChannel, UnavailableApprovalChannel,
};
use async_trait::async_trait;
use mashell_llm::{
    ConfigurationError, FinishReason, Message, ProviderAdapter, Response, Role, SDKError, Usage,
};
use serde_json::json;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use tempfile::tempdir;

#[derive(Clone)]
struct SequenceAdapter {
    responses: Arc<Mutex<VecDeque<Result<Response, SDKError>>>>,
    requests: Arc<Mutex<Vec<Request>>>,
}

#[async_trait]
impl ProviderAdapter for SequenceAdapter {
    fn name(&self) -> &str {
        "test"
    }

    async fn complete(&self, request: Request) -> Result<Response, SDKError> {
        self.requests.lock().expect("requests mutex").push(request);
        self.responses
            .lock()
            .expect("responses mutex")
            .pop_front()
            .unwrap_or_else(|| {
                Err(SDKError::Configuration(ConfigurationError::new(
                    "no response queued",
                )))
            })
    }
}

type RecordedRequests = Arc<Mutex<Vec<Request>>>;

fn scripted_client(responses: Vec<Result<Response, SDKError>>) -> (Arc<Client>, RecordedRequests) {
    let adapter = Arc::new(SequenceAdapter {
        responses: Arc::new(Mutex::new(VecDeque::from(responses))),
        requests: Arc::new(Mutex::new(Vec::new())),
    });
    let requests = adapter.requests.clone();
    let mut client = Client::default();
    client.register_provider(adapter);
    (Arc::new(client), requests)
}

fn text_response(text: &str) -> Result<Response, SDKError> {
    Ok(Response {
        id: "resp-text".to_string(),
        model: "test-model".to_string(),
        provider: "test".to_string(),
        message: Message::assistant(text),
        finish_reason: FinishReason::stop(),
        usage: Usage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        },
    })
}

fn calls_response(calls: Vec<ToolCall>) -> Result<Response, SDKError> {
    Ok(Response {
        id: "resp-calls".to_string(),
        model: "test-model".to_string(),
        provider: "test".to_string(),
        message: Message::assistant_with_tool_calls("", calls),
        finish_reason: FinishReason::tool_calls(),
        usage: Usage::default(),
    })
}

fn command_call(id: &str, command: &str) -> ToolCall {
    ToolCall::new(id, "execute_command", json!({ "command": command }))
}

fn test_config() -> SessionConfig {
    SessionConfig {
        system_prompt_override: Some("You are a test agent.".to_string()),
        ..SessionConfig::default()
    }
}

fn session_in(
    dir: &Path,
    client: Arc<Client>,
    policy: PermissionPolicy,
    channel: Arc<dyn ApprovalChannel>,
) -> Session {
    Session::new(
        client,
        "test-model",
        Arc::new(LocalExecutionEnvironment::new(dir)),
        policy,
        channel,
        test_config(),
    )
    .expect("session should build")
}

fn results(session: &Session) -> Vec<ActionResultTurn> {
    session.conversation().action_results().cloned().collect()
}

#[tokio::test(flavor = "current_thread")]
async fn read_only_command_is_auto_approved_and_executed() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("notes.txt"), "hello").expect("write fixture");
    let (client, requests) = scripted_client(vec![
        calls_response(vec![command_call(
            "call-1",
            &format!("ls {}", dir.path().display()),
        )]),
        text_response("There is one file: notes.txt"),
    ]);
    let channel = Arc::new(QueueApprovalChannel::new());
    let mut session = session_in(
        dir.path(),
        client,
        PermissionPolicy::default(),
        channel.clone(),
    );

    let result = session.submit("what is in here?").await.expect("submit");

    assert_eq!(result.final_state, LoopState::Done);
    assert_eq!(result.assistant_text, "There is one file: notes.txt");
    assert_eq!(result.steps, 1);
    assert_eq!(result.executed_count, 1);
    assert!(channel.asked().is_empty());

    let results = results(&session);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].tool_call_id, "call-1");
    assert_eq!(results[0].result.status, ActionStatus::Completed);
    assert!(results[0].result.output.contains("notes.txt"));
    assert_eq!(requests.lock().expect("requests").len(), 2);
}

#[tokio::test(flavor = "current_thread")]
async fn denied_destructive_command_never_runs() {
    let dir = tempdir().expect("tempdir");
    std::fs::create_dir(dir.path().join("build")).expect("create build dir");
    let (client, requests) = scripted_client(vec![
        calls_response(vec![command_call("call-1", "rm -rf ./build")]),
        text_response("Understood, leaving the build directory alone."),
    ]);
    let channel = Arc::new(QueueApprovalChannel::with_responses([ApprovalResponse::Deny]));
    let mut session = session_in(
        dir.path(),
        client,
        PermissionPolicy::default(),
        channel.clone(),
    );

    let result = session.submit("clean the build").await.expect("submit");

    assert_eq!(result.final_state, LoopState::Done);
    assert_eq!(result.denied_count, 1);
    assert_eq!(result.executed_count, 0);
    assert!(dir.path().join("build").is_dir());
    assert_eq!(channel.asked().len(), 1);

    let results = results(&session);
    assert_eq!(results[0].result.status, ActionStatus::Denied);
    assert_eq!(results[0].result.output, "denied by user");

    let requests = requests.lock().expect("requests");
    let tool_message = requests[1]
        .messages
        .iter()
        .find(|message| message.role == Role::Tool)
        .expect("tool result message");
    assert_eq!(tool_message.tool_call_id.as_deref(), Some("call-1"));
    assert!(tool_message.content.contains("denied by user"));
}

#[tokio::test(flavor = "current_thread")]
async fn launcher_wrapped_removal_still_asks() {
    let dir = tempdir().expect("tempdir");
    std::fs::create_dir(dir.path().join("build")).expect("create build dir");
    let (client, _requests) = scripted_client(vec![
        calls_response(vec![command_call("call-1", "env rm -rf ./build")]),
        text_response("Left it alone."),
    ]);
    let channel = Arc::new(QueueApprovalChannel::with_responses([ApprovalResponse::Deny]));
    let mut session = session_in(
        dir.path(),
        client,
        PermissionPolicy::default(),
        channel.clone(),
    );

    let result = session.submit("clean the build").await.expect("submit");

    assert_eq!(result.denied_count, 1);
    assert_eq!(channel.asked().len(), 1);
    assert!(dir.path().join("build").is_dir());
}

#[tokio::test(flavor = "current_thread")]
async fn launcher_wrapped_removal_aborts_without_a_channel() {
    let dir = tempdir().expect("tempdir");
    std::fs::create_dir(dir.path().join("build")).expect("create build dir");
    let (client, _requests) = scripted_client(vec![calls_response(vec![command_call(
        "call-1",
        "env rm -rf ./build",
    )])]);
    let mut session = session_in(
        dir.path(),
        client,
        PermissionPolicy::default(),
        Arc::new(UnavailableApprovalChannel),
    );

    let error = session
        .submit("clean the build")
        .await
        .expect_err("destructive command needs a human");

    assert!(matches!(error, AgentError::PermissionUnavailable(_)));
    assert!(dir.path().join("build").is_dir());
}

#[tokio::test(flavor = "current_thread")]
async fn always_approve_skips_later_prompts_for_the_same_kind() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), "alpha").expect("write a");
    std::fs::write(dir.path().join("b.txt"), "beta").expect("write b");
    let (client, _requests) = scripted_client(vec![
        calls_response(vec![ToolCall::new(
            "call-1",
            "read_file",
            json!({ "path": "a.txt" }),
        )]),
        calls_response(vec![ToolCall::new(
            "call-2",
            "read_file",
            json!({ "path": "b.txt" }),
        )]),
        text_response("done"),
    ]);
    let config = PermissionConfig {
        always_ask: vec!["read_file".to_string()],
        ..PermissionConfig::default()
    };
    let (policy, report) = PermissionPolicy::from_config(&config, false);
    assert!(report.is_clean());
    let channel = Arc::new(QueueApprovalChannel::with_responses([
        ApprovalResponse::AlwaysApprove,
    ]));
    let mut session = session_in(dir.path(), client, policy, channel.clone());

    let result = session.submit("read both files").await.expect("submit");

    assert_eq!(result.executed_count, 2);
    assert_eq!(channel.asked().len(), 1);
    assert!(
        session
            .permission_memory()
            .contains(crate::ActionKind::ReadFile)
    );
    let results = results(&session);
    assert!(results[0].result.output.contains("alpha"));
    assert!(results[1].result.output.contains("beta"));
}

#[tokio::test(flavor = "current_thread")]
async fn approve_all_overrides_always_ask() {
    let dir = tempdir().expect("tempdir");
    let (client, _requests) = scripted_client(vec![
        calls_response(vec![ToolCall::new(
            "call-1",
            "write_file",
            json!({ "path": "out.txt", "content": "written" }),
        )]),
        text_response("wrote it"),
    ]);
    let config = PermissionConfig {
        always_ask: vec!["write_file".to_string()],
        ..PermissionConfig::default()
    };
    let (policy, _) = PermissionPolicy::from_config(&config, true);
    let channel = Arc::new(QueueApprovalChannel::new());
    let mut session = session_in(dir.path(), client, policy, channel.clone());

    session.submit("write a file").await.expect("submit");

    assert!(channel.asked().is_empty());
    let written = std::fs::read_to_string(dir.path().join("out.txt")).expect("read output");
    assert_eq!(written, "written");
}

#[tokio::test(flavor = "current_thread")]
async fn repeated_failing_commands_stop_at_the_step_limit() {
    let dir = tempdir().expect("tempdir");
    let responses = (0..50)
        .map(|index| calls_response(vec![command_call(&format!("call-{index}"), "exit 1")]))
        .collect();
    let (client, requests) = scripted_client(responses);
    let (policy, _) = PermissionPolicy::from_config(&PermissionConfig::default(), true);
    let mut session = session_in(
        dir.path(),
        client,
        policy,
        Arc::new(UnavailableApprovalChannel),
    );

    let error = session
        .submit("keep trying")
        .await
        .expect_err("step limit should abort");

    assert!(matches!(error, AgentError::StepLimitExceeded { max_steps: 20 }));
    assert!(error.is_abort());
    assert_eq!(
        error.to_string(),
        "task aborted: exceeded maximum steps (20)"
    );
    assert_eq!(session.state(), LoopState::Aborted);
    assert_eq!(requests.lock().expect("requests").len(), 21);

    let results = results(&session);
    assert_eq!(results.len(), 21);
    assert!(
        results[..20]
            .iter()
            .all(|turn| turn.result.status == ActionStatus::Failed)
    );
    assert_eq!(results[20].result.output, "not executed: task aborted");
    assert!(session.conversation().unanswered_calls().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn edited_command_runs_without_another_policy_check() {
    let dir = tempdir().expect("tempdir");
    std::fs::create_dir(dir.path().join("build")).expect("create build dir");
    let (client, _requests) = scripted_client(vec![
        calls_response(vec![command_call("call-1", "rm -rf build")]),
        text_response("ok"),
    ]);
    let channel = Arc::new(QueueApprovalChannel::with_responses([ApprovalResponse::Edit(
        "echo edited".to_string(),
    )]));
    let mut session = session_in(
        dir.path(),
        client,
        PermissionPolicy::default(),
        channel.clone(),
    );

    session.submit("clean up").await.expect("submit");

    assert_eq!(channel.asked().len(), 1);
    assert!(dir.path().join("build").is_dir());
    let results = results(&session);
    assert_eq!(results[0].tool_call_id, "call-1");
    assert_eq!(results[0].result.status, ActionStatus::Completed);
    assert!(results[0].result.output.contains("edited"));
}

#[tokio::test(flavor = "current_thread")]
async fn invalid_edit_is_reported_to_the_model() {
    let dir = tempdir().expect("tempdir");
    let (client, _requests) = scripted_client(vec![
        calls_response(vec![ToolCall::new(
            "call-1",
            "delete_file",
            json!({ "path": "missing.txt" }),
        )]),
        text_response("ok"),
    ]);
    let channel = Arc::new(QueueApprovalChannel::with_responses([ApprovalResponse::Edit(
        "not json".to_string(),
    )]));
    let mut session = session_in(
        dir.path(),
        client,
        PermissionPolicy::default(),
        channel,
    );

    let result = session.submit("delete it").await.expect("submit");

    assert_eq!(result.rejected_count, 1);
    let results = results(&session);
    assert_eq!(results[0].result.status, ActionStatus::Rejected);
    assert!(results[0].result.output.contains("JSON object"));
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_and_malformed_actions_become_error_results() {
    let dir = tempdir().expect("tempdir");
    let (client, requests) = scripted_client(vec![
        calls_response(vec![
            ToolCall::new("call-1", "launch_rocket", json!({})),
            ToolCall::new("call-2", "execute_command", json!({})),
        ]),
        text_response("I made a mistake."),
    ]);
    let mut session = session_in(
        dir.path(),
        client,
        PermissionPolicy::default(),
        Arc::new(UnavailableApprovalChannel),
    );

    let result = session.submit("do something").await.expect("submit");

    assert_eq!(result.final_state, LoopState::Done);
    assert_eq!(result.rejected_count, 2);
    let results = results(&session);
    assert!(results[0].result.output.contains("unknown action: launch_rocket"));
    assert!(results[1].result.output.contains("command"));
    assert!(results.iter().all(|turn| !turn.result.success));

    let requests = requests.lock().expect("requests");
    let tool_messages = requests[1]
        .messages
        .iter()
        .filter(|message| message.role == Role::Tool)
        .count();
    assert_eq!(tool_messages, 2);
}

#[tokio::test(flavor = "current_thread")]
async fn unavailable_channel_aborts_and_closes_pending_calls() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(dir.path().join("keep.txt"), "keep").expect("write fixture");
    let (client, requests) = scripted_client(vec![
        calls_response(vec![
            command_call("call-1", "rm keep.txt"),
            command_call("call-2", "ls"),
        ]),
        text_response("Hello again."),
    ]);
    let mut session = session_in(
        dir.path(),
        client,
        PermissionPolicy::default(),
        Arc::new(UnavailableApprovalChannel),
    );

    let error = session
        .submit("remove it")
        .await
        .expect_err("missing channel should abort");

    assert!(matches!(error, AgentError::PermissionUnavailable(_)));
    assert_eq!(session.state(), LoopState::Aborted);
    assert!(dir.path().join("keep.txt").exists());
    let results = results(&session);
    assert_eq!(results.len(), 2);
    assert!(
        results
            .iter()
            .all(|turn| turn.result.output == "not executed: task aborted")
    );

    let result = session.submit("hi").await.expect("follow-up prompt");
    assert_eq!(result.final_state, LoopState::Done);
    let requests = requests.lock().expect("requests");
    let tool_messages = requests[1]
        .messages
        .iter()
        .filter(|message| message.role == Role::Tool)
        .count();
    assert_eq!(tool_messages, 2);
}

#[tokio::test(flavor = "current_thread")]
async fn provider_failure_aborts_the_run() {
    let dir = tempdir().expect("tempdir");
    let (client, _requests) = scripted_client(vec![Err(SDKError::Http {
        status: 500,
        body: "upstream down".to_string(),
    })]);
    let mut session = session_in(
        dir.path(),
        client,
        PermissionPolicy::default(),
        Arc::new(UnavailableApprovalChannel),
    );

    let error = session.submit("hello").await.expect_err("should abort");

    assert!(matches!(error, AgentError::Llm(SDKError::Http { status: 500, .. })));
    assert_eq!(session.state(), LoopState::Aborted);
}

#[tokio::test(flavor = "current_thread")]
async fn action_results_round_trip_through_the_next_request() {
    let dir = tempdir().expect("tempdir");
    let (client, requests) = scripted_client(vec![
        calls_response(vec![command_call("call-1", "echo round trip; exit 3")]),
        text_response("done"),
    ]);
    let (policy, _) = PermissionPolicy::from_config(&PermissionConfig::default(), true);
    let mut session = session_in(
        dir.path(),
        client,
        policy,
        Arc::new(UnavailableApprovalChannel),
    );

    session.submit("run it").await.expect("submit");

    let stored = results(&session).remove(0).result;
    assert_eq!(stored.status, ActionStatus::Failed);
    assert_eq!(stored.exit_code, Some(3));

    let requests = requests.lock().expect("requests");
    let tool_message = requests[1]
        .messages
        .iter()
        .find(|message| message.role == Role::Tool)
        .expect("tool result message");
    let sent = ActionResult::from_tool_content(&serde_json::Value::String(
        tool_message.content.clone(),
    ))
    .expect("tool content should parse");
    assert_eq!(sent, stored);
}

#[tokio::test(flavor = "current_thread")]
async fn requests_carry_system_prompt_and_action_definitions() {
    let dir = tempdir().expect("tempdir");
    let (client, requests) = scripted_client(vec![text_response("hi")]);
    let mut session = session_in(
        dir.path(),
        client,
        PermissionPolicy::default(),
        Arc::new(UnavailableApprovalChannel),
    );

    session.submit("hello").await.expect("submit");

    let requests = requests.lock().expect("requests");
    let request = &requests[0];
    assert_eq!(request.model, "test-model");
    assert_eq!(request.messages[0].role, Role::System);
    assert_eq!(request.messages[0].content, "You are a test agent.");
    assert_eq!(request.messages[1].content, "hello");
    let tools = request.tools.as_ref().expect("tools");
    assert_eq!(tools.len(), 8);
    assert_eq!(request.tool_choice, Some(ToolChoice::auto()));
}

#[tokio::test(flavor = "current_thread")]
async fn events_follow_the_action_lifecycle() {
    let dir = tempdir().expect("tempdir");
    let (client, _requests) = scripted_client(vec![
        calls_response(vec![command_call("call-1", "pwd")]),
        text_response("finished"),
    ]);
    let emitter = BufferedEventEmitter::default();
    let mut session = Session::new_with_emitter(
        client,
        "test-model",
        Arc::new(LocalExecutionEnvironment::new(dir.path())),
        PermissionPolicy::default(),
        Arc::new(UnavailableApprovalChannel),
        test_config(),
        Arc::new(emitter.clone()),
    )
    .expect("session");

    session.submit("where am I").await.expect("submit");
    session.close().await.expect("close");

    let kinds: Vec<EventKind> = emitter
        .kinds()
        .into_iter()
        .filter(|kind| *kind != EventKind::StateChanged)
        .collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::SessionStart,
            EventKind::UserInput,
            EventKind::ActionProposed,
            EventKind::ActionApproved,
            EventKind::ActionStarted,
            EventKind::ActionFinished,
            EventKind::AssistantText,
            EventKind::SessionEnd,
        ]
    );
    let end = emitter.snapshot().pop().expect("session end");
    assert_eq!(end.str_field("final_state"), Some("DONE"));
}

#[cfg(unix)]
#[tokio::test(flavor = "current_thread")]
async fn close_cancels_running_background_jobs() {
    let dir = tempdir().expect("tempdir");
    let (client, _requests) = scripted_client(vec![
        calls_response(vec![ToolCall::new(
            "call-1",
            "run_background",
            json!({ "command": "sleep 30" }),
        )]),
        text_response("started"),
    ]);
    let (policy, _) = PermissionPolicy::from_config(&PermissionConfig::default(), true);
    let mut session = session_in(
        dir.path(),
        client,
        policy,
        Arc::new(UnavailableApprovalChannel),
    );

    session.submit("start a server").await.expect("submit");
    let results = results(&session);
    assert_eq!(results[0].result.status, ActionStatus::Running);
    assert_eq!(session.background_jobs().running_ids().len(), 1);

    tokio::time::timeout(Duration::from_secs(10), session.close())
        .await
        .expect("close should not hang")
        .expect("close");
}

#[test]
fn zero_step_limit_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let (client, _requests) = scripted_client(Vec::new());
    let config = SessionConfig {
        max_steps: 0,
        ..test_config()
    };
    let result = Session::new(
        client,
        "test-model",
        Arc::new(LocalExecutionEnvironment::new(dir.path())),
        PermissionPolicy::default(),
        Arc::new(UnavailableApprovalChannel),
        config,
    );
    assert!(matches!(result, Err(AgentError::InvalidConfiguration(_))));
}
