//! End-to-end supervision tests against fake agent scripts.

use std::time::{Duration, Instant};

use relay_core::harness::{self, SupervisionConfig};
use relay_core::{ClaudeAdapter, ErrorKind, InvocationRequest, Mode, Provider, ProviderType};
use relay_test_utils::{FakeAgent, process_running, wait_until, within};
use tokio_util::sync::CancellationToken;

const LIMIT: Duration = Duration::from_secs(20);

fn request(dir: &std::path::Path, prompt: &str) -> InvocationRequest {
    InvocationRequest::new(ProviderType::Claude, prompt)
        .with_working_dir(dir)
        .with_hard_timeout(Duration::from_secs(30))
}

#[tokio::test]
async fn explain_recursion_returns_the_result_record() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::printing(
        tmp.path(),
        "claude",
        &[
            r#"{"type":"system","subtype":"init","session_id":"ses_42"}"#,
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Let me think."}]}}"#,
            r#"{"type":"result","subtype":"success","result":"Recursion is when a function calls itself.","total_cost_usd":0.002,"session_id":"ses_42","duration_ms":1234}"#,
        ],
        &[],
        0,
    );

    let adapter = ClaudeAdapter::with_binary(agent.path());
    let req = request(tmp.path(), "explain recursion");
    let result = within(LIMIT, adapter.invoke(&req, CancellationToken::new())).await.unwrap();

    assert!(result.success);
    assert_eq!(result.result, "Recursion is when a function calls itself.");
    assert_eq!(result.cost, Some(0.002));
    assert_eq!(result.session_id.as_deref(), Some("ses_42"));
    assert_eq!(result.duration_ms, 1234);
    assert_eq!(result.records, 3);
    assert_eq!(result.exit_code, Some(0));

    // The prompt travels on stdin, never on argv, and no model flag is sent.
    assert_eq!(agent.stdin().as_deref(), Some("explain recursion"));
    let args = agent.args();
    assert!(!args.iter().any(|a| a.contains("explain recursion")), "{args:?}");
    assert!(!args.iter().any(|a| a == "--model"), "{args:?}");
    assert!(args.iter().any(|a| a == "stream-json"), "{args:?}");
}

#[tokio::test]
async fn model_flag_is_passed_when_given() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::printing(
        tmp.path(),
        "claude",
        &[r#"{"type":"result","result":"ok"}"#],
        &[],
        0,
    );

    let adapter = ClaudeAdapter::with_binary(agent.path());
    let req = request(tmp.path(), "hi").with_model("sonnet");
    within(LIMIT, adapter.invoke(&req, CancellationToken::new())).await.unwrap();

    let args = agent.args();
    let pos = args.iter().position(|a| a == "--model").expect("--model flag");
    assert_eq!(args[pos + 1], "sonnet");
}

#[tokio::test]
async fn silent_agent_is_stopped_as_a_stall() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::silent(tmp.path(), "claude");

    let adapter = ClaudeAdapter::with_binary(agent.path());
    let req = request(tmp.path(), "hello").with_stall_timeout(Duration::from_millis(100));

    let start = Instant::now();
    let err = within(LIMIT, adapter.invoke(&req, CancellationToken::new())).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Stall, "{err}");
    assert!(err.to_string().contains("100ms"), "{err}");
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(agent.saw_sigterm(), "agent never received SIGTERM");
    let pid = agent.pid().expect("agent pid");
    assert!(!process_running(pid), "agent {pid} still running");
}

#[tokio::test]
async fn steady_output_resets_the_stall_window() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::script(
        tmp.path(),
        "claude",
        r#"for i in 1 2 3 4 5 6 7 8; do
  echo '{"type":"system","subtype":"heartbeat","session_id":"ses_tick"}'
  sleep 0.05
done
echo '{"type":"result","result":"done"}'"#,
    );

    let adapter = ClaudeAdapter::with_binary(agent.path());
    let req = request(tmp.path(), "tick").with_stall_timeout(Duration::from_millis(250));
    let result = within(LIMIT, adapter.invoke(&req, CancellationToken::new())).await.unwrap();

    assert_eq!(result.result, "done");
    assert_eq!(result.session_id.as_deref(), Some("ses_tick"));
}

#[tokio::test]
async fn rate_limited_exit_is_a_non_zero_exit() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::printing(tmp.path(), "claude", &[], &["rate limited"], 2);

    let adapter = ClaudeAdapter::with_binary(agent.path());
    let err = within(LIMIT, adapter.invoke(&request(tmp.path(), "hi"), CancellationToken::new()))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::NonZeroExit);
    assert_eq!(err.exit_code, Some(2));
    assert!(err.partial_stderr.contains("rate limited"));
    assert!(err.to_string().contains("rate limited"), "{err}");
}

#[tokio::test]
async fn non_zero_exit_wins_over_a_printed_result() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::printing(
        tmp.path(),
        "claude",
        &[r#"{"type":"result","result":"partial"}"#],
        &[],
        1,
    );

    let adapter = ClaudeAdapter::with_binary(agent.path());
    let err = within(LIMIT, adapter.invoke(&request(tmp.path(), "hi"), CancellationToken::new()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NonZeroExit);
    assert!(err.partial_stdout.contains("partial"));
}

#[tokio::test]
async fn clean_exit_with_garbage_is_a_parse_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::printing(tmp.path(), "claude", &["this is not json", "{{{{"], &[], 0);

    let adapter = ClaudeAdapter::with_binary(agent.path());
    let err = within(LIMIT, adapter.invoke(&request(tmp.path(), "hi"), CancellationToken::new()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ParseFailure);
    assert_eq!(err.exit_code, Some(0));
    assert!(err.partial_stdout.contains("this is not json"));
}

#[tokio::test]
async fn malformed_lines_next_to_a_result_are_tolerated() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::printing(
        tmp.path(),
        "claude",
        &[
            "warming up...",
            r#"{"type":"result","result":"fine","cost_usd":0.01}"#,
            "trailing noise",
        ],
        &["some warning"],
        0,
    );

    let adapter = ClaudeAdapter::with_binary(agent.path());
    let result = within(LIMIT, adapter.invoke(&request(tmp.path(), "hi"), CancellationToken::new()))
        .await
        .unwrap();
    assert_eq!(result.result, "fine");
    assert_eq!(result.cost, Some(0.01));
    assert!(result.duration_ms > 0, "wall-clock duration fills in a missing value");
}

#[tokio::test]
async fn hard_timeout_leaves_no_process_behind() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::silent(tmp.path(), "claude");

    let adapter = ClaudeAdapter::with_binary(agent.path());
    let req = request(tmp.path(), "hi").with_hard_timeout(Duration::from_millis(300));

    let start = Instant::now();
    let err = within(LIMIT, adapter.invoke(&req, CancellationToken::new())).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Timeout, "{err}");
    assert!(err.elapsed >= Duration::from_millis(300));
    assert!(start.elapsed() < Duration::from_secs(5));
    let pid = agent.pid().expect("agent pid");
    assert!(!process_running(pid), "agent {pid} outlived its timeout");
}

#[tokio::test]
async fn term_ignoring_agent_is_killed_after_escalation() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::stubborn(tmp.path(), "claude");

    let req = request(tmp.path(), "hi").with_hard_timeout(Duration::from_millis(200));
    let spec = ClaudeAdapter::with_binary(agent.path()).launch_spec(&req);
    let config =
        SupervisionConfig::from_request(&req).with_kill_escalation(Duration::from_millis(300));

    let start = Instant::now();
    let err = within(LIMIT, harness::run_piped(spec, config, CancellationToken::new()))
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(start.elapsed() >= Duration::from_millis(500));
    let pid = agent.pid().expect("agent pid");
    assert!(!process_running(pid), "agent {pid} survived SIGKILL");
}

#[tokio::test]
async fn cancellation_kills_the_agent() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::silent(tmp.path(), "claude");

    let adapter = ClaudeAdapter::with_binary(agent.path());
    let req = request(tmp.path(), "hi");
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let pid_agent = agent.clone();
    tokio::spawn(async move {
        wait_until(Duration::from_secs(5), || pid_agent.pid().is_some()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = within(LIMIT, adapter.invoke(&req, cancel)).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Killed, "{err}");
    assert!(agent.saw_sigterm());
    assert!(!process_running(agent.pid().unwrap()));
}

#[tokio::test]
async fn missing_binary_at_spawn_is_binary_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let adapter = ClaudeAdapter::with_binary("/nonexistent/path/to/claude");
    let err = within(LIMIT, adapter.invoke(&request(tmp.path(), "hi"), CancellationToken::new()))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BinaryNotFound);
    assert!(err.to_string().contains("npm install"), "{err}");
}

#[tokio::test]
async fn missing_working_dir_is_a_spawn_error() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::printing(
        tmp.path(),
        "claude",
        &[r#"{"type":"result","result":"x"}"#],
        &[],
        0,
    );

    let adapter = ClaudeAdapter::with_binary(agent.path());
    let req = request(&tmp.path().join("gone"), "hi");
    let err = within(LIMIT, adapter.invoke(&req, CancellationToken::new())).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Spawn);
    assert!(agent.pid().is_none(), "nothing should have been spawned");
}

#[tokio::test]
async fn chat_mode_reads_a_pretty_printed_blob() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::printing(
        tmp.path(),
        "claude",
        &[
            "{",
            r#"  "type": "result","#,
            r#"  "result": "blob answer","#,
            r#"  "session_id": "ses_blob","#,
            r#"  "total_cost_usd": 0.5"#,
            "}",
        ],
        &[],
        0,
    );

    let adapter = ClaudeAdapter::with_binary(agent.path());
    let req = request(tmp.path(), "hi").with_mode(Mode::Chat);
    let result = within(LIMIT, adapter.invoke(&req, CancellationToken::new())).await.unwrap();

    assert_eq!(result.result, "blob answer");
    assert_eq!(result.session_id.as_deref(), Some("ses_blob"));
    assert_eq!(result.cost, Some(0.5));
    assert!(agent.args().iter().any(|a| a == "json"));
}

#[tokio::test]
async fn large_prompts_do_not_deadlock_on_stdin() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::printing(
        tmp.path(),
        "claude",
        &[r#"{"type":"result","result":"read it"}"#],
        &[],
        0,
    );

    let prompt = "x".repeat(1024 * 1024);
    let adapter = ClaudeAdapter::with_binary(agent.path());
    let cancel = CancellationToken::new();
    let result = within(LIMIT, adapter.invoke(&request(tmp.path(), &prompt), cancel))
        .await
        .unwrap();
    assert_eq!(result.result, "read it");
    assert_eq!(agent.stdin().map(|s| s.len()), Some(prompt.len()));
}
