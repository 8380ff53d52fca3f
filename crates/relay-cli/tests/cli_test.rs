//! End-to-end tests for the `relay` binary against fake agent scripts.
//!
//! Every test points `XDG_CONFIG_HOME` at a scratch directory so the
//! user's real config file is never read or written.

use std::path::Path;
use std::process::{Command, Output, Stdio};

use relay_test_utils::FakeAgent;

fn relay(config_home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_relay"));
    cmd.env("XDG_CONFIG_HOME", config_home)
        .env_remove("RELAY_PROVIDER")
        .env_remove("RELAY_TIMEOUT_SECS")
        .env_remove("RELAY_STALL_TIMEOUT_SECS")
        .env("RUST_LOG", "warn")
        .stdin(Stdio::null());
    cmd
}

/// Write a config that routes `provider` to `binary`.
fn write_config(config_home: &Path, provider: &str, binary: &Path) {
    let dir = config_home.join("relay");
    std::fs::create_dir_all(&dir).unwrap();
    let contents = format!(
        "[defaults]\nprovider = \"{provider}\"\n\n[binaries]\n{provider} = \"{}\"\n",
        binary.display()
    );
    std::fs::write(dir.join("config.toml"), contents).unwrap();
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn invoke_prints_the_answer() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::printing(
        tmp.path(),
        "claude",
        &[
            r#"{"type":"system","subtype":"init","session_id":"ses_cli"}"#,
            r#"{"type":"result","subtype":"success","is_error":false,"result":"Four.","session_id":"ses_cli","total_cost_usd":0.001,"duration_ms":12}"#,
        ],
        &[],
        0,
    );
    write_config(tmp.path(), "claude", agent.path());

    let output = relay(tmp.path())
        .args(["invoke", "--cwd"])
        .arg(tmp.path())
        .arg("what is 2 + 2?")
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "Four.\n");
    assert_eq!(agent.stdin().as_deref(), Some("what is 2 + 2?"));
}

#[test]
fn invoke_reads_the_prompt_from_stdin_and_prints_json() {
    use std::io::Write;

    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::printing(
        tmp.path(),
        "codex",
        &[
            r#"{"type":"thread.started","thread_id":"th_cli"}"#,
            r#"{"type":"item.completed","item":{"id":"i0","type":"agent_message","text":"Done."}}"#,
            r#"{"type":"turn.completed","usage":{"input_tokens":10,"output_tokens":2}}"#,
        ],
        &[],
        0,
    );
    write_config(tmp.path(), "codex", agent.path());

    let mut child = relay(tmp.path())
        .args(["invoke", "--json", "--cwd"])
        .arg(tmp.path())
        .arg("-")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child.stdin.take().unwrap().write_all(b"tidy up the README").unwrap();
    let output = child.wait_with_output().unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["result"], "Done.");
    assert_eq!(json["session_id"], "th_cli");
    assert_eq!(json["usage"]["output_tokens"], 2);
    assert_eq!(agent.stdin().as_deref(), Some("tidy up the README"));
}

#[test]
fn non_zero_exit_maps_to_exit_code_one() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::printing(tmp.path(), "gemini", &[], &["Error: rate limited"], 2);
    write_config(tmp.path(), "gemini", agent.path());

    let output = relay(tmp.path()).args(["invoke", "hi"]).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("rate limited"), "stderr: {}", stderr(&output));
}

#[test]
fn stall_maps_to_exit_code_125() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::silent(tmp.path(), "claude");
    write_config(tmp.path(), "claude", agent.path());

    let output = relay(tmp.path())
        .args(["invoke", "--stall-timeout", "1", "hi"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(125), "stderr: {}", stderr(&output));
    assert!(agent.saw_sigterm());
    assert!(!relay_test_utils::process_running(agent.pid().unwrap()));
}

#[test]
fn missing_binary_maps_to_exit_code_127() {
    let tmp = tempfile::tempdir().unwrap();
    write_config(tmp.path(), "gemini", &tmp.path().join("not-installed/gemini"));

    let output = relay(tmp.path())
        .args(["invoke", "--provider", "gemini", "hi"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(127));
    assert!(stderr(&output).contains("@google/gemini-cli"), "stderr: {}", stderr(&output));
}

#[test]
fn empty_prompt_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let output = relay(tmp.path()).args(["invoke", "--provider", "claude"]).output().unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("prompt is empty"), "stderr: {}", stderr(&output));
}

#[test]
fn providers_lists_configured_binaries() {
    let tmp = tempfile::tempdir().unwrap();
    let agent = FakeAgent::silent(tmp.path(), "codex");
    write_config(tmp.path(), "codex", agent.path());

    let output = relay(tmp.path()).arg("providers").output().unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let table = stdout(&output);
    let codex = table.lines().find(|l| l.starts_with("codex")).unwrap();
    assert!(codex.contains("available"), "{table}");
    assert!(codex.contains(&agent.path().display().to_string()), "{table}");
    assert!(table.lines().any(|l| l.starts_with("claude")), "{table}");
    assert!(table.lines().any(|l| l.starts_with("gemini")), "{table}");
}

#[cfg(unix)]
#[test]
fn init_writes_a_private_config_once() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("relay/config.toml");

    let first = relay(tmp.path()).arg("init").output().unwrap();
    assert!(first.status.success(), "stderr: {}", stderr(&first));
    let meta = std::fs::metadata(&path).unwrap();
    assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    assert!(std::fs::read_to_string(&path).unwrap().contains("[defaults]"));

    let second = relay(tmp.path()).arg("init").output().unwrap();
    assert!(!second.status.success());
    assert!(stderr(&second).contains("--force"));

    let forced = relay(tmp.path()).args(["init", "--force"]).output().unwrap();
    assert!(forced.status.success(), "stderr: {}", stderr(&forced));
}
