//! Shared test utilities for relay integration tests.
//!
//! [`FakeAgent`] writes an executable shell script that stands in for an
//! agent CLI. Every script records its pid, argv, environment and stdin
//! next to itself, so tests can assert on what the harness actually sent
//! and whether the process is still alive afterwards.

use std::collections::BTreeMap;
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// An executable stand-in for an agent binary.
#[derive(Debug, Clone)]
pub struct FakeAgent {
    path: PathBuf,
}

impl FakeAgent {
    /// Write `body` as a `/bin/sh` script named `name` inside `dir`.
    ///
    /// The prelude records `$$`, `"$@"` and the environment. Reading stdin
    /// is left to the body.
    pub fn script(dir: &Path, name: &str, body: &str) -> Self {
        let path = dir.join(name);
        let agent = Self { path };
        let prelude = format!(
            "#!/bin/sh\necho $$ > '{pid}'\nprintf '%s\\n' \"$@\" > '{args}'\nenv > '{env}'\n",
            pid = agent.sidecar("pid").display(),
            args = agent.sidecar("args").display(),
            env = agent.sidecar("env").display(),
        );
        std::fs::write(&agent.path, format!("{prelude}{body}\n")).expect("write fake agent");
        std::fs::set_permissions(&agent.path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod fake agent");
        agent
    }

    /// Read the prompt from stdin, print `stdout` and `stderr` verbatim,
    /// then exit with `code`.
    pub fn printing(dir: &Path, name: &str, stdout: &[&str], stderr: &[&str], code: i32) -> Self {
        let mut body = String::new();
        let stdin = dir.join(format!("{name}.stdin"));
        body.push_str(&format!("cat > '{}'\n", stdin.display()));
        if !stdout.is_empty() {
            body.push_str(&heredoc("cat", stdout));
        }
        if !stderr.is_empty() {
            body.push_str(&heredoc("cat >&2", stderr));
        }
        body.push_str(&format!("exit {code}"));
        Self::script(dir, name, &body)
    }

    /// Never prints and never exits on its own. SIGTERM is recorded in the
    /// `.term` sidecar before the script exits.
    pub fn silent(dir: &Path, name: &str) -> Self {
        let term = dir.join(format!("{name}.term"));
        let body = format!(
            "trap 'echo TERM > \"{}\"; exit 143' TERM\nwhile :; do sleep 0.05; done",
            term.display()
        );
        Self::script(dir, name, &body)
    }

    /// Ignores SIGTERM entirely; only SIGKILL stops it.
    pub fn stubborn(dir: &Path, name: &str) -> Self {
        Self::script(dir, name, "trap '' TERM\nwhile :; do sleep 0.05; done")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sidecar(&self, ext: &str) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{ext}"));
        self.path.with_file_name(name)
    }

    /// Pid recorded by the last run, if it started.
    pub fn pid(&self) -> Option<i32> {
        std::fs::read_to_string(self.sidecar("pid")).ok()?.trim().parse().ok()
    }

    /// Arguments the last run received, one per element.
    pub fn args(&self) -> Vec<String> {
        std::fs::read_to_string(self.sidecar("args"))
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Environment the last run saw.
    pub fn env(&self) -> BTreeMap<String, String> {
        std::fs::read_to_string(self.sidecar("env"))
            .map(|s| {
                s.lines()
                    .filter_map(|l| l.split_once('='))
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stdin captured by a [`printing`](Self::printing) agent.
    pub fn stdin(&self) -> Option<String> {
        std::fs::read_to_string(self.sidecar("stdin")).ok()
    }

    /// Whether a [`silent`](Self::silent) agent saw SIGTERM.
    pub fn saw_sigterm(&self) -> bool {
        self.sidecar("term").exists()
    }
}

fn heredoc(cmd: &str, lines: &[&str]) -> String {
    format!("{cmd} <<'RELAY_FAKE_EOF'\n{}\nRELAY_FAKE_EOF\n", lines.join("\n"))
}

/// `true` while `pid` names a process that has not terminated. Zombies
/// count as terminated.
pub fn process_running(pid: i32) -> bool {
    // SAFETY: signal 0 only checks for existence and permission.
    if unsafe { libc::kill(pid, 0) } != 0 {
        return false;
    }
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => !stat
            .rsplit_once(')')
            .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
        Err(_) => true,
    }
}

/// Poll `check` every 10ms until it returns `true` or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    loop {
        if check() {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Run `fut` with a generous upper bound so a wedged harness fails the test
/// instead of hanging the suite.
pub async fn within<F: Future>(limit: Duration, fut: F) -> F::Output {
    match tokio::time::timeout(limit, fut).await {
        Ok(out) => out,
        Err(_) => panic!("did not finish within {limit:?}"),
    }
}
