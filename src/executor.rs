//! Bounded-retry remote execution of a job script.
//!
//! Freshly created instances reject SSH until the provider's login agent
//! has propagated the injected key, so the executor probes the connection
//! with a trivial command before doing real work. Probe failures are
//! modelled as values and retried on a fixed schedule; failures after a
//! successful probe are genuine script or environment errors and propagate
//! immediately.

use std::time::Duration;

use camino::Utf8Path;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::ssh::{CommandRunner, SshClient, SshError};

/// Outcome of one connectivity probe attempt.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Probe {
    /// The trivial remote command ran.
    Reachable,
    /// The transport or handshake failed; carries the captured stderr.
    TransportFailed {
        /// Stderr captured from the failed attempt.
        stderr: String,
    },
}

/// Errors surfaced while executing a script remotely.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ExecError {
    /// Raised when no script path is given; trivial remote code execution
    /// is prohibited.
    #[error("no script given: refusing trivial remote execution")]
    NoScript,
    /// Raised when the connectivity probe never succeeded within the retry
    /// budget. Carries the last captured error stream.
    #[error("host {host} unreachable after {attempts} attempts: {stderr}")]
    Unreachable {
        /// Host that never became reachable.
        host: String,
        /// Number of probe attempts performed.
        attempts: u32,
        /// Stderr captured from the final attempt.
        stderr: String,
    },
    /// Raised when copying the script fails after a successful probe.
    #[error("failed to copy script to remote host: {source}")]
    Transfer {
        /// Underlying transport error.
        #[source]
        source: SshError,
    },
    /// Raised when the script itself fails after a successful probe.
    #[error("remote script failed: {source}")]
    Execution {
        /// Underlying transport error.
        #[source]
        source: SshError,
    },
    /// Raised when the local ssh tooling cannot be spawned at all.
    #[error(transparent)]
    Ssh(#[from] SshError),
}

/// Copies a script to a host and executes it through a login shell, with a
/// bounded connection-probe retry loop in front.
#[derive(Debug)]
pub struct RemoteExecutor<'a, R: CommandRunner> {
    ssh: &'a SshClient<R>,
    retry_wait: Duration,
    max_retry: u32,
}

impl<'a, R: CommandRunner> RemoteExecutor<'a, R> {
    /// Creates an executor over an SSH client with the given retry budget.
    #[must_use]
    pub const fn new(ssh: &'a SshClient<R>, retry_wait: Duration, max_retry: u32) -> Self {
        Self {
            ssh,
            retry_wait,
            max_retry,
        }
    }

    /// Runs `script_path` on `host` and returns its captured stdout.
    ///
    /// The known-hosts entry for `host` is purged unconditionally before
    /// connecting: addresses are reused across ephemeral instances with
    /// different host keys.
    ///
    /// # Errors
    ///
    /// Returns [`ExecError::Unreachable`] when every probe fails,
    /// [`ExecError::Transfer`] or [`ExecError::Execution`] for failures
    /// after a successful probe, and [`ExecError::NoScript`] for an empty
    /// script path.
    pub async fn run(
        &self,
        host: &str,
        key_path: &Utf8Path,
        script_path: &Utf8Path,
    ) -> Result<String, ExecError> {
        if script_path.as_str().is_empty() {
            return Err(ExecError::NoScript);
        }

        self.ssh.purge_known_host(host);

        let mut last_stderr = String::new();
        for attempt in 1..=self.max_retry {
            match self.probe(host, key_path)? {
                Probe::Reachable => {
                    debug!(host, attempt, "connection probe succeeded");
                    return self.copy_and_execute(host, key_path, script_path);
                }
                Probe::TransportFailed { stderr } => {
                    debug!(host, attempt, "connection probe failed");
                    last_stderr = stderr;
                    if attempt < self.max_retry {
                        sleep(self.retry_wait).await;
                    }
                }
            }
        }

        Err(ExecError::Unreachable {
            host: host.to_owned(),
            attempts: self.max_retry,
            stderr: last_stderr,
        })
    }

    fn probe(&self, host: &str, key_path: &Utf8Path) -> Result<Probe, SshError> {
        let output = self.ssh.probe(host, key_path)?;
        if output.is_success() {
            Ok(Probe::Reachable)
        } else {
            Ok(Probe::TransportFailed {
                stderr: output.stderr,
            })
        }
    }

    fn copy_and_execute(
        &self,
        host: &str,
        key_path: &Utf8Path,
        script_path: &Utf8Path,
    ) -> Result<String, ExecError> {
        self.ssh
            .copy_file(host, script_path, key_path)
            .map_err(|source| ExecError::Transfer { source })?;

        let script_name = script_path.file_name().unwrap_or(script_path.as_str());
        let command = SshClient::<R>::login_shell_command(script_name);
        info!(host, script = script_name, "executing job script");
        let output = self
            .ssh
            .run_command(host, &command, key_path)
            .map_err(|source| ExecError::Execution { source })?;
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::SshConfig;
    use crate::test_support::ScriptedRunner;
    use std::time::Instant;

    const KEY: &str = "secrets/t1.key";
    const SCRIPT: &str = "jobs/run.sh";

    fn executor(
        runner: &ScriptedRunner,
        retry_wait: Duration,
        max_retry: u32,
    ) -> (SshClient<ScriptedRunner>, Duration, u32) {
        (
            SshClient::new(SshConfig::default(), runner.clone()),
            retry_wait,
            max_retry,
        )
    }

    fn programs(runner: &ScriptedRunner) -> Vec<String> {
        runner
            .invocations()
            .into_iter()
            .map(|invocation| invocation.program)
            .collect()
    }

    #[tokio::test]
    async fn probe_retries_then_copies_and_executes() {
        let runner = ScriptedRunner::new();
        runner.push_success(); // known-hosts purge
        runner.push_failure(255); // probe 1
        runner.push_failure(255); // probe 2
        runner.push_success(); // probe 3
        runner.push_success(); // scp
        runner.push_output(Some(0), "job output\n", ""); // script run
        let (ssh, wait, retries) = executor(&runner, Duration::from_millis(10), 3);
        let exec = RemoteExecutor::new(&ssh, wait, retries);

        let started = Instant::now();
        let stdout = exec
            .run("203.0.113.5", KEY.into(), SCRIPT.into())
            .await
            .expect("run should succeed");

        assert_eq!(stdout, "job output\n");
        assert!(
            started.elapsed() >= Duration::from_millis(20),
            "expected a sleep between each failed probe"
        );
        assert_eq!(
            programs(&runner),
            ["ssh-keygen", "ssh", "ssh", "ssh", "scp", "ssh"],
            "expected exactly three probes before copy and execute"
        );
    }

    #[tokio::test]
    async fn exhausted_probes_never_copy_or_execute() {
        let runner = ScriptedRunner::new();
        runner.push_success(); // known-hosts purge
        runner.push_failure(255);
        runner.push_failure(255);
        runner.push_output(Some(255), "", "Connection refused");
        let (ssh, wait, retries) = executor(&runner, Duration::from_millis(1), 3);
        let exec = RemoteExecutor::new(&ssh, wait, retries);

        let err = exec
            .run("203.0.113.5", KEY.into(), SCRIPT.into())
            .await
            .expect_err("run should fail");

        assert!(
            matches!(
                err,
                ExecError::Unreachable {
                    attempts: 3,
                    ref stderr,
                    ..
                } if stderr == "Connection refused"
            ),
            "unexpected error: {err}"
        );
        assert_eq!(
            programs(&runner),
            ["ssh-keygen", "ssh", "ssh", "ssh"],
            "no scp or script execution after exhausted probes"
        );
    }

    #[tokio::test]
    async fn copy_failure_after_probe_is_not_retried() {
        let runner = ScriptedRunner::new();
        runner.push_success(); // known-hosts purge
        runner.push_success(); // probe
        runner.push_failure(1); // scp fails
        let (ssh, wait, retries) = executor(&runner, Duration::from_millis(1), 5);
        let exec = RemoteExecutor::new(&ssh, wait, retries);

        let err = exec
            .run("203.0.113.5", KEY.into(), SCRIPT.into())
            .await
            .expect_err("run should fail");

        assert!(matches!(err, ExecError::Transfer { .. }));
        assert_eq!(
            programs(&runner),
            ["ssh-keygen", "ssh", "scp"],
            "copy failure must propagate without another probe"
        );
    }

    #[tokio::test]
    async fn script_failure_after_probe_is_distinct_from_unreachable() {
        let runner = ScriptedRunner::new();
        runner.push_success(); // known-hosts purge
        runner.push_success(); // probe
        runner.push_success(); // scp
        runner.push_output(Some(2), "", "run.sh: line 3: boom"); // script
        let (ssh, wait, retries) = executor(&runner, Duration::from_millis(1), 5);
        let exec = RemoteExecutor::new(&ssh, wait, retries);

        let err = exec
            .run("203.0.113.5", KEY.into(), SCRIPT.into())
            .await
            .expect_err("run should fail");

        assert!(
            matches!(err, ExecError::Execution { .. }),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn empty_script_path_is_rejected_before_connecting() {
        let runner = ScriptedRunner::new();
        let (ssh, wait, retries) = executor(&runner, Duration::from_millis(1), 5);
        let exec = RemoteExecutor::new(&ssh, wait, retries);

        let err = exec
            .run("203.0.113.5", KEY.into(), "".into())
            .await
            .expect_err("run should fail");

        assert!(matches!(err, ExecError::NoScript));
        assert!(runner.invocations().is_empty());
    }

    #[tokio::test]
    async fn executed_command_uses_login_shell() {
        let runner = ScriptedRunner::new();
        runner.push_success();
        runner.push_success();
        runner.push_success();
        runner.push_output(Some(0), "", "");
        let (ssh, wait, retries) = executor(&runner, Duration::from_millis(1), 1);
        let exec = RemoteExecutor::new(&ssh, wait, retries);

        exec.run("203.0.113.5", KEY.into(), SCRIPT.into())
            .await
            .expect("run should succeed");

        let last = runner.invocations().pop().expect("invocations recorded");
        assert!(
            last.command_string().ends_with("bash -l run.sh"),
            "got: {}",
            last.command_string()
        );
    }
}
