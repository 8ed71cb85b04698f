//! Remote-shell transport built on the system `ssh`, `scp`, and
//! `ssh-keygen` binaries.
//!
//! The module shells out rather than embedding an SSH implementation, so
//! the host's client configuration and binaries stay authoritative. Command
//! execution is abstracted behind [`CommandRunner`] to support fakes in
//! tests.

use std::ffi::OsString;
use std::process::Command;

use camino::Utf8Path;
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::debug;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, SshError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, SshError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| SshError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Errors surfaced by the SSH transport.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SshError {
    /// Raised when a command cannot be spawned (for example, no ssh client
    /// is installed).
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a transport command completes with a non-zero status.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Command name used for the attempted operation.
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
}

/// Transport settings; the defaults match a stock OpenSSH install.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshConfig {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    pub scp_bin: String,
    /// Path to the `ssh-keygen` executable, used for known-hosts purges.
    pub keygen_bin: String,
    /// Remote user to connect as.
    pub user: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            ssh_bin: "ssh".to_owned(),
            scp_bin: "scp".to_owned(),
            keygen_bin: "ssh-keygen".to_owned(),
            user: "gcpfire".to_owned(),
        }
    }
}

/// Thin client issuing probe, copy, and execute commands against one host.
#[derive(Clone, Debug)]
pub struct SshClient<R: CommandRunner> {
    config: SshConfig,
    runner: R,
}

impl<R: CommandRunner> SshClient<R> {
    /// Creates a client from configuration and a runner.
    #[must_use]
    pub const fn new(config: SshConfig, runner: R) -> Self {
        Self { config, runner }
    }

    /// Returns the remote user the client connects as.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.config.user
    }

    /// Removes any known-hosts entry for `host`. Providers reuse addresses
    /// across ephemeral instances with different host keys, so stale
    /// entries must go before connecting. Best effort; failures are
    /// ignored.
    pub fn purge_known_host(&self, host: &str) {
        let args = vec![
            OsString::from("-R"),
            OsString::from(host),
        ];
        debug!(host, "purging known-hosts entry");
        self.runner.run(&self.config.keygen_bin, &args).ok();
    }

    /// Runs a trivial remote command to test reachability. Returns the raw
    /// outcome so callers can distinguish transport failure from success.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::Spawn`] when the ssh client cannot be started;
    /// a refused or unready connection is reported through the output's
    /// exit code, not as an error.
    pub fn probe(&self, host: &str, key: &Utf8Path) -> Result<CommandOutput, SshError> {
        let mut args = self.ssh_options(key);
        args.push(OsString::from(self.target(host)));
        args.push(OsString::from("echo 1"));
        self.runner.run(&self.config.ssh_bin, &args)
    }

    /// Copies `local_path` into the remote user's home directory.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::CommandFailure`] when scp exits non-zero and
    /// [`SshError::Spawn`] when it cannot be started.
    pub fn copy_file(
        &self,
        host: &str,
        local_path: &Utf8Path,
        key: &Utf8Path,
    ) -> Result<(), SshError> {
        let file_name = local_path.file_name().unwrap_or(local_path.as_str());
        let mut args = self.ssh_options(key);
        args.push(OsString::from(local_path));
        args.push(OsString::from(format!(
            "{}:~/{file_name}",
            self.target(host)
        )));
        let output = self.runner.run(&self.config.scp_bin, &args)?;
        if output.is_success() {
            return Ok(());
        }
        Err(Self::command_failure(&self.config.scp_bin, &output))
    }

    /// Executes `remote_command` on the host and returns the captured
    /// output.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::CommandFailure`] when the remote command exits
    /// non-zero and [`SshError::Spawn`] when ssh cannot be started.
    pub fn run_command(
        &self,
        host: &str,
        remote_command: &str,
        key: &Utf8Path,
    ) -> Result<CommandOutput, SshError> {
        let mut args = self.ssh_options(key);
        args.push(OsString::from(self.target(host)));
        args.push(OsString::from(remote_command));
        let output = self.runner.run(&self.config.ssh_bin, &args)?;
        if output.is_success() {
            return Ok(output);
        }
        Err(Self::command_failure(&self.config.ssh_bin, &output))
    }

    /// Renders a login-shell invocation of a script in the remote home
    /// directory. The login shell matters: without it the Compute Engine
    /// login agent does not grant the service account's access scopes.
    #[must_use]
    pub fn login_shell_command(script_name: &str) -> String {
        format!("bash -l {}", escape(script_name.into()))
    }

    fn target(&self, host: &str) -> String {
        format!("{}@{host}", self.config.user)
    }

    fn ssh_options(&self, key: &Utf8Path) -> Vec<OsString> {
        vec![
            OsString::from("-o"),
            OsString::from("BatchMode=yes"),
            OsString::from("-o"),
            OsString::from("StrictHostKeyChecking=no"),
            OsString::from("-o"),
            OsString::from("UserKnownHostsFile=/dev/null"),
            OsString::from("-o"),
            OsString::from("IdentitiesOnly=yes"),
            OsString::from("-i"),
            OsString::from(key),
        ]
    }

    fn command_failure(program: &str, output: &CommandOutput) -> SshError {
        let status_text = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        SshError::CommandFailure {
            program: program.to_owned(),
            status: output.code,
            status_text,
            stderr: output.stderr.clone(),
        }
    }
}
