//! Subprocess execution for external firewall commands.
//!
//! Every command the driver issues goes through [`SubprocessRunner`] as an
//! argv vector — never a shell string, so source patterns and rule
//! comments can never be interpreted by a shell. [`ProcessRunner`] is the
//! production implementation; [`RecordingRunner`] is a test double that
//! records every invocation and answers from a scripted queue.

use std::ffi::OsString;
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// The captured result of one subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process exit code, if the process exited normally.
    pub status: Option<i32>,
    /// Captured stdout bytes.
    pub stdout: Vec<u8>,
    /// Captured stderr bytes.
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Whether the process exited with status 0.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Failure invoking an external command.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The process could not be spawned (binary missing, permission
    /// denied, fork/exec failure).
    #[error("failed to execute `{command}`: {source}")]
    Exec {
        /// The command line that failed to spawn, for logging.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The process did not exit within the configured wall-clock timeout
    /// and was killed.
    #[error("`{command}` timed out after {timeout:?} and was killed")]
    Timeout {
        /// The command line that timed out, for logging.
        command: String,
        /// The timeout that was exceeded.
        timeout: Duration,
    },
}

/// Runs an argv vector as a subprocess, capturing stdout/stderr, bounded
/// by a wall-clock timeout.
pub trait SubprocessRunner {
    /// Executes `argv`, returning its captured output or a [`RunnerError`].
    fn run(&mut self, argv: &[OsString], timeout: Duration) -> Result<CommandOutput, RunnerError>;
}

/// Renders an argv vector as a space-joined string for logging, never for
/// execution.
#[must_use]
pub fn display_argv(argv: &[OsString]) -> String {
    argv.iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Builds an argv vector of [`OsString`]s from string-like arguments.
#[must_use]
pub fn argv(args: impl IntoIterator<Item = impl Into<OsString>>) -> Vec<OsString> {
    args.into_iter().map(Into::into).collect()
}

/// The production [`SubprocessRunner`], built on [`std::process::Command`].
///
/// Timeout enforcement polls [`std::process::Child::try_wait`] rather than
/// spawning dedicated reader threads per call: firewall-tool output is
/// small (a handful of rule lines), so the simpler polling loop avoids the
/// thread-per-invocation overhead a high-rate reader-thread design (as used
/// for the much larger transfer-process streams elsewhere in this
/// workspace) would not pay for here.
#[derive(Debug, Default)]
pub struct ProcessRunner {
    poll_interval: Duration,
}

impl ProcessRunner {
    /// Constructs a runner polling for process exit every 10ms.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl SubprocessRunner for ProcessRunner {
    fn run(&mut self, argv: &[OsString], timeout: Duration) -> Result<CommandOutput, RunnerError> {
        let command_line = display_argv(argv);
        let Some((program, rest)) = argv.split_first() else {
            return Ok(CommandOutput {
                status: Some(0),
                stdout: Vec::new(),
                stderr: Vec::new(),
            });
        };

        let mut child = Command::new(program)
            .args(rest)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunnerError::Exec {
                command: command_line.clone(),
                source,
            })?;

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait().map_err(|source| RunnerError::Exec {
                command: command_line.clone(),
                source,
            })? {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RunnerError::Timeout {
                    command: command_line,
                    timeout,
                });
            }
            std::thread::sleep(self.poll_interval);
        };

        let mut stdout = Vec::new();
        if let Some(mut handle) = child.stdout.take() {
            let _ = handle.read_to_end(&mut stdout);
        }
        let mut stderr = Vec::new();
        if let Some(mut handle) = child.stderr.take() {
            let _ = handle.read_to_end(&mut stderr);
        }

        Ok(CommandOutput {
            status: status.code(),
            stdout,
            stderr,
        })
    }
}

/// A scripted [`SubprocessRunner`] test double: records every invocation
/// and answers from a FIFO queue of canned responses.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    /// Every argv vector passed to [`RecordingRunner::run`], in call order.
    pub calls: Vec<Vec<OsString>>,
    responses: std::collections::VecDeque<Result<CommandOutput, String>>,
}

impl RecordingRunner {
    /// Constructs a runner with no scripted responses; every call returns
    /// a default success with empty output unless scripted otherwise.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next response to return.
    pub fn push_output(&mut self, output: CommandOutput) {
        self.responses.push_back(Ok(output));
    }

    /// Queues the next response as a success with the given stdout text.
    pub fn push_stdout(&mut self, stdout: &str) {
        self.push_output(CommandOutput {
            status: Some(0),
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        });
    }

    /// Queues the next call to fail with a spawn error.
    pub fn push_exec_error(&mut self, message: impl Into<String>) {
        self.responses.push_back(Err(message.into()));
    }
}

impl SubprocessRunner for RecordingRunner {
    fn run(&mut self, argv: &[OsString], _timeout: Duration) -> Result<CommandOutput, RunnerError> {
        self.calls.push(argv.to_vec());
        match self.responses.pop_front() {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(RunnerError::Exec {
                command: display_argv(argv),
                source: std::io::Error::other(message),
            }),
            None => Ok(CommandOutput {
                status: Some(0),
                stdout: Vec::new(),
                stderr: Vec::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_runner_records_calls_in_order() {
        let mut runner = RecordingRunner::new();
        runner.push_stdout("line one");
        let output = runner
            .run(&argv(["iptables", "-L"]), Duration::from_secs(1))
            .unwrap();
        assert_eq!(output.stdout, b"line one".to_vec());
        assert_eq!(runner.calls.len(), 1);
        assert_eq!(runner.calls[0][0], OsString::from("iptables"));
    }

    #[test]
    fn real_runner_captures_stdout_of_a_trivial_command() {
        let mut runner = ProcessRunner::new();
        let output = runner
            .run(&argv(["echo", "hello"]), Duration::from_secs(5))
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, b"hello\n".to_vec());
    }

    #[test]
    fn real_runner_times_out_a_hung_process() {
        let mut runner = ProcessRunner::new();
        let result = runner.run(&argv(["sleep", "5"]), Duration::from_millis(50));
        assert!(matches!(result, Err(RunnerError::Timeout { .. })));
    }
}
