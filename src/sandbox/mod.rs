//! Isolated execution of generated code against generated tests.
//!
//! Code and tests are concatenated into one script in a scratch file, run by
//! an interpreter subprocess under a wall-clock timeout, and classified. The
//! scratch file is removed on every path; a child that outlives the timeout is
//! killed.

pub mod syntax;

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Report marker for a zero exit status.
pub const PASSED_MARKER: &str = "TESTS PASSED";
/// Report marker for a nonzero exit status.
pub const FAILED_MARKER: &str = "TESTS FAILED";
/// Report marker for a run killed at the deadline.
pub const TIMEOUT_MARKER: &str = "TESTS TIMEOUT";
/// Report marker for a run that could not be carried out.
pub const EXECUTION_ERROR_MARKER: &str = "TEST EXECUTION ERROR";

/// How a sandboxed run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Passed,
    Failed,
    Timeout,
    ExecutionError,
}

impl ExecutionOutcome {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Passed => "passed",
            ExecutionOutcome::Failed => "failed",
            ExecutionOutcome::Timeout => "timeout",
            ExecutionOutcome::ExecutionError => "execution_error",
        }
    }
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one sandboxed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    /// Exit status; absent on timeout, execution error, or signal death.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    /// Why the run could not be carried out, for `ExecutionError`.
    pub detail: Option<String>,
}

impl ExecutionReport {
    /// True only for [`ExecutionOutcome::Passed`].
    pub fn passed(&self) -> bool {
        self.outcome == ExecutionOutcome::Passed
    }

    fn error(detail: impl Into<String>, duration: Duration) -> Self {
        Self {
            outcome: ExecutionOutcome::ExecutionError,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration,
            detail: Some(detail.into()),
        }
    }

    /// Human-readable report led by its outcome marker.
    pub fn render(&self, timeout: Duration) -> String {
        match self.outcome {
            ExecutionOutcome::Passed => {
                format!("{PASSED_MARKER}\n{}", self.combined_output())
            }
            ExecutionOutcome::Failed => {
                format!("{FAILED_MARKER}\n{}\n{}", self.stdout, self.stderr)
            }
            ExecutionOutcome::Timeout => format!(
                "{TIMEOUT_MARKER} - Tests took longer than {}s to run",
                timeout.as_secs_f64()
            ),
            ExecutionOutcome::ExecutionError => format!(
                "{EXECUTION_ERROR_MARKER}: {}",
                self.detail.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
            (true, false) => self.stderr.clone(),
            _ => self.stdout.clone(),
        }
    }
}

/// Runs scripts in a subprocess with a hard deadline.
#[derive(Debug, Clone)]
pub struct Sandbox {
    interpreter: String,
    timeout: Duration,
    scratch_dir: Option<PathBuf>,
}

impl Sandbox {
    /// Create a sandbox running scripts with `interpreter`.
    pub fn new(interpreter: impl Into<String>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            timeout,
            scratch_dir: None,
        }
    }

    /// Directory for scratch files instead of the system temp dir.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `code` followed by `tests` as one script.
    ///
    /// Never fails: every problem is classified into the report.
    pub async fn run(&self, code: &str, tests: &str) -> ExecutionReport {
        let start = Instant::now();

        let mut builder = tempfile::Builder::new();
        builder.prefix("agent_relay_").suffix(".py");
        let created = match self.scratch_dir {
            Some(ref dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        };
        let mut script = match created {
            Ok(file) => file,
            Err(e) => {
                return ExecutionReport::error(
                    format!("failed to create scratch file: {e}"),
                    start.elapsed(),
                );
            }
        };

        let written = script
            .write_all(code.as_bytes())
            .and_then(|_| script.write_all(b"\n\n"))
            .and_then(|_| script.write_all(tests.as_bytes()))
            .and_then(|_| script.flush());
        if let Err(e) = written {
            return ExecutionReport::error(
                format!("failed to write scratch file: {e}"),
                start.elapsed(),
            );
        }

        tracing::debug!(
            interpreter = %self.interpreter,
            script = %script.path().display(),
            timeout_ms = self.timeout.as_millis() as u64,
            "Running sandboxed script"
        );

        let child = Command::new(&self.interpreter)
            .arg(script.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(interpreter = %self.interpreter, error = %e, "Failed to start interpreter");
                return ExecutionReport::error(
                    format!("failed to start '{}': {e}", self.interpreter),
                    start.elapsed(),
                );
            }
        };

        let report = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let outcome = if output.status.success() {
                    ExecutionOutcome::Passed
                } else {
                    ExecutionOutcome::Failed
                };
                ExecutionReport {
                    outcome,
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    duration: start.elapsed(),
                    detail: None,
                }
            }
            Ok(Err(e)) => ExecutionReport::error(
                format!("failed to collect output: {e}"),
                start.elapsed(),
            ),
            Err(_) => {
                tracing::warn!(timeout_ms = self.timeout.as_millis() as u64, "Sandboxed script timed out");
                ExecutionReport {
                    outcome: ExecutionOutcome::Timeout,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    duration: start.elapsed(),
                    detail: None,
                }
            }
        };

        if let Err(e) = script.close() {
            tracing::warn!(error = %e, "Failed to remove scratch file");
        }

        tracing::info!(
            outcome = %report.outcome,
            exit_code = ?report.exit_code,
            duration_ms = report.duration.as_millis() as u64,
            "Sandboxed run finished"
        );
        report
    }
}
