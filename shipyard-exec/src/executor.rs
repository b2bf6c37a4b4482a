//! Process execution seam.
//!
//! [`SystemExecutor`] spawns real child processes. Tests substitute an
//! in-memory [`ProcessExecutor`] so the pipeline can run without git,
//! docker, or kubectl installed.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

use crate::record::CommandSpec;

/// Exit code reported when the program could not be started.
pub const EXIT_SPAWN_FAILED: i32 = 127;

/// Exit code reported when the program exceeded its timeout.
pub const EXIT_TIMED_OUT: i32 = 124;

/// Raw outcome of one process execution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn timed_out(timeout: Duration) -> Self {
        Self::failure(
            EXIT_TIMED_OUT,
            format!("timed out after {}s", timeout.as_secs_f64()),
        )
    }
}

/// Executes a [`CommandSpec`] to completion. Must not fail: every problem,
/// including spawn failure and timeout, is expressed in the returned output.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    async fn execute(&self, spec: &CommandSpec, timeout: Duration) -> ProcessOutput;
}

/// Runs commands as child processes of the daemon.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

#[async_trait]
impl ProcessExecutor for SystemExecutor {
    async fn execute(&self, spec: &CommandSpec, timeout: Duration) -> ProcessOutput {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the child on timeout kills it.
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return ProcessOutput::failure(
                    EXIT_SPAWN_FAILED,
                    format!("failed to start '{}': {err}", spec.program),
                )
            }
        };

        if let (Some(input), Some(mut stdin)) = (spec.stdin.as_ref(), child.stdin.take()) {
            if let Err(err) = stdin.write_all(input.as_bytes()).await {
                warn!(program = %spec.program, error = %err, "failed to write child stdin");
            }
        }

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => ProcessOutput {
                exit_code: output.status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(err)) => ProcessOutput::failure(-1, format!("failed to wait for child: {err}")),
            Err(_) => ProcessOutput::timed_out(timeout),
        }
    }
}
