use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::executor::{ProcessExecutor, SystemExecutor};
use crate::record::{CommandResult, CommandSpec};
use crate::work_log::WorkLog;

/// Runs external commands and records every invocation in the [`WorkLog`].
///
/// `run` never fails. A command that cannot start, exits non-zero, or times
/// out still produces a [`CommandResult`]; callers decide what a failure
/// means for the step they are running.
#[derive(Clone)]
pub struct CommandRunner {
    executor: Arc<dyn ProcessExecutor>,
    log: WorkLog,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(executor: Arc<dyn ProcessExecutor>, log: WorkLog, timeout: Duration) -> Self {
        Self {
            executor,
            log,
            timeout,
        }
    }

    /// Runner backed by real child processes.
    pub fn system(log: WorkLog, timeout: Duration) -> Self {
        Self::new(Arc::new(SystemExecutor), log, timeout)
    }

    pub fn log(&self) -> &WorkLog {
        &self.log
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn run(&self, spec: CommandSpec) -> CommandResult {
        debug!(command = %spec, cwd = ?spec.cwd, "running command");
        let started_at = Utc::now();
        let out = self.executor.execute(&spec, self.timeout).await;
        let ended_at = Utc::now();

        let result = CommandResult {
            command: spec.argv(),
            cwd: spec.cwd,
            exit_code: out.exit_code,
            output: out.stdout,
            stderr: out.stderr,
            started_at,
            ended_at,
        };

        if result.succeeded() {
            debug!(command = %result.command_line(), "command finished");
        } else {
            warn!(
                command = %result.command_line(),
                exit_code = result.exit_code,
                stderr = %result.stderr.trim(),
                "command failed"
            );
        }

        self.log.append(result.clone());
        result
    }
}

impl std::fmt::Debug for CommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRunner")
            .field("timeout", &self.timeout)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}
