//! Error types for shipyard-reconcile.

use std::path::PathBuf;

use thiserror::Error;

use shipyard_core::RegistryError;
use shipyard_exec::{CommandResult, ExecError};

/// Everything that can abort a pipeline step.
///
/// Steps run as scheduler jobs, so these errors end up logged at the job
/// boundary; the registry is left as it was before the failed step.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("could not schedule follow-up job: {0}")]
    Schedule(#[from] ExecError),

    /// An external command ran but did not succeed.
    #[error("{step} failed: `{command}` exited with {exit_code}: {output}")]
    Command {
        step: &'static str,
        command: String,
        exit_code: i32,
        output: String,
    },

    /// A declared build input is missing from the working copy.
    #[error("container '{container}': build input {path} does not exist")]
    MissingBuildInput { container: String, path: PathBuf },

    /// Template services are instantiated, never deployed.
    #[error("service '{name}' is a template and cannot be deployed")]
    Template { name: String },

    /// An HTTP exchange failed or returned an unusable answer.
    #[error("{method} {url}: {message}")]
    Http {
        method: &'static str,
        url: String,
        message: String,
    },

    #[error("unexpected response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not encode manifest input: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ReconcileError {
    ReconcileError::Io {
        path: path.into(),
        source,
    }
}

/// Turn a failed command record into a step error.
pub(crate) fn ensure_success(
    step: &'static str,
    result: &CommandResult,
) -> Result<(), ReconcileError> {
    if result.succeeded() {
        return Ok(());
    }
    Err(ReconcileError::Command {
        step,
        command: result.command_line(),
        exit_code: result.exit_code,
        output: result.combined_output().trim().to_string(),
    })
}
