use std::path::PathBuf;

use thiserror::Error;

/// Error surface for daemon settings, runtime, and control protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Missing or invalid startup configuration.
    #[error("configuration error: {var}: {message}")]
    Config { var: String, message: String },

    #[error("registry error: {0}")]
    Registry(#[from] shipyard_core::RegistryError),

    #[error("scheduler error: {0}")]
    Exec(#[from] shipyard_exec::ExecError),

    #[error("pipeline error: {0}")]
    Reconcile(#[from] shipyard_reconcile::ReconcileError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn config_err(var: &str, message: impl Into<String>) -> DaemonError {
    DaemonError::Config {
        var: var.to_string(),
        message: message.into(),
    }
}
