//! Error types for shipyard-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from descriptor loading and registry mutation.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Underlying I/O failure while reading a descriptor.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Descriptor YAML could not be parsed; includes file path and line context from serde_yaml.
    #[error("failed to parse descriptor at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The named service is not present in the registry.
    #[error("service '{name}' is not registered")]
    ServiceNotFound { name: String },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> RegistryError {
    RegistryError::Io {
        path: path.into(),
        source,
    }
}
