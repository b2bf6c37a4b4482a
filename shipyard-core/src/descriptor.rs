//! Loading `service.yaml` from a service's working copy.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{io_err, RegistryError};
use crate::types::Descriptor;

/// Descriptor file name at the root of every service repository.
pub const DESCRIPTOR_FILE: &str = "service.yaml";

/// `<working_copy>/service.yaml`: pure, no I/O.
pub fn descriptor_path(working_copy: &Path) -> PathBuf {
    working_copy.join(DESCRIPTOR_FILE)
}

/// Load the descriptor from a working copy.
///
/// Returns `Ok(None)` when the repository has no descriptor, and
/// [`RegistryError::Parse`] (with path + line context) when it is malformed.
/// An empty file is an empty descriptor.
pub async fn load_at(working_copy: &Path) -> Result<Option<Descriptor>, RegistryError> {
    let path = descriptor_path(working_copy);
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(io_err(path, err)),
    };
    parse(&path, &contents).map(Some)
}

fn parse(path: &Path, contents: &str) -> Result<Descriptor, RegistryError> {
    if contents.trim().is_empty() {
        return Ok(Descriptor::default());
    }
    serde_yaml::from_str::<Option<Descriptor>>(contents)
        .map(Option::unwrap_or_default)
        .map_err(|source| RegistryError::Parse {
            path: path.to_path_buf(),
            source,
        })
}
