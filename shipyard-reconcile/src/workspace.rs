//! Per-service working copies under the work root.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use shipyard_core::Service;
use shipyard_exec::{CommandRunner, CommandSpec};

use crate::error::{ensure_success, io_err, ReconcileError};

/// `<work_root>/<service>`.
pub fn working_copy(work_root: &Path, service: &str) -> PathBuf {
    work_root.join(service)
}

/// Bring the service's working copy up to date and return its path.
///
/// An existing copy is pulled; if the pull fails the copy is discarded and
/// cloned again. A failed clone is the only hard failure.
pub async fn checkout(
    runner: &CommandRunner,
    work_root: &Path,
    service: &Service,
) -> Result<PathBuf, ReconcileError> {
    let name = service.name.as_str();
    let wdir = working_copy(work_root, name);

    if tokio::fs::try_exists(&wdir)
        .await
        .map_err(|e| io_err(&wdir, e))?
    {
        let pull = runner
            .run(CommandSpec::new("git").arg("pull").current_dir(&wdir))
            .await;
        if pull.succeeded() {
            return Ok(wdir);
        }
        warn!(service = %name, exit_code = pull.exit_code, "pull failed, re-cloning");
        discard(&wdir).await?;
    }

    tokio::fs::create_dir_all(work_root)
        .await
        .map_err(|e| io_err(work_root, e))?;
    let clone = runner
        .run(
            CommandSpec::new("git")
                .args(["clone", service.clone_url.as_str(), name])
                .current_dir(work_root),
        )
        .await;
    ensure_success("clone", &clone)?;
    info!(service = %name, path = %wdir.display(), "cloned working copy");
    Ok(wdir)
}

/// Commit hash checked out in `wdir`.
pub async fn head_revision(runner: &CommandRunner, wdir: &Path) -> Result<String, ReconcileError> {
    let result = runner
        .run(CommandSpec::new("git").args(["rev-parse", "HEAD"]).current_dir(wdir))
        .await;
    ensure_success("revision lookup", &result)?;
    let revision = result.output.trim().to_string();
    if revision.is_empty() {
        return Err(ReconcileError::Command {
            step: "revision lookup",
            command: result.command_line(),
            exit_code: result.exit_code,
            output: "empty revision".into(),
        });
    }
    Ok(revision)
}

/// Remove a working copy. A copy that is already gone is not an error.
pub async fn discard(wdir: &Path) -> Result<(), ReconcileError> {
    match tokio::fs::remove_dir_all(wdir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err(wdir, e)),
    }
}
