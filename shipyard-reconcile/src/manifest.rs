//! Manifest rendering and application.
//!
//! A repository opts in by shipping an executable `deployment` at its root.
//! It receives the service's state as `metadata.yaml` and prints a manifest,
//! which is saved as `deployment.yaml` and applied with `kubectl`.

use std::path::Path;

use tracing::{info, warn};

use shipyard_core::Service;
use shipyard_exec::{CommandRunner, CommandSpec};

use crate::error::{ensure_success, io_err, ReconcileError};

pub const RENDER_SCRIPT: &str = "deployment";
pub const METADATA_FILE: &str = "metadata.yaml";
pub const MANIFEST_FILE: &str = "deployment.yaml";

/// Render and apply the manifest. Returns `false` when the repository has no
/// render script.
pub async fn render_and_apply(
    runner: &CommandRunner,
    wdir: &Path,
    service: &Service,
) -> Result<bool, ReconcileError> {
    if !has_render_script(wdir).await {
        return Ok(false);
    }

    let metadata = wdir.join(METADATA_FILE);
    let input = serde_yaml::to_string(service)?;
    tokio::fs::write(&metadata, input)
        .await
        .map_err(|e| io_err(&metadata, e))?;

    let render = runner
        .run(
            CommandSpec::new(format!("./{RENDER_SCRIPT}"))
                .arg(METADATA_FILE)
                .current_dir(wdir),
        )
        .await;
    ensure_success("manifest render", &render)?;

    let manifest = wdir.join(MANIFEST_FILE);
    tokio::fs::write(&manifest, &render.output)
        .await
        .map_err(|e| io_err(&manifest, e))?;

    let apply = runner
        .run(
            CommandSpec::new("kubectl")
                .args(["apply", "-f", MANIFEST_FILE])
                .current_dir(wdir),
        )
        .await;
    ensure_success("manifest apply", &apply)?;

    info!(service = %service.name, "manifest applied");
    Ok(true)
}

/// A regular file at the repository root with at least one execute bit.
async fn has_render_script(wdir: &Path) -> bool {
    let script = wdir.join(RENDER_SCRIPT);
    let Ok(meta) = tokio::fs::metadata(&script).await else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    if !is_executable(&meta) {
        warn!(script = %script.display(), "render script is not executable, skipping manifest");
        return false;
    }
    true
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    true
}
