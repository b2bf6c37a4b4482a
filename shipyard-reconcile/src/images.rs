//! Image resolution: reuse a published tag or build, authenticate and push.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{info, instrument};

use shipyard_core::ContainerSpec;
use shipyard_exec::{CommandRunner, CommandSpec};

use crate::error::{ensure_success, ReconcileError};
use crate::upstream::ImageRegistry;

/// Where images are pushed and how to log in.
#[derive(Clone)]
pub struct RegistryTarget {
    pub host: String,
    pub namespace: String,
    pub user: String,
    pub password: String,
}

impl RegistryTarget {
    /// `<namespace>/<container>`, the repository path inside the registry.
    pub fn repository(&self, container: &str) -> String {
        format!("{}/{container}", self.namespace)
    }

    /// `<host>/<namespace>/<container>:<tag>`.
    pub fn image_ref(&self, container: &str, tag: &str) -> String {
        format!("{}/{}:{tag}", self.host, self.repository(container))
    }
}

impl std::fmt::Debug for RegistryTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryTarget")
            .field("host", &self.host)
            .field("namespace", &self.namespace)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct ImageBuilder {
    runner: CommandRunner,
    registry: Arc<dyn ImageRegistry>,
    target: RegistryTarget,
}

impl ImageBuilder {
    pub fn new(runner: CommandRunner, registry: Arc<dyn ImageRegistry>, target: RegistryTarget) -> Self {
        Self {
            runner,
            registry,
            target,
        }
    }

    pub fn target(&self) -> &RegistryTarget {
        &self.target
    }

    /// Resolve one container to a pushed image reference tagged `version`.
    ///
    /// Published tags are never overwritten: if the registry already has the
    /// manifest, nothing is built.
    #[instrument(skip(self, wdir, container), fields(container = %container.name))]
    pub async fn resolve(
        &self,
        wdir: &Path,
        container: &ContainerSpec,
        version: &str,
    ) -> Result<String, ReconcileError> {
        let image = self.target.image_ref(&container.name, version);
        if self
            .registry
            .manifest_exists(&self.target.repository(&container.name), version)
            .await?
        {
            info!(image = %image, "image already published, reusing");
            return Ok(image);
        }

        let input = build_input(wdir, container).await?;
        let context = input.parent().unwrap_or(wdir);
        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        info!(image = %image, "building image");
        let build = self
            .runner
            .run(
                CommandSpec::new("docker")
                    .args(["build", "-f", file_name.as_str(), "-t", image.as_str(), "."])
                    .current_dir(context),
            )
            .await;
        ensure_success("image build", &build)?;

        let login = self
            .runner
            .run(
                CommandSpec::new("docker")
                    .args([
                        "login",
                        "-u",
                        self.target.user.as_str(),
                        "--password-stdin",
                        self.target.host.as_str(),
                    ])
                    .stdin(self.target.password.as_str()),
            )
            .await;
        ensure_success("registry login", &login)?;

        let push = self
            .runner
            .run(CommandSpec::new("docker").args(["push", image.as_str()]))
            .await;
        ensure_success("image push", &push)?;

        info!(image = %image, "image pushed");
        Ok(image)
    }

    /// Resolve every container. Stops at the first failure, so the caller
    /// either gets the complete map or nothing.
    pub async fn resolve_all(
        &self,
        wdir: &Path,
        containers: &[ContainerSpec],
        version: &str,
    ) -> Result<BTreeMap<String, String>, ReconcileError> {
        let mut images = BTreeMap::new();
        for container in containers {
            let image = self.resolve(wdir, container, version).await?;
            images.insert(container.name.clone(), image);
        }
        Ok(images)
    }
}

/// Locate a container's build file inside the working copy.
///
/// The source must be a relative path that stays under `wdir`, both as
/// written and after symlinks are resolved.
async fn build_input(wdir: &Path, container: &ContainerSpec) -> Result<PathBuf, ReconcileError> {
    let input = wdir.join(&container.source);
    let missing = || ReconcileError::MissingBuildInput {
        container: container.name.clone(),
        path: input.clone(),
    };
    if !is_contained(&container.source) {
        return Err(missing());
    }
    match tokio::fs::metadata(&input).await {
        Ok(meta) if meta.is_file() => {}
        _ => return Err(missing()),
    }
    let (Ok(root), Ok(resolved)) = (
        tokio::fs::canonicalize(wdir).await,
        tokio::fs::canonicalize(&input).await,
    ) else {
        return Err(missing());
    };
    if !resolved.starts_with(&root) {
        return Err(missing());
    }
    Ok(input)
}

/// Relative, and never climbs above where it starts.
fn is_contained(source: &Path) -> bool {
    source
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

impl std::fmt::Debug for ImageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBuilder")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}
