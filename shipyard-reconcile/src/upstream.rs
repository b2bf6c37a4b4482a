//! External collaborators of the pipeline.
//!
//! The pipeline only ever talks to the outside world through these traits
//! and through the [`CommandRunner`](shipyard_exec::CommandRunner), which
//! lets tests drive a full reconcile cycle with in-memory doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use shipyard_core::Service;

use crate::error::ReconcileError;

/// One repository in the upstream organization listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoListing {
    pub name: String,
    pub clone_url: String,
    pub owner: String,
}

impl RepoListing {
    pub fn new(
        name: impl Into<String>,
        clone_url: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            clone_url: clone_url.into(),
            owner: owner.into(),
        }
    }

    /// The desired service this repository stands for.
    pub fn to_service(&self) -> Service {
        Service::new(self.name.as_str(), self.owner.as_str(), self.clone_url.as_str())
    }
}

/// Source of desired state: the set of repositories that should be services.
#[async_trait]
pub trait RepoSource: Send + Sync {
    async fn list_repositories(&self) -> Result<Vec<RepoListing>, ReconcileError>;
}

/// Container image registry, queried before building.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// `Ok(false)` only when the registry positively reports the tag as
    /// unknown. Any other failure is an error, since building over a tag that
    /// may exist would overwrite a published image.
    async fn manifest_exists(&self, repository: &str, tag: &str) -> Result<bool, ReconcileError>;
}

/// Cluster route registry.
#[async_trait]
pub trait RouteRegistry: Send + Sync {
    async fn route_exists(&self, service: &str) -> Result<bool, ReconcileError>;
    async fn create_route(&self, service: &str, prefix: &str) -> Result<(), ReconcileError>;
}
