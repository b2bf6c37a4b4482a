//! # shipyard-reconcile
//!
//! The reconciliation pipeline: `sync` diffs the upstream repository listing
//! against the [`ServiceRegistry`](shipyard_core::ServiceRegistry), `update`
//! refreshes a service's working copy and descriptor, and `deploy` builds
//! images, applies manifests and registers routes.
//!
//! Every step runs as a [`Job`](shipyard_exec::Job) keyed by the service it
//! touches, so steps for one service never interleave while distinct services
//! proceed in parallel. External systems sit behind the traits in
//! [`upstream`]; [`http`] provides the production implementations.

pub mod error;
pub mod http;
pub mod images;
pub mod manifest;
pub mod pipeline;
pub mod routes;
pub mod upstream;
pub mod workspace;

pub use error::ReconcileError;
pub use http::{ContainerRegistry, GithubOrg, HttpClient, RouteService};
pub use images::{ImageBuilder, RegistryTarget};
pub use pipeline::{Collaborators, DeployOutcome, Reconciler, UpdateOutcome};
pub use upstream::{ImageRegistry, RepoListing, RepoSource, RouteRegistry};
