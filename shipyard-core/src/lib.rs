//! Shipyard core library: service model, descriptor loading, in-memory registry.
//!
//! - [`types`]: newtypes and domain structs
//! - [`descriptor`]: reading `service.yaml` from a working copy
//! - [`registry`]: the synchronized [`ServiceRegistry`] and its desired-state [`SyncPlan`]
//! - [`error`]: [`RegistryError`]

pub mod descriptor;
pub mod error;
pub mod registry;
pub mod types;

pub use error::RegistryError;
pub use registry::{ServiceRegistry, SyncPlan};
pub use types::{
    ContainerSpec, Descriptor, Resource, Service, ServiceName, Stats, UpdateDescriptor,
};
