//! In-memory service registry.
//!
//! The registry is an explicit, injectable store owned by whoever runs the
//! pipeline. Every method takes `&self`; the map is guarded internally so it
//! can be shared across scheduler workers behind an `Arc`.
//!
//! Entries are created and removed only by the sync step ([`ServiceRegistry::register`],
//! [`ServiceRegistry::remove`]). Later steps mutate existing entries and fail
//! with [`RegistryError::ServiceNotFound`] if the entry disappeared meanwhile.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::RegistryError;
use crate::types::{Descriptor, Service, ServiceName, UpdateDescriptor};

/// Set difference between the desired names and the registered names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    /// Desired but not registered.
    pub to_add: Vec<ServiceName>,
    /// Registered but no longer desired.
    pub to_remove: Vec<ServiceName>,
    /// Desired and already registered.
    pub to_keep: Vec<ServiceName>,
}

/// Name-keyed map of services with interior synchronization.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: RwLock<BTreeMap<ServiceName, Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Critical sections never leave the map half-updated, so a poisoned lock
    // still guards consistent data.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<ServiceName, Service>> {
        self.services.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<ServiceName, Service>> {
        self.services.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or wholesale-replace a service. Returns the previous entry.
    pub fn upsert(&self, service: Service) -> Option<Service> {
        self.write().insert(service.name.clone(), service)
    }

    pub fn remove(&self, name: &ServiceName) -> Option<Service> {
        self.write().remove(name)
    }

    pub fn get(&self, name: &ServiceName) -> Option<Service> {
        self.read().get(name).cloned()
    }

    pub fn contains(&self, name: &ServiceName) -> bool {
        self.read().contains_key(name)
    }

    /// All services, ordered by name.
    pub fn list(&self) -> Vec<Service> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Compare `desired` against the registered names. Each list is sorted.
    pub fn diff<I>(&self, desired: I) -> SyncPlan
    where
        I: IntoIterator<Item = ServiceName>,
    {
        let desired: BTreeSet<ServiceName> = desired.into_iter().collect();
        let current = self.read();

        let mut plan = SyncPlan::default();
        for name in &desired {
            if current.contains_key(name) {
                plan.to_keep.push(name.clone());
            } else {
                plan.to_add.push(name.clone());
            }
        }
        plan.to_remove = current
            .keys()
            .filter(|name| !desired.contains(*name))
            .cloned()
            .collect();
        plan
    }

    /// Register a desired service discovered upstream.
    ///
    /// A new name is inserted as-is. For an existing name only the identity
    /// (owner, clone URL) is refreshed; descriptor, version, images, history
    /// and stats carry over. Returns `true` when the entry was created.
    pub fn register(&self, desired: Service) -> bool {
        let mut services = self.write();
        match services.get_mut(&desired.name) {
            Some(existing) => {
                existing.owner = desired.owner;
                existing.clone_url = desired.clone_url;
                false
            }
            None => {
                services.insert(desired.name.clone(), desired);
                true
            }
        }
    }

    /// Replace the descriptor of a registered service wholesale.
    pub fn set_descriptor(
        &self,
        name: &ServiceName,
        descriptor: Descriptor,
    ) -> Result<Service, RegistryError> {
        self.modify(name, |service| service.descriptor = Some(descriptor))
    }

    /// Commit the outcome of a completed deploy: `version` and `images` are
    /// replaced together under one lock.
    pub fn commit_deploy(
        &self,
        name: &ServiceName,
        version: String,
        images: BTreeMap<String, String>,
    ) -> Result<Service, RegistryError> {
        self.modify(name, |service| {
            service.version = Some(version);
            service.images = images;
        })
    }

    /// Append an update-API declaration to the service's history.
    pub fn append_update(
        &self,
        name: &ServiceName,
        update: UpdateDescriptor,
    ) -> Result<Service, RegistryError> {
        self.modify(name, |service| service.history.push(update))
    }

    fn modify<F>(&self, name: &ServiceName, f: F) -> Result<Service, RegistryError>
    where
        F: FnOnce(&mut Service),
    {
        let mut services = self.write();
        let service = services
            .get_mut(name)
            .ok_or_else(|| RegistryError::ServiceNotFound {
                name: name.0.clone(),
            })?;
        f(service);
        Ok(service.clone())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
