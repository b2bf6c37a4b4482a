//! Domain types for the service registry.
//!
//! All path fields use `PathBuf`. All types are serializable via serde so the
//! same structs back the descriptor file, the manifest-rendering input, and
//! the daemon's listing output.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Build input used when a descriptor declares no containers.
pub const DEFAULT_BUILD_INPUT: &str = "Dockerfile";

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed service name. One service per upstream repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceName(pub String);

impl ServiceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ServiceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ServiceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// One buildable container declared by a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    /// Build input path, relative to the working-copy root.
    pub source: PathBuf,
}

/// A resource attached to an [`UpdateDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Declares how a service is built and deployed (`service.yaml`).
///
/// Unknown keys are ignored so repositories can carry extra configuration
/// without breaking the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Descriptor {
    /// A template is a source for instantiation and is never deployed.
    #[serde(default)]
    pub template: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containers: Option<Vec<ContainerSpec>>,
    /// Network route prefix, without surrounding slashes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Resource>,
}

/// Artifact/resource declaration appended to a service through the update API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDescriptor {
    pub artifact: String,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Operational counters. Cosmetic only; carried across syncs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Stats {
    pub good: f64,
    pub bad: f64,
    pub slow: f64,
}

/// A service backed by one upstream repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: ServiceName,
    pub owner: String,
    pub clone_url: String,
    /// Absent until the first successful descriptor read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,
    /// Source revision of the last successful deploy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Container name -> pushed image reference, from the last successful deploy.
    #[serde(default)]
    pub images: BTreeMap<String, String>,
    /// Update-API declarations, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<UpdateDescriptor>,
    #[serde(default)]
    pub stats: Stats,
}

impl Service {
    pub fn new(
        name: impl Into<ServiceName>,
        owner: impl Into<String>,
        clone_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            clone_url: clone_url.into(),
            descriptor: None,
            version: None,
            images: BTreeMap::new(),
            history: Vec::new(),
            stats: Stats::default(),
        }
    }

    pub fn is_template(&self) -> bool {
        self.descriptor.as_ref().is_some_and(|d| d.template)
    }

    /// Containers to build, falling back to a single `<name>` built from the
    /// conventional `Dockerfile`.
    pub fn containers(&self) -> Vec<ContainerSpec> {
        match self.descriptor.as_ref().and_then(|d| d.containers.clone()) {
            Some(containers) => containers,
            None => vec![ContainerSpec {
                name: self.name.0.clone(),
                source: PathBuf::from(DEFAULT_BUILD_INPUT),
            }],
        }
    }

    pub fn route_prefix(&self) -> Option<&str> {
        self.descriptor.as_ref().and_then(|d| d.prefix.as_deref())
    }

    /// The most recent update-API declaration, if any.
    pub fn latest_update(&self) -> Option<&UpdateDescriptor> {
        self.history.last()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
