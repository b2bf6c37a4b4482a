//! `shipyard update`: append an artifact declaration to a service.

use std::str::FromStr;

use anyhow::{Context, Result};
use clap::Args;

use shipyard_core::{Resource, UpdateDescriptor};
use shipyard_daemon::request_update;

use super::{home, print_json};

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Registered service name.
    pub service: String,

    /// Artifact reference, e.g. an image tag.
    #[arg(long)]
    pub artifact: String,

    /// Resource the artifact needs, as `<name>:<type>`. Repeatable.
    #[arg(long = "resource")]
    pub resources: Vec<ResourceArg>,
}

/// Thin wrapper so clap can parse `name:type` into a [`Resource`].
#[derive(Debug, Clone)]
pub struct ResourceArg(pub Resource);

impl FromStr for ResourceArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((name, kind)) if !name.is_empty() && !kind.is_empty() => Ok(Self(Resource {
                name: name.to_string(),
                kind: kind.to_string(),
            })),
            _ => Err(format!("invalid resource '{s}'; expected <name>:<type>")),
        }
    }
}

impl UpdateArgs {
    pub fn run(self) -> Result<()> {
        let descriptor = UpdateDescriptor {
            artifact: self.artifact,
            resources: self.resources.into_iter().map(|r| r.0).collect(),
        };
        let home = home()?;
        let service = request_update(&home, self.service.clone(), descriptor)
            .with_context(|| format!("failed to update '{}'", self.service))?;
        print_json(&service)
    }
}
