//! `shipyard services`: the daemon's registry.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use shipyard_core::Service;
use shipyard_daemon::request_services;

use super::{home, print_json};

#[derive(Args, Debug)]
pub struct ServicesArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct ServiceRow {
    #[tabled(rename = "service")]
    name: String,
    #[tabled(rename = "owner")]
    owner: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "version")]
    version: String,
    #[tabled(rename = "images")]
    images: usize,
    #[tabled(rename = "updates")]
    updates: usize,
}

impl ServicesArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let data = request_services(&home).context("failed to list services")?;
        if self.json {
            return print_json(&data);
        }

        let mut services: Vec<Service> =
            serde_json::from_value(data).context("unexpected services payload")?;
        services.sort_by(|a, b| a.name.cmp(&b.name));

        println!(
            "Shipyard v{} | {} services",
            env!("CARGO_PKG_VERSION"),
            services.len()
        );
        if services.is_empty() {
            println!("No services registered.");
            return Ok(());
        }

        let rows: Vec<ServiceRow> = services.iter().map(row).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn row(service: &Service) -> ServiceRow {
    ServiceRow {
        name: service.name.to_string(),
        owner: service.owner.clone(),
        state: state_label(service),
        version: service
            .version
            .as_deref()
            .map(short_revision)
            .unwrap_or_else(|| "-".to_string()),
        images: service.images.len(),
        updates: service.history.len(),
    }
}

fn state_label(service: &Service) -> String {
    if service.descriptor.is_none() {
        "NO DESCRIPTOR".bright_black().to_string()
    } else if service.is_template() {
        "TEMPLATE".magenta().to_string()
    } else if service.version.is_some() {
        "DEPLOYED".green().to_string()
    } else {
        "PENDING".yellow().to_string()
    }
}

fn short_revision(revision: &str) -> String {
    revision.chars().take(12).collect()
}
