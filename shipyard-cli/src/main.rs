//! Shipyard: service reconciliation daemon and its control client.
//!
//! # Usage
//!
//! ```text
//! shipyard daemon start|stop|status
//! shipyard sync [--reason <text>]
//! shipyard hook [--file <payload.json>]
//! shipyard events [--json]
//! shipyard services [--json]
//! shipyard worklog [--json] [--tail <n>] [--watch]
//! shipyard update <service> --artifact <ref> [--resource <name>:<type>]...
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand,
    hook::{EventsArgs, HookArgs},
    services::ServicesArgs,
    sync::SyncArgs,
    update::UpdateArgs,
    worklog::WorklogArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "shipyard",
    version,
    about = "Keep deployed services in step with an organization's repositories",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run or control the reconciliation daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Queue a sync against the repository listing.
    Sync(SyncArgs),

    /// Forward a webhook payload to the daemon.
    Hook(HookArgs),

    /// Show webhook payloads the daemon has received.
    Events(EventsArgs),

    /// List registered services.
    Services(ServicesArgs),

    /// Show commands and HTTP calls the daemon has made.
    Worklog(WorklogArgs),

    /// Append an artifact declaration to a service's history.
    Update(UpdateArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Sync(args) => args.run(),
        Commands::Hook(args) => args.run(),
        Commands::Events(args) => args.run(),
        Commands::Services(args) => args.run(),
        Commands::Worklog(args) => args.run(),
        Commands::Update(args) => args.run(),
    }
}
