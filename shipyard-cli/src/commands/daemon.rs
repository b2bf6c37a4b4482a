//! `shipyard daemon`: run the reconciler in the foreground or control it.

use anyhow::{Context, Result};
use clap::Subcommand;

use shipyard_daemon::paths::socket_path;
use shipyard_daemon::{request_status, request_stop, start_blocking, DaemonError, Settings};

use super::{home, print_json};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (scheduler + control socket).
    Start,
    /// Request graceful daemon shutdown over the control socket.
    Stop,
    /// Query daemon runtime status over the control socket.
    Status,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    match command {
        DaemonCommand::Start => {
            let settings = Settings::from_env().context("invalid daemon configuration")?;
            start_blocking(settings).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => {
            let home = home()?;
            match request_stop(&home) {
                Ok(()) => println!("daemon stop requested"),
                Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
                Err(err) => return Err(err).context("failed to stop daemon"),
            }
        }
        DaemonCommand::Status => {
            let home = home()?;
            match request_status(&home) {
                Ok(status) => print_json(&status)?,
                Err(DaemonError::DaemonNotRunning { .. }) => print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }))?,
                Err(err) => return Err(err).context("failed to query daemon status"),
            }
        }
    }

    Ok(())
}
