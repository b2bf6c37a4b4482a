pub mod daemon;
pub mod hook;
pub mod services;
pub mod sync;
pub mod update;
pub mod worklog;

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

/// Daemon home, as the daemon itself resolves it.
pub fn home() -> Result<PathBuf> {
    shipyard_daemon::paths::home_from_env()
        .context("could not determine shipyard home; set SHIPYARD_HOME")
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render JSON")?
    );
    Ok(())
}
