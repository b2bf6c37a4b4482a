//! `shipyard sync`: queue a reconcile pass.

use anyhow::{Context, Result};
use clap::Args;

use shipyard_daemon::request_sync;

use super::home;

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Reason recorded in the daemon log (default: manual).
    #[arg(long)]
    pub reason: Option<String>,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let reply = request_sync(&home, self.reason).context("failed to request sync")?;
        let reason = reply["reason"].as_str().unwrap_or("manual");
        println!("sync scheduled ({reason})");
        Ok(())
    }
}
