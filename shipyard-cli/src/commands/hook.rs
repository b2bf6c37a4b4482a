//! `shipyard hook` and `shipyard events`: webhook intake and its history.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use shipyard_daemon::{request_events, request_hook, HookEvent};

use super::{home, print_json};

#[derive(Args, Debug)]
pub struct HookArgs {
    /// JSON payload file; read from stdin when omitted.
    #[arg(long)]
    pub file: Option<PathBuf>,
}

impl HookArgs {
    pub fn run(self) -> Result<()> {
        let raw = match &self.file {
            Some(path) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            None => {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("failed to read payload from stdin")?;
                buf
            }
        };
        let payload: Value = if raw.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&raw).context("webhook payload is not valid JSON")?
        };

        let home = home()?;
        request_hook(&home, payload).context("failed to deliver webhook")?;
        println!("webhook recorded, sync scheduled");
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct EventsArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl EventsArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let data = request_events(&home).context("failed to list webhook events")?;
        if self.json {
            return print_json(&data);
        }

        let events: Vec<HookEvent> =
            serde_json::from_value(data).context("unexpected events payload")?;
        if events.is_empty() {
            println!("No webhook events received.");
            return Ok(());
        }
        for event in events {
            println!(
                "{} {}",
                event.received_at.to_rfc3339().bright_black(),
                event.payload
            );
        }
        Ok(())
    }
}
