//! `shipyard worklog`: every command and HTTP call the daemon made.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use shipyard_daemon::{request_worklog, watch};
use shipyard_exec::CommandResult;

use super::home;

#[derive(Args, Debug)]
pub struct WorklogArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,

    /// Only the last N entries.
    #[arg(long)]
    pub tail: Option<usize>,

    /// Keep printing new entries as the daemon records them.
    #[arg(long)]
    pub watch: bool,
}

impl WorklogArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let entries = request_worklog(&home).context("failed to fetch work log")?;
        let start = self
            .tail
            .map(|n| entries.len().saturating_sub(n))
            .unwrap_or(0);
        self.print(&entries[start..])?;
        if !self.watch {
            return Ok(());
        }

        let mut printed = entries.len();
        let mut failure = None;
        watch(&home, |snapshot| {
            let fresh = snapshot.get(printed..).unwrap_or_default();
            if let Err(err) = self.print(fresh) {
                failure = Some(err);
                return false;
            }
            printed = printed.max(snapshot.len());
            true
        })
        .context("work log stream ended with error")?;
        failure.map_or(Ok(()), Err)
    }

    fn print(&self, entries: &[CommandResult]) -> Result<()> {
        for entry in entries {
            if self.json {
                println!(
                    "{}",
                    serde_json::to_string(entry).context("failed to render JSON")?
                );
            } else {
                println!("{}", format_entry(entry));
            }
        }
        Ok(())
    }
}

fn format_entry(entry: &CommandResult) -> String {
    let marker = if entry.succeeded() {
        format!("{:>4}", "ok").green().bold()
    } else {
        format!("{:>4}", entry.exit_code).red().bold()
    };
    let elapsed = entry.ended_at - entry.started_at;
    let mut line = format!(
        "{} {} {} {}",
        entry.started_at.format("%H:%M:%S").to_string().bright_black(),
        marker,
        entry.command_line(),
        format!("({}ms)", elapsed.num_milliseconds()).bright_black(),
    );
    if !entry.succeeded() {
        if let Some(first) = entry.combined_output().lines().find(|l| !l.trim().is_empty()) {
            line.push_str(&format!("\n      {}", first.trim()));
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn entry(exit_code: i32, stderr: &str) -> CommandResult {
        let started_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        CommandResult {
            command: vec!["git".into(), "pull".into()],
            cwd: None,
            exit_code,
            output: String::new(),
            stderr: stderr.to_string(),
            started_at,
            ended_at: started_at + Duration::milliseconds(250),
        }
    }

    #[test]
    fn successful_entry_is_one_line() {
        colored::control::set_override(false);
        let line = format_entry(&entry(0, ""));
        assert_eq!(line, "12:00:00   ok git pull (250ms)");
    }

    #[test]
    fn failed_entry_shows_first_output_line() {
        colored::control::set_override(false);
        let line = format_entry(&entry(128, "\nfatal: not a git repository\nmore"));
        assert!(line.contains(" 128 git pull"), "{line}");
        assert!(line.ends_with("\n      fatal: not a git repository"), "{line}");
    }
}
