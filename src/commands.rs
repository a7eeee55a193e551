//! Command execution.

use crate::config::Config;
use crate::Commands;
use colored::Colorize;
use serde::Serialize;
use sortlink_client::{ControlSession, EventFeed, FeedStop};
use std::time::Duration;

/// Rendered command result.
pub struct Report {
    pub output: String,
    /// False when the command ran but the result is a failure.
    pub ok: bool,
}

#[derive(Serialize)]
struct DirectoryReport<'a> {
    directory: &'a str,
    known_configuration: bool,
}

#[derive(Serialize)]
struct ApplyReport<'a> {
    name: &'a str,
    success: bool,
    reason: &'a str,
    directory: Option<&'a str>,
}

#[derive(Serialize)]
struct WatchReport {
    items_seen: u64,
    items_finalized: u64,
    expected: Option<u64>,
    stop: String,
}

/// Executes a command and returns the formatted output.
pub async fn execute(
    config: &Config,
    cmd: Commands,
    json: bool,
) -> Result<Report, Box<dyn std::error::Error>> {
    match cmd {
        Commands::DirectoryInfo => {
            let mut session = ControlSession::connect_with(
                config.control_connection(),
                config.session.session_config(),
            )
            .await?;
            let info = session.query_directory_info().await?;
            session.close().await?;

            let known = info.is_on_known_configuration();
            let output = if json {
                serde_json::to_string(&DirectoryReport {
                    directory: &info.directory,
                    known_configuration: known,
                })?
            } else if known {
                format!("Active directory: {}", info.directory.cyan())
            } else {
                "No active directory reported".yellow().to_string()
            };
            Ok(Report { output, ok: true })
        }

        Commands::Apply { name } => {
            let mut session = ControlSession::connect_with(
                config.control_connection(),
                config.session.session_config(),
            )
            .await?;
            let outcome = session.apply_configuration(&name).await?;
            session.close().await?;

            let directory = match &outcome {
                sortlink_client::SessionOutcome::AlreadyOnKnownConfiguration { directory } => {
                    Some(directory.as_str())
                }
                sortlink_client::SessionOutcome::KnownConfigurationUnreachable => None,
            };
            let output = if json {
                serde_json::to_string(&ApplyReport {
                    name: &name,
                    success: outcome.is_success(),
                    reason: outcome.reason(),
                    directory,
                })?
            } else if outcome.is_success() {
                format!(
                    "{} {} ({})",
                    "Passed".green(),
                    name.cyan(),
                    outcome.reason()
                )
            } else {
                format!("{} {} ({})", "Failed".red(), name.cyan(), outcome.reason())
            };
            Ok(Report {
                output,
                ok: outcome.is_success(),
            })
        }

        Commands::Watch { seconds, expect } => {
            let feed = EventFeed::connect(config.feed_connection()).await?;
            let counters = feed.counters();
            let mut handle = feed.spawn();

            if seconds.is_none() {
                eprintln!("{}", "Press Ctrl+C to stop...".dimmed());
            }
            let deadline = async {
                match seconds {
                    Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let stop = tokio::select! {
                stop = handle.join() => stop,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!("\n{}", "Stopping feed...".dimmed());
                    handle.stop().await
                }
                _ = deadline => handle.stop().await,
            };

            let counts = counters.snapshot();
            let ok = expect.map_or(true, |n| counts.items_finalized >= n);
            let output = if json {
                serde_json::to_string(&WatchReport {
                    items_seen: counts.items_seen,
                    items_finalized: counts.items_finalized,
                    expected: expect,
                    stop: format!("{:?}", stop),
                })?
            } else {
                let mut out = format!(
                    "Items seen: {}\nItems finalized: {}",
                    counts.items_seen.to_string().cyan(),
                    counts.items_finalized.to_string().cyan()
                );
                if let FeedStop::Failed(reason) = &stop {
                    out.push_str(&format!("\n{}: {}", "Feed ended early".yellow(), reason));
                }
                if let Some(n) = expect {
                    let verdict = if ok { "Passed".green() } else { "Insufficient".red() };
                    out.push_str(&format!("\n{} (expected at least {})", verdict, n));
                }
                out
            };
            Ok(Report { output, ok })
        }
    }
}
