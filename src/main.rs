//! sortlink - sorter appliance control and event-feed tool
//!
//! Queries directory state, requests configuration changes, and counts
//! finalized items on the event feed.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sortlink")]
#[command(about = "Control and event-feed client for the sorter appliance")]
#[command(version)]
pub struct Cli {
    /// Control endpoint host
    #[arg(long, env = "SORTLINK_CONTROL_HOST")]
    control_host: Option<String>,

    /// Control endpoint port
    #[arg(long, env = "SORTLINK_CONTROL_PORT")]
    control_port: Option<u16>,

    /// Event feed host
    #[arg(long, env = "SORTLINK_FEED_HOST")]
    feed_host: Option<String>,

    /// Event feed port
    #[arg(long, env = "SORTLINK_FEED_PORT")]
    feed_port: Option<u16>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Query the active directory
    DirectoryInfo,

    /// Request a configuration change and wait for the verdict
    Apply {
        /// Configuration name (at most 255 bytes)
        name: String,
    },

    /// Count processed items on the event feed
    Watch {
        /// Stop after this many seconds (default: until Ctrl+C or feed close)
        #[arg(short, long)]
        seconds: Option<u64>,

        /// Fail unless at least this many items were finalized
        #[arg(short, long)]
        expect: Option<u64>,
    },
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(ref host) = self.control_host {
            config.control.host = host.clone();
        }
        if let Some(port) = self.control_port {
            config.control.port = port;
        }
        if let Some(ref host) = self.feed_host {
            config.feed.host = host.clone();
        }
        if let Some(port) = self.feed_port {
            config.feed.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };
    cli.apply_overrides(&mut config);

    tracing::debug!(
        "control={}:{} feed={}:{}",
        config.control.host,
        config.control.port,
        config.feed.host,
        config.feed.port
    );

    match commands::execute(&config, cli.command, cli.json).await {
        Ok(report) => {
            println!("{}", report.output);
            if !report.ok {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}
