//! fleetd — the fleetgrid scheduling daemon.
//!
//! Single binary that assembles:
//! - Object store (redb, in-memory unless a data dir is configured)
//! - Watch pump (fleet and instance generators feeding the informer)
//! - Scheduler cache and its assumption sweep
//! - Decision loop
//!
//! # Usage
//!
//! ```text
//! fleetd run --config /etc/fleetgrid/fleetd.toml
//! fleetd check-config --config /etc/fleetgrid/fleetd.toml
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fleet_core::FleetdConfig;
use fleet_core::config::LogFormat;
use fleetd::{check, daemon};

const DEFAULT_FILTER: &str = "info,fleetd=debug,fleet_scheduler=debug";

#[derive(Parser)]
#[command(name = "fleetd", about = "fleetgrid scheduling daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted.
    Run {
        /// Path to fleetd.toml. Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate a configuration file and print the effective settings.
    CheckConfig {
        #[arg(long)]
        config: PathBuf,

        /// Print as JSON instead of TOML.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => {
            let config = load_config(config.as_deref())?;
            init_tracing(&config)?;
            daemon::run(config).await
        }
        Command::CheckConfig { config, json } => check_config(&config, json),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<FleetdConfig> {
    match path {
        Some(path) => FleetdConfig::from_file(path),
        None => Ok(FleetdConfig::default()),
    }
}

fn init_tracing(config: &FleetdConfig) -> anyhow::Result<()> {
    let directives = config
        .log
        .as_ref()
        .and_then(|l| l.filter.clone())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string());
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&directives))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format() {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

fn check_config(path: &Path, json: bool) -> anyhow::Result<()> {
    let report = check::check_config(path, json)?;
    if json {
        println!("{}", report.rendered);
    } else {
        print!("{}", report.rendered);
    }
    eprintln!("{}", report.summary);
    Ok(())
}
