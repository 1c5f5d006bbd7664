//! Entitle command-line tool
//!
//! Inspects and changes the license state of this installation.
//!
//! Usage:
//!   entitle status
//!   entitle activate ABC-123
//!   entitle --data-dir /tmp/entitle remove

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use entitle_cli::{StatusReport, default_data_dir, load_config, open_store};
use entitle_license::{LicenseController, RevalidationOutcome};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "entitle")]
#[command(about = "Device-bound license activation and trial management")]
struct Args {
    /// Directory holding the license database
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Path to a JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print the status as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the current license state
    Status,
    /// Start the trial if it has not been started
    StartTrial,
    /// Activate a license key on this device
    Activate {
        /// The license key
        key: String,
    },
    /// Remove the license from this device
    Remove,
    /// Re-confirm the stored license with the server
    Revalidate,
    /// Print this installation's device id
    DeviceId,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let data_dir = args.data_dir.clone().unwrap_or_else(default_data_dir);
    debug!("Using data directory {}", data_dir.display());

    let config = load_config(args.config.as_deref(), &data_dir)?;
    let store = open_store(&data_dir)?;
    let controller =
        LicenseController::open(store, config).context("creating license client")?;

    let outcome = match args.command {
        Command::Status => {
            controller.machine().refresh();
            Ok(())
        }
        Command::StartTrial => controller
            .start_trial()
            .map(drop)
            .context("starting trial"),
        Command::Activate { key } => {
            let result = controller.submit_key(&key).await;
            if let Ok(state) = &result {
                info!("Activated: {state}");
            }
            result.map(drop).context("activating license")
        }
        Command::Remove => controller
            .remove_license()
            .map(drop)
            .context("removing license"),
        Command::Revalidate => match controller.revalidate().await {
            Ok(RevalidationOutcome::NotLicensed) => {
                println!("No license to revalidate.");
                Ok(())
            }
            Ok(outcome) => {
                info!("Revalidation: {outcome:?}");
                Ok(())
            }
            Err(e) => Err(e).context("revalidating license"),
        },
        Command::DeviceId => {
            println!("{}", controller.machine().device_id());
            return Ok(());
        }
    };

    let report = StatusReport::capture(&controller);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    outcome
}
