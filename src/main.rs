//! Binary entrypoint for the meshpos CLI.
//!
//! Commands:
//! - `start [--port <path>]` - log positions from a device (default when no command is given)
//! - `init` - write a starter `config.toml`
//! - `status` - print the positions currently stored in the output file
use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info};

use meshpos::config::Config;
use meshpos::ledger::PositionLedger;
use meshpos::logutil::{escape_log, init_logging};

#[derive(Parser)]
#[command(name = "meshpos")]
#[command(about = "Log the last known GPS position of every Meshtastic node to JSON")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path (defaults are used when it does not exist)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the device and log position reports
    Start {
        /// Meshtastic device port (e.g., /dev/ttyUSB0); overrides the config file
        #[arg(short, long)]
        port: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Show the positions stored in the output file
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Start { port: None }) {
        Commands::Init => {
            init_logging(None, cli.verbose);
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Status => {
            let config = Config::load_or_default(&cli.config).await?;
            init_logging(Some(&config), cli.verbose);
            show_status(&config)?;
        }
        Commands::Start { port } => {
            let config = Config::load_or_default(&cli.config).await?;
            init_logging(Some(&config), cli.verbose);
            let code = start(config, port).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
    }
    Ok(())
}

fn show_status(config: &Config) -> Result<()> {
    let ledger = PositionLedger::load(&config.storage.output_file)?;
    println!(
        "{} node positions in {}",
        ledger.len(),
        ledger.path().display()
    );
    for (node, rec) in ledger.iter() {
        println!(
            "{:>10}  {:<24} lat={:.6} lon={:.6} alt={}m at {}",
            node,
            escape_log(&rec.name),
            rec.latitude,
            rec.longitude,
            rec.altitude,
            rec.timestamp
        );
    }
    Ok(())
}

#[cfg(not(all(feature = "serial", feature = "meshtastic-proto")))]
async fn start(_config: Config, _port: Option<String>) -> Result<i32> {
    error!("Logging from a device requires the 'serial' and 'meshtastic-proto' features");
    Ok(2)
}

#[cfg(all(feature = "serial", feature = "meshtastic-proto"))]
async fn start(config: Config, port: Option<String>) -> Result<i32> {
    use meshpos::handler::PositionHandler;
    use meshpos::logger::{PositionLogger, StopReason};
    use meshpos::meshtastic::link::{detect_port, RadioLink};
    use meshpos::nodes::NodeTable;
    use std::time::Duration;
    use tokio::sync::mpsc;

    info!("Meshtastic position logger v{} starting", env!("CARGO_PKG_VERSION"));

    let ledger = match PositionLedger::load(&config.storage.output_file) {
        Ok(ledger) => ledger,
        Err(e) => {
            error!("{}", e);
            error!("Fix or move the file aside, then restart.");
            return Ok(1);
        }
    };
    if !ledger.is_empty() {
        info!("Loaded {} existing positions", ledger.len());
    }

    let port_name = match port {
        Some(p) => p,
        None if config.meshtastic.auto_detect() => match detect_port() {
            Ok(p) => {
                info!("Auto-detected device port {}", p);
                p
            }
            Err(e) => {
                connection_failed(&e);
                return Ok(1);
            }
        },
        None => config.meshtastic.port.clone(),
    };

    let nodes = NodeTable::new();
    let link = match RadioLink::open(
        &port_name,
        config.meshtastic.baud_rate,
        nodes.clone(),
        Duration::from_secs(config.meshtastic.heartbeat_interval_secs),
    )
    .await
    {
        Ok(link) => link,
        Err(e) => {
            connection_failed(&e);
            return Ok(1);
        }
    };

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let reader = link.spawn(event_tx);
    let logger = PositionLogger::new(PositionHandler::new(ledger), nodes);

    info!("Press Ctrl+C to stop logging");
    let (run_result, link_result) = logger
        .run_and_close(
            event_rx,
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
            reader.close(),
        )
        .await;
    if let Err(e) = &link_result {
        error!("Device connection lost: {}", e);
    }
    let reason = run_result?;

    match (reason, link_result) {
        (_, Err(_)) | (StopReason::SourceClosed, Ok(())) => Ok(1),
        (StopReason::Shutdown, Ok(())) => Ok(0),
    }
}

#[cfg(all(feature = "serial", feature = "meshtastic-proto"))]
fn connection_failed(e: &anyhow::Error) {
    error!("Failed to connect to device: {}", e);
    error!("Make sure:");
    error!("  1. Device is connected via USB");
    error!("  2. No other program is using the device");
    error!("  3. You have permission to access serial ports");
}
