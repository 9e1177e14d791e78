// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the Modbus slave simulator
use anyhow::Result;
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;

use modbus_sim::config::Config;
use modbus_sim::daemon::{Daemon, ShutdownSignal};

/// Modbus TCP slave simulator with persistent registers
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (JSON or YAML)
    #[arg(
        short = 'f',
        long = "config-file",
        env = "CONFIG_FILE",
        default_value = "/app/modbus_server.json"
    )]
    config_file: PathBuf,

    /// Address the Modbus listener binds to
    #[arg(long)]
    listener_address: Option<String>,

    /// TCP port of the Modbus listener
    #[arg(long)]
    listener_port: Option<u16>,

    /// Register snapshot file, enables persistence
    #[arg(long)]
    persistence_file: Option<PathBuf>,

    /// Seconds between two register snapshots
    #[arg(long)]
    save_interval: Option<u64>,

    /// Validate a configuration file and exit
    #[arg(long, value_name = "PATH")]
    validate_config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Validate configuration file if --validate-config is set
    if let Some(validate_path) = args.validate_config {
        init_logger(args.verbose, args.quiet, log::LevelFilter::Info);
        let config = Config::from_file(&validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {:#}", err))?;
        let registry = config
            .build_registry()
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {}", err))?;
        println!(
            "Configuration file is valid: {} ({} device(s))",
            validate_path.display(),
            registry.len()
        );
        return Ok(());
    }

    let mut config = Config::from_file(&args.config_file)?;
    config.apply_args(
        args.listener_address.clone(),
        args.listener_port,
        args.persistence_file.clone(),
        args.save_interval,
    );
    config.validate()?;

    init_logger(args.verbose, args.quiet, config.server.logging.level_filter());
    info!(
        "Starting Modbus simulator v{}, configuration {:?}",
        env!("CARGO_PKG_VERSION"),
        args.config_file
    );

    let mut signals = ShutdownSignal::new()?;
    let mut daemon = Daemon::new();
    daemon.launch(&config).await?;

    // Wait for termination signal
    match signals.recv().await {
        Ok(name) => info!("Received {}, terminating daemon", name),
        Err(err) => error!("Error waiting for shutdown signal: {:#}", err),
    }
    daemon.shutdown();
    daemon.join().await?;

    Ok(())
}

/// Initialize logger with appropriate level based on verbose and quiet flags
fn init_logger(verbose: bool, quiet: bool, configured: log::LevelFilter) {
    let log_level = if quiet {
        log::LevelFilter::Off
    } else if verbose {
        log::LevelFilter::Debug
    } else {
        configured
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();
}
