// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Module
//!
//! Runs the simulator: the Modbus listener and the register persistence
//! engine, with a graceful shutdown that flushes registers to disk.
//!
//! ## Usage
//!
//! ```no_run
//! use modbus_sim::{config::Config, daemon::{Daemon, ShutdownSignal}};
//!
//! async fn run() -> anyhow::Result<()> {
//!     let config = Config::from_file("/app/modbus_server.json")?;
//!
//!     let mut signals = ShutdownSignal::new()?;
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config).await?;
//!
//!     // Wait for Ctrl+C or SIGTERM
//!     signals.recv().await?;
//!
//!     daemon.shutdown();
//!     daemon.join().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod launch_daemon;
pub mod shutdown_signal;
pub use launch_daemon::Daemon;
pub use shutdown_signal::ShutdownSignal;
