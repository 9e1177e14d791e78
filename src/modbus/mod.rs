// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! This module adapts the register store to the `tokio-modbus` server: it
//! maps function codes to register banks and register outcomes to Modbus
//! exception codes.
//!
//! ## Key Components
//!
//! - `RegisterService`: the `tokio_modbus::server::Service` implementation,
//!   one clone per TCP connection, all sharing the same registry.
//!
//! ## Usage
//!
//! The service is normally started by the daemon:
//!
//! ```no_run
//! use modbus_sim::config::Config;
//! use modbus_sim::daemon::Daemon;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::from_file("/app/modbus_server.json")?;
//! let mut daemon = Daemon::new();
//! daemon.launch(&config).await?;
//! # Ok(())
//! # }
//! ```

pub mod modbus_server;
pub use modbus_server::RegisterService;
