// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the Modbus simulator
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings. The configuration file is JSON (`.json` extension)
//! or YAML (anything else); YAML is converted to a JSON value first so both
//! formats go through the same deserialization.
//!
//! ## Configuration Structure
//!
//! - `server`: listener, logging and persistence settings
//! - `registers`: initial registers of device 1 (legacy shape)
//! - `version` + `devices`: initial registers per device id or id range
//!
//! ## Usage
//!
//! ```no_run
//! use modbus_sim::config::Config;
//!
//! let mut config = Config::from_file("/app/modbus_server.json").unwrap();
//! config.apply_args(None, Some(1502), None, None);
//! let registry = config.build_registry().unwrap();
//! println!("Serving {} device(s)", registry.len());
//! ```

pub mod builder;
pub mod registers;
pub mod server;
pub mod utils;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::registers::DeviceRegistry;

// Re-export all types for public API
pub use builder::ConfigBuilder;
pub use registers::{DeviceConfig, RawRegisters, RegistersConfig};
pub use server::{LoggingConfig, PersistenceConfig, ServerConfig, TlsParams};
pub use utils::{is_valid_ip_address, validate_specific_rules};

/// Root configuration structure.
///
/// Exactly one of `registers` (legacy) or `devices` (with `version: 2`) is
/// expected; [`ConfigBuilder`] decides which one is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Shape tag; omitted means the legacy single-device shape.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registers: Option<RegistersConfig>,

    /// Device id or `start-end` range to that device's registers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devices: Option<BTreeMap<String, DeviceConfig>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            version: None,
            registers: Some(RegistersConfig::default()),
            devices: None,
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    ///
    /// A missing file is an error: the server never starts on made-up registers.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            anyhow::bail!("Configuration file {:?} does not exist", path);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let json_value: serde_json::Value = if is_json {
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON configuration from {:?}", path))?
        } else {
            let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;
            serde_json::to_value(&yaml_value)
                .with_context(|| format!("Failed to convert YAML configuration {:?}", path))?
        };

        let config = Self::from_value(json_value)
            .with_context(|| format!("Invalid configuration in {:?}", path))?;
        debug!("Loaded configuration file {:?}", path);
        Ok(config)
    }

    /// Deserialize and validate an already parsed document.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let config: Config =
            serde_json::from_value(value).context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Check the rules serde cannot express, see [`validate_specific_rules`].
    pub fn validate(&self) -> Result<()> {
        validate_specific_rules(self)
    }

    /// Build the initial device registry from the register sections.
    pub fn build_registry(&self) -> Result<DeviceRegistry, ConfigError> {
        ConfigBuilder::build(self)
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only provided values override the file. Giving a persistence file
    /// also enables persistence.
    pub fn apply_args(
        &mut self,
        listener_address: Option<String>,
        listener_port: Option<u16>,
        persistence_file: Option<PathBuf>,
        save_interval: Option<u64>,
    ) {
        if let Some(address) = listener_address {
            debug!("Overriding listener address from command line: {}", address);
            self.server.listener_address = address;
        }
        if let Some(port) = listener_port {
            debug!("Overriding listener port from command line: {}", port);
            self.server.listener_port = port;
        }
        if let Some(file) = persistence_file {
            debug!("Overriding persistence file from command line: {:?}", file);
            self.server.persistence.file = file;
            self.server.persistence.enabled = true;
        }
        if let Some(interval) = save_interval {
            debug!("Overriding save interval from command line: {}s", interval);
            self.server.persistence.save_interval = interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(
            Some("127.0.0.1".to_string()),
            Some(1502),
            Some(PathBuf::from("/tmp/regs.json")),
            Some(5),
        );
        assert_eq!(config.server.listener_address, "127.0.0.1");
        assert_eq!(config.server.listener_port, 1502);
        assert!(config.server.persistence.enabled);
        assert_eq!(config.server.persistence.save_interval, 5);

        let mut untouched = Config::default();
        untouched.apply_args(None, None, None, None);
        assert_eq!(untouched, Config::default());
    }

    #[test]
    fn test_from_value_validates() {
        assert!(Config::from_value(json!({"server": {"protocol": "TLS"}})).is_err());
        assert!(Config::from_value(json!({"server": {"listenerPort": 70000}})).is_err());
        let config = Config::from_value(json!({"version": 2, "devices": {"1": {}}})).unwrap();
        assert_eq!(config.version, Some(2));
        assert!(config.registers.is_none());
    }
}
