// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Server configuration section
//!
//! This module defines the `server` section of the configuration file:
//! listener binding, logging level and register persistence.

use std::path::PathBuf;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

/// The only transport this server listens on.
pub const SUPPORTED_PROTOCOL: &str = "TCP";

/// Settings for the Modbus listener and the process around it.
///
/// # Example
///
/// ```
/// use modbus_sim::config::ServerConfig;
///
/// let server: ServerConfig = serde_json::from_str(r#"{"listenerPort": 1502}"#).unwrap();
/// assert_eq!(server.listener_address, "0.0.0.0");
/// assert_eq!(server.listener_port, 1502);
/// assert!(!server.persistence.enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Address the Modbus listener binds to (default `0.0.0.0`).
    #[serde(default = "default_listener_address")]
    pub listener_address: String,

    /// TCP port of the Modbus listener (default 5020).
    #[serde(default = "default_listener_port")]
    pub listener_port: u16,

    /// Transport name. Only `TCP` is served.
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// TLS material. Accepted for compatibility, not used by the TCP listener.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_params: Option<TlsParams>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listener_address: default_listener_address(),
            listener_port: default_listener_port(),
            protocol: default_protocol(),
            tls_params: None,
            logging: LoggingConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsParams {
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub certificate: Option<String>,
}

impl TlsParams {
    pub fn is_configured(&self) -> bool {
        let set = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());
        set(&self.private_key) || set(&self.certificate)
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// One of `debug`, `info`, `warn`, `error` (case-insensitive).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Line format of other deployments of this configuration; env_logger's
    /// own format is used instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl LoggingConfig {
    /// The `log` filter for `log_level`. Unknown names fall back to info.
    pub fn level_filter(&self) -> LevelFilter {
        match self.log_level.to_ascii_lowercase().as_str() {
            "debug" => LevelFilter::Debug,
            "info" => LevelFilter::Info,
            "warn" | "warning" => LevelFilter::Warn,
            "error" => LevelFilter::Error,
            _ => LevelFilter::Info,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            format: None,
        }
    }
}

/// Register snapshot settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceConfig {
    /// When false no snapshot is ever read or written.
    #[serde(default)]
    pub enabled: bool,

    /// Snapshot file path (default `/data/registers.json`).
    #[serde(default = "default_persistence_file")]
    pub file: PathBuf,

    /// Seconds between two flush attempts (default 30).
    #[serde(default = "default_save_interval")]
    pub save_interval: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: default_persistence_file(),
            save_interval: default_save_interval(),
        }
    }
}

fn default_listener_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listener_port() -> u16 {
    5020
}

fn default_protocol() -> String {
    SUPPORTED_PROTOCOL.to_string()
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_persistence_file() -> PathBuf {
    PathBuf::from("/data/registers.json")
}

fn default_save_interval() -> u64 {
    30
}
