// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! Validation rules that serde's typing alone does not enforce.

use anyhow::Result;
use log::{debug, warn};

use super::server::SUPPORTED_PROTOCOL;
use super::Config;

/// Check if a string is a valid IP address
///
/// Accepts any IPv4 or IPv6 literal, plus `localhost`.
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    matches!(addr, "localhost")
}

/// Validates the `server` section.
///
/// # Validation Rules
///
/// - **Port Range**: the listener port must be within 1-65535
/// - **Address Format**: a non-IP listener address only triggers a warning
/// - **Protocol**: only `TCP` is served
/// - **Persistence**: the save interval must be at least one second
/// - **TLS**: TLS parameters are accepted but ignored, with a warning
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");
    let server = &config.server;

    if server.listener_port == 0 {
        anyhow::bail!("Invalid listener port: {}", server.listener_port);
    }

    if !is_valid_ip_address(&server.listener_address) {
        warn!(
            "Potentially invalid listener address format: {}",
            server.listener_address
        );
    }

    if !server.protocol.eq_ignore_ascii_case(SUPPORTED_PROTOCOL) {
        anyhow::bail!(
            "Unsupported protocol '{}': only {} is supported",
            server.protocol,
            SUPPORTED_PROTOCOL
        );
    }

    if server.persistence.save_interval < 1 {
        anyhow::bail!(
            "Invalid persistence save interval: {}s (must be at least 1)",
            server.persistence.save_interval
        );
    }

    if server
        .tls_params
        .as_ref()
        .is_some_and(|tls| tls.is_configured())
    {
        warn!("TLS parameters are set but the listener only serves plain TCP, ignoring them");
    }

    Ok(())
}
