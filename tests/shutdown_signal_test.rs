// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! SIGTERM handling. Kept in its own test binary because the signal is sent
//! to the whole test process.

#![cfg(unix)]

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use modbus_sim::config::Config;
use modbus_sim::daemon::{Daemon, ShutdownSignal};
use modbus_sim::registers::{RegisterKind, RegisterValue};
use serde_json::json;
use tempfile::tempdir;
use tokio::time;

#[tokio::test]
async fn test_sigterm_triggers_final_flush() -> Result<()> {
    let temp_dir = tempdir()?;
    let snapshot_path = temp_dir.path().join("registers.json");

    let mut config = Config::from_value(json!({
        "registers": {"zeroMode": true, "holdingRegister": {"9": "0xAA00"}}
    }))?;
    config.apply_args(
        Some("127.0.0.1".to_string()),
        Some(0),
        Some(snapshot_path.clone()),
        Some(3600),
    );

    let mut signals = ShutdownSignal::new()?;
    let mut daemon = Daemon::new();
    daemon.launch(&config).await?;
    daemon
        .registry()
        .context("registry not built")?
        .resolve(1)?
        .write(RegisterKind::HoldingRegister, 9, RegisterValue::Word(0x0BAD))?;

    let status = Command::new("kill")
        .arg("-TERM")
        .arg(std::process::id().to_string())
        .status()?;
    assert!(status.success());

    let name = time::timeout(Duration::from_secs(5), signals.recv()).await??;
    assert_eq!(name, "SIGTERM");

    daemon.shutdown();
    daemon.join().await?;

    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&snapshot_path)?)?;
    assert_eq!(value["holding_registers"]["9"], 0x0BAD);
    Ok(())
}
