// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Process termination signals that trigger a graceful shutdown.

use anyhow::{Context, Result};
use tokio::signal;

/// Waits for Ctrl-C, and for SIGTERM on Unix (`docker stop`, `kill`).
///
/// The SIGTERM handler is installed by [`ShutdownSignal::new`], so a signal
/// arriving before [`ShutdownSignal::recv`] is polled is not lost and does
/// not terminate the process.
pub struct ShutdownSignal {
    #[cfg(unix)]
    terminate: signal::unix::Signal,
}

impl ShutdownSignal {
    /// Install the handlers. Must be called from within a tokio runtime.
    pub fn new() -> Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            terminate: signal::unix::signal(signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?,
        })
    }

    /// Resolve with the name of the first signal received.
    pub async fn recv(&mut self) -> Result<&'static str> {
        #[cfg(unix)]
        {
            tokio::select! {
                result = signal::ctrl_c() => {
                    result.context("Failed to listen for Ctrl-C")?;
                    Ok("SIGINT")
                }
                _ = self.terminate.recv() => Ok("SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            Ok("Ctrl-C")
        }
    }
}
