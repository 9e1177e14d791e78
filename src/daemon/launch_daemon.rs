// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Management Module
//!
//! Startup order: the registry is built from the configuration, the snapshot
//! (if any) is loaded over it, the auto-save ticker starts, then the Modbus
//! listener accepts connections. Shutdown runs the other way round: the
//! listener stops first, then the persistence engine flushes one last time.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};

use crate::config::Config;
use crate::modbus::RegisterService;
use crate::persistence::{EngineState, PersistenceEngine};
use crate::registers::DeviceRegistry;

/// Represents a daemon task manager that coordinates the background services
///
/// # Fields
///
/// * `tasks` - Handles of running tasks, awaited by [`Daemon::join`]
/// * `running` - Flag shared with the tasks to coordinate shutdown
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    registry: Option<Arc<DeviceRegistry>>,
    persistence: Option<PersistenceEngine>,
    local_addr: Option<SocketAddr>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    /// Create a new daemon instance
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            registry: None,
            persistence: None,
            local_addr: None,
        }
    }

    /// Build the registers and start every service
    ///
    /// # Errors
    ///
    /// This function can fail if:
    /// * The register configuration is malformed
    /// * The listener fails to bind to the configured address/port
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        let registry = Arc::new(
            config
                .build_registry()
                .context("Invalid register configuration")?,
        );

        let mut persistence =
            PersistenceEngine::from_config(registry.clone(), &config.server.persistence);
        persistence.load();
        persistence.start();
        self.persistence = Some(persistence);
        self.registry = Some(registry.clone());

        self.start_modbus_server(config, registry).await?;
        Ok(())
    }

    /// Bind the listener and spawn the Modbus TCP server
    async fn start_modbus_server(
        &mut self,
        config: &Config,
        registry: Arc<DeviceRegistry>,
    ) -> Result<()> {
        let address = config.server.listener_address.clone();
        let port = config.server.listener_port;
        info!("Starting modbus server on {}:{}", address, port);

        let listener = TcpListener::bind((address.as_str(), port))
            .await
            .with_context(|| format!("Failed to bind Modbus listener on {}:{}", address, port))?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        let running = self.running.clone();
        let service = RegisterService::new(registry);

        let task = tokio::spawn(async move {
            let server = Server::new(listener);

            // Every connection gets a clone of the service; clones share the registry.
            let on_connected = move |stream, socket_addr| {
                let service = service.clone();
                async move {
                    accept_tcp_connection(stream, socket_addr, move |socket_addr| {
                        debug!("Modbus client connected from {}", socket_addr);
                        Ok(Some(service.clone()))
                    })
                }
            };

            let on_process_error = |err| {
                error!("Modbus server error: {err}");
            };

            let server_handle = tokio::spawn(async move {
                if let Err(e) = server.serve(&on_connected, on_process_error).await {
                    error!("Modbus server error: {}", e);
                }
            });

            while running.load(Ordering::SeqCst) {
                time::sleep(Duration::from_millis(200)).await;
            }

            info!("Shutting down Modbus server...");
            server_handle.abort();

            match time::timeout(Duration::from_secs(5), server_handle).await {
                Ok(_) => info!("Modbus server shut down successfully"),
                Err(_) => warn!("Modbus server shutdown timed out, forcing termination"),
            }

            Ok(())
        });

        self.tasks.push(task);
        info!("Modbus server listening on {}", local_addr);
        Ok(())
    }

    /// Address the Modbus listener is bound to, once launched.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn registry(&self) -> Option<&Arc<DeviceRegistry>> {
        self.registry.as_ref()
    }

    pub fn persistence_state(&self) -> Option<EngineState> {
        self.persistence.as_ref().map(PersistenceEngine::state)
    }

    /// Stop accepting Modbus requests
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for all tasks to complete, then write the final snapshot
    pub async fn join(mut self) -> Result<()> {
        for task in self.tasks.drain(..) {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Task failed: {:#}", e),
                Err(e) => error!("Task panicked: {}", e),
            }
        }

        if let Some(mut persistence) = self.persistence.take() {
            persistence
                .stop_and_flush()
                .await
                .context("Final register flush failed")?;
        }
        Ok(())
    }
}
