// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Periodic, crash-safe snapshotting of a device registry
//!
//! The engine moves through `Disabled`, `Loading`, `Idle`, `Flushing` and
//! `ShuttingDown`. A disabled engine never touches the filesystem.
//!
//! - `load()` runs once before serving; a readable snapshot replaces the
//!   configured register values, an unreadable one is logged and ignored.
//! - `start()` spawns a ticker; each tick flushes only if a store is dirty.
//! - `stop_and_flush()` stops the ticker, lets an in-flight flush finish and
//!   then flushes unconditionally.
//!
//! Register stores are copied under their own lock, one at a time; the
//! serialization and file I/O happen after every lock has been released.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::snapshot::{JsonSnapshotStorage, Snapshot, SnapshotStorage};
use crate::config::PersistenceConfig;
use crate::registers::DeviceRegistry;

/// Default time between two flush attempts.
pub const DEFAULT_SAVE_INTERVAL: Duration = Duration::from_secs(30);

/// Lifecycle state of a [`PersistenceEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Disabled,
    Loading,
    Idle,
    Flushing,
    ShuttingDown,
}

/// What `load()` did to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Disabled,
    /// No snapshot stored yet; configured values stay.
    NoSnapshot,
    /// These devices now hold the snapshot contents.
    Restored(Vec<u8>),
    /// The snapshot could not be read; configured values stay.
    Failed,
}

/// What a flush attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Disabled,
    /// Nothing changed since the last flush.
    Skipped,
    /// A snapshot of this many devices replaced the previous one.
    Written { devices: usize },
}

struct Shared {
    registry: Arc<DeviceRegistry>,
    storage: Option<Box<dyn SnapshotStorage>>,
    state: Mutex<EngineState>,
    // Serializes flushes coming from the ticker, shutdown and direct callers.
    flush_lock: Mutex<()>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: EngineState) {
        let mut state = self.state();
        if *state != EngineState::Disabled {
            *state = next;
        }
    }

    fn flush(&self, force: bool) -> Result<FlushOutcome> {
        let Some(storage) = self.storage.as_ref() else {
            return Ok(FlushOutcome::Disabled);
        };
        let _flushing = self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if !force && !self.registry.any_dirty() {
            debug!("No register changes since last save, skipping flush");
            return Ok(FlushOutcome::Skipped);
        }

        let previous = *self.state();
        self.set_state(EngineState::Flushing);

        let (snapshot, captures) = Snapshot::capture(&self.registry);
        let result = storage.save(&snapshot);

        {
            let mut state = self.state();
            if *state == EngineState::Flushing {
                *state = previous;
            }
        }
        match result {
            Ok(()) => {
                for (id, capture) in &captures {
                    if let Ok(store) = self.registry.resolve(*id) {
                        store.mark_persisted(capture);
                    }
                }
                debug!(
                    "Register data of {} device(s) saved to {:?}",
                    captures.len(),
                    storage.location()
                );
                Ok(FlushOutcome::Written {
                    devices: captures.len(),
                })
            }
            Err(e) => {
                for store in self.registry.stores() {
                    let dirty = store.dirty_kinds();
                    if !dirty.is_empty() {
                        error!(
                            "Unsaved changes kept in memory for device {}: {:?}",
                            store.device_id(),
                            dirty
                        );
                    }
                }
                error!(
                    "Failed to save register data to {:?}: {:#}",
                    storage.location(),
                    e
                );
                Err(e)
            }
        }
    }
}

/// Owns durable snapshotting of a [`DeviceRegistry`].
pub struct PersistenceEngine {
    shared: Arc<Shared>,
    save_interval: Duration,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl PersistenceEngine {
    /// An engine that never performs any file I/O.
    pub fn disabled(registry: Arc<DeviceRegistry>) -> Self {
        Self::build(registry, None, DEFAULT_SAVE_INTERVAL, EngineState::Disabled)
    }

    /// An engine writing snapshots to `storage` every `save_interval`.
    ///
    /// A zero interval falls back to [`DEFAULT_SAVE_INTERVAL`].
    pub fn new(
        registry: Arc<DeviceRegistry>,
        storage: Box<dyn SnapshotStorage>,
        save_interval: Duration,
    ) -> Self {
        let save_interval = if save_interval.is_zero() {
            warn!(
                "Save interval must be positive, using {:?}",
                DEFAULT_SAVE_INTERVAL
            );
            DEFAULT_SAVE_INTERVAL
        } else {
            save_interval
        };
        Self::build(registry, Some(storage), save_interval, EngineState::Idle)
    }

    /// Build the engine described by the `persistence` configuration section.
    pub fn from_config(registry: Arc<DeviceRegistry>, config: &PersistenceConfig) -> Self {
        if !config.enabled {
            info!("Register persistence disabled");
            return Self::disabled(registry);
        }
        let storage = JsonSnapshotStorage::new(&config.file);
        if let Err(e) = storage.ensure_parent_dir() {
            warn!("{:#}", e);
        }
        info!(
            "Register persistence enabled: {:?} every {}s",
            config.file, config.save_interval
        );
        Self::new(
            registry,
            Box::new(storage),
            Duration::from_secs(config.save_interval),
        )
    }

    fn build(
        registry: Arc<DeviceRegistry>,
        storage: Option<Box<dyn SnapshotStorage>>,
        save_interval: Duration,
        state: EngineState,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                storage,
                state: Mutex::new(state),
                flush_lock: Mutex::new(()),
            }),
            save_interval,
            stop_tx: None,
            task: None,
        }
    }

    pub fn state(&self) -> EngineState {
        *self.shared.state()
    }

    pub fn save_interval(&self) -> Duration {
        self.save_interval
    }

    pub fn location(&self) -> Option<PathBuf> {
        self.shared.storage.as_ref().map(|storage| storage.location())
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Rehydrate the registry from the stored snapshot, if any.
    ///
    /// Never fails: an unreadable snapshot leaves the configured values in place.
    pub fn load(&self) -> LoadOutcome {
        let Some(storage) = self.shared.storage.as_ref() else {
            return LoadOutcome::Disabled;
        };
        self.shared.set_state(EngineState::Loading);

        let outcome = match storage.load() {
            Ok(None) => LoadOutcome::NoSnapshot,
            Ok(Some(snapshot)) => match snapshot.apply(&self.shared.registry) {
                Ok(ids) => {
                    info!("Restored register values of device(s) {:?}", ids);
                    LoadOutcome::Restored(ids)
                }
                Err(e) => {
                    error!(
                        "Snapshot {:?} does not fit the configured devices: {}",
                        storage.location(),
                        e
                    );
                    LoadOutcome::Failed
                }
            },
            Err(e) => {
                error!(
                    "Failed to load persistence file {:?}, using initial configuration: {:#}",
                    storage.location(),
                    e
                );
                LoadOutcome::Failed
            }
        };

        self.shared.set_state(EngineState::Idle);
        outcome
    }

    /// Write a snapshot now.
    ///
    /// Without `force` nothing is written unless some store is dirty. On error
    /// the dirty flags are left set so the next attempt retries.
    pub fn flush(&self, force: bool) -> Result<FlushOutcome> {
        self.shared.flush(force)
    }

    /// Spawn the periodic save task on the current tokio runtime.
    pub fn start(&mut self) {
        if self.shared.storage.is_none() {
            debug!("Persistence disabled, no auto-save task started");
            return;
        }
        if self.task.is_some() {
            warn!("Auto-save task already running");
            return;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let shared = self.shared.clone();
        let period = self.save_interval;

        let task = tokio::spawn(async move {
            info!("Auto-save task started (interval: {:?})", period);
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let shared = shared.clone();
                        match tokio::task::spawn_blocking(move || shared.flush(false)).await {
                            Ok(Ok(_)) => {}
                            Ok(Err(_)) => debug!("Flush failed, retrying at next tick"),
                            Err(e) => error!("Flush task panicked: {}", e),
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            info!("Auto-save task stopped");
        });

        self.stop_tx = Some(stop_tx);
        self.task = Some(task);
    }

    /// Stop the periodic task and write one final snapshot.
    pub async fn stop_and_flush(&mut self) -> Result<FlushOutcome> {
        if self.shared.storage.is_none() {
            return Ok(FlushOutcome::Disabled);
        }
        info!("Stopping auto-save task...");
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Auto-save task panicked: {}", e);
            }
        }
        self.shared.set_state(EngineState::ShuttingDown);

        info!("Performing final save before shutdown...");
        let shared = self.shared.clone();
        match tokio::task::spawn_blocking(move || shared.flush(true)).await {
            Ok(outcome) => outcome,
            Err(e) => Err(anyhow::anyhow!("Final flush panicked: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::snapshot::MockSnapshotStorage;
    use crate::registers::{RegisterKind, RegisterStore, RegisterValue, StoreOptions};

    fn registry() -> Arc<DeviceRegistry> {
        let mut registry = DeviceRegistry::new();
        registry
            .register_range("1", |id| Ok(RegisterStore::new(id, StoreOptions::default())))
            .unwrap();
        Arc::new(registry)
    }

    fn mock_storage() -> MockSnapshotStorage {
        let mut storage = MockSnapshotStorage::new();
        storage
            .expect_location()
            .returning(|| PathBuf::from("mock.json"));
        storage
    }

    fn write_coil(registry: &DeviceRegistry, address: u32) {
        registry
            .resolve(1)
            .unwrap()
            .write(RegisterKind::Coil, address, RegisterValue::Bit(true))
            .unwrap();
    }

    #[test]
    fn test_disabled_engine_never_touches_storage() {
        let registry = registry();
        write_coil(&registry, 1);
        let engine = PersistenceEngine::disabled(registry.clone());

        assert_eq!(engine.load(), LoadOutcome::Disabled);
        assert_eq!(engine.flush(true).unwrap(), FlushOutcome::Disabled);
        assert_eq!(engine.state(), EngineState::Disabled);
        assert!(registry.any_dirty());
    }

    #[test]
    fn test_clean_registry_skips_save() {
        let mut storage = mock_storage();
        storage.expect_save().times(0);
        let engine = PersistenceEngine::new(registry(), Box::new(storage), DEFAULT_SAVE_INTERVAL);

        assert_eq!(engine.flush(false).unwrap(), FlushOutcome::Skipped);
    }

    #[test]
    fn test_failed_save_keeps_dirty_then_retries() {
        let registry = registry();
        write_coil(&registry, 5);

        let mut storage = mock_storage();
        let mut seq = mockall::Sequence::new();
        storage
            .expect_save()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(anyhow::anyhow!("No space left on device")));
        storage
            .expect_save()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let engine = PersistenceEngine::new(registry.clone(), Box::new(storage), DEFAULT_SAVE_INTERVAL);

        assert!(engine.flush(false).is_err());
        assert!(registry.any_dirty());
        assert_eq!(engine.state(), EngineState::Idle);

        assert_eq!(
            engine.flush(false).unwrap(),
            FlushOutcome::Written { devices: 1 }
        );
        assert!(!registry.any_dirty());
    }

    #[test]
    fn test_unreadable_snapshot_falls_back() {
        let registry = registry();
        let mut storage = mock_storage();
        storage
            .expect_load()
            .returning(|| Err(anyhow::anyhow!("Permission denied")));
        let engine = PersistenceEngine::new(registry, Box::new(storage), DEFAULT_SAVE_INTERVAL);

        assert_eq!(engine.load(), LoadOutcome::Failed);
        assert_eq!(engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn test_ticker_flushes_dirty_registry() {
        let registry = registry();
        let mut storage = mock_storage();
        storage.expect_save().times(1..).returning(|_| Ok(()));
        let mut engine = PersistenceEngine::new(
            registry.clone(),
            Box::new(storage),
            Duration::from_millis(50),
        );

        engine.start();
        assert!(engine.is_running());
        write_coil(&registry, 2);
        time::sleep(Duration::from_millis(200)).await;

        assert!(!registry.any_dirty());
        assert_eq!(
            engine.stop_and_flush().await.unwrap(),
            FlushOutcome::Written { devices: 1 }
        );
        assert!(!engine.is_running());
        assert_eq!(engine.state(), EngineState::ShuttingDown);
    }

    #[tokio::test]
    async fn test_zero_interval_uses_default() {
        let mut storage = mock_storage();
        storage.expect_save().times(1).returning(|_| Ok(()));
        let mut engine = PersistenceEngine::new(registry(), Box::new(storage), Duration::ZERO);
        assert_eq!(engine.save_interval(), DEFAULT_SAVE_INTERVAL);

        engine.start();
        time::sleep(Duration::from_millis(50)).await;
        assert!(engine.is_running());
        assert_eq!(
            engine.stop_and_flush().await.unwrap(),
            FlushOutcome::Written { devices: 1 }
        );
    }

    #[test]
    fn test_failed_load_leaves_stores_clean() {
        let registry = registry();
        let mut storage = mock_storage();
        storage
            .expect_load()
            .times(1)
            .returning(|| Err(anyhow::anyhow!("Invalid persistence file")));
        storage.expect_save().times(0);
        let engine = PersistenceEngine::new(registry.clone(), Box::new(storage), DEFAULT_SAVE_INTERVAL);

        assert_eq!(engine.load(), LoadOutcome::Failed);
        assert!(!registry.any_dirty());
        assert_eq!(engine.flush(false).unwrap(), FlushOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_even_when_clean() {
        let mut storage = mock_storage();
        storage.expect_save().times(1).returning(|_| Ok(()));
        let mut engine = PersistenceEngine::new(registry(), Box::new(storage), Duration::from_secs(100));

        engine.start();
        engine.start();
        assert_eq!(
            engine.stop_and_flush().await.unwrap(),
            FlushOutcome::Written { devices: 1 }
        );
    }
}
