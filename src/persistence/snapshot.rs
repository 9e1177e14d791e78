// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-sim project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Snapshot format and durable storage
//!
//! A snapshot is a JSON object with one map per register kind, from
//! stringified address to value. Only non-default values are written, so a
//! mostly idle device produces a small file.
//!
//! ```json
//! {
//!   "discrete_inputs": { "0": true },
//!   "coils": {},
//!   "holding_registers": { "9": 43520 },
//!   "input_registers": {}
//! }
//! ```
//!
//! Registries with more than one device nest the same object per device id
//! under a top-level `devices` key.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::RegisterError;
use crate::registers::{DeviceRegistry, RegisterKind, RegisterValue, StoreCapture};

/// Persisted contents of one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSnapshot {
    #[serde(default)]
    pub discrete_inputs: BTreeMap<u16, bool>,
    #[serde(default)]
    pub coils: BTreeMap<u16, bool>,
    #[serde(default)]
    pub holding_registers: BTreeMap<u16, u16>,
    #[serde(default)]
    pub input_registers: BTreeMap<u16, u16>,
}

impl DeviceSnapshot {
    pub fn from_capture(capture: &StoreCapture) -> Self {
        let bits = |kind: RegisterKind| -> BTreeMap<u16, bool> {
            capture
                .bank(kind)
                .iter()
                .filter_map(|(address, value)| value.as_bit().map(|bit| (*address, bit)))
                .collect()
        };
        let words = |kind: RegisterKind| -> BTreeMap<u16, u16> {
            capture
                .bank(kind)
                .iter()
                .filter_map(|(address, value)| value.as_word().map(|word| (*address, word)))
                .collect()
        };
        Self {
            discrete_inputs: bits(RegisterKind::DiscreteInput),
            coils: bits(RegisterKind::Coil),
            holding_registers: words(RegisterKind::HoldingRegister),
            input_registers: words(RegisterKind::InputRegister),
        }
    }

    /// Bank contents in the shape [`crate::registers::RegisterStore::restore`] takes.
    pub fn banks(&self) -> Vec<(RegisterKind, Vec<(u16, RegisterValue)>)> {
        let bits = |map: &BTreeMap<u16, bool>| -> Vec<(u16, RegisterValue)> {
            map.iter()
                .map(|(address, bit)| (*address, RegisterValue::Bit(*bit)))
                .collect()
        };
        let words = |map: &BTreeMap<u16, u16>| -> Vec<(u16, RegisterValue)> {
            map.iter()
                .map(|(address, word)| (*address, RegisterValue::Word(*word)))
                .collect()
        };
        vec![
            (RegisterKind::DiscreteInput, bits(&self.discrete_inputs)),
            (RegisterKind::Coil, bits(&self.coils)),
            (RegisterKind::HoldingRegister, words(&self.holding_registers)),
            (RegisterKind::InputRegister, words(&self.input_registers)),
        ]
    }

    pub fn is_empty(&self) -> bool {
        self.discrete_inputs.is_empty()
            && self.coils.is_empty()
            && self.holding_registers.is_empty()
            && self.input_registers.is_empty()
    }
}

/// Point-in-time capture of a whole registry.
///
/// The layout is chosen on read by the presence of a top-level `devices` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Snapshot {
    /// One entry per device id.
    Devices { devices: BTreeMap<u8, DeviceSnapshot> },
    /// A single device, written flat.
    Single(DeviceSnapshot),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NestedSnapshot {
    devices: BTreeMap<u8, DeviceSnapshot>,
}

impl Snapshot {
    /// Build a snapshot from already captured stores.
    pub fn from_captures(captures: &[(u8, StoreCapture)]) -> Self {
        match captures {
            [(_, capture)] => Snapshot::Single(DeviceSnapshot::from_capture(capture)),
            _ => Snapshot::Devices {
                devices: captures
                    .iter()
                    .map(|(id, capture)| (*id, DeviceSnapshot::from_capture(capture)))
                    .collect(),
            },
        }
    }

    /// Copy every store of the registry, one lock at a time.
    pub fn capture(registry: &DeviceRegistry) -> (Self, Vec<(u8, StoreCapture)>) {
        let captures: Vec<(u8, StoreCapture)> = registry
            .stores()
            .map(|store| (store.device_id(), store.capture()))
            .collect();
        (Self::from_captures(&captures), captures)
    }

    /// Per-device contents, resolved against the devices of `registry`.
    ///
    /// A flat snapshot belongs to the only device of a single-device registry,
    /// and to device 1 otherwise.
    pub fn device_entries(&self, registry: &DeviceRegistry) -> Vec<(u8, &DeviceSnapshot)> {
        match self {
            Snapshot::Devices { devices } => devices.iter().map(|(id, device)| (*id, device)).collect(),
            Snapshot::Single(device) => {
                let mut ids = registry.device_ids();
                let id = match (ids.next(), ids.next()) {
                    (Some(only), None) => only,
                    _ => 1,
                };
                vec![(id, device)]
            }
        }
    }

    /// Overwrite the registry's stores with the snapshot contents.
    ///
    /// Devices present in the snapshot but not configured are skipped. Returns
    /// the ids that were restored.
    pub fn apply(&self, registry: &DeviceRegistry) -> Result<Vec<u8>, RegisterError> {
        let mut restored = Vec::new();
        for (id, device) in self.device_entries(registry) {
            match registry.resolve(id) {
                Ok(store) => {
                    store.restore(&device.banks())?;
                    restored.push(id);
                }
                Err(err) => warn!("Snapshot entry ignored: {}", err),
            }
        }
        Ok(restored)
    }

    pub fn to_json(&self) -> Result<String> {
        let mut json =
            serde_json::to_string_pretty(self).context("Failed to serialize register snapshot")?;
        json.push('\n');
        Ok(json)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).context("Failed to parse register snapshot")?;
        if value.get("devices").is_some() {
            let nested: NestedSnapshot = serde_json::from_str(json)
                .context("Invalid multi-device register snapshot")?;
            Ok(Snapshot::Devices {
                devices: nested.devices,
            })
        } else {
            serde_json::from_str(json)
                .map(Snapshot::Single)
                .context("Invalid register snapshot")
        }
    }
}

/// Durable home of a snapshot.
#[cfg_attr(test, mockall::automock)]
pub trait SnapshotStorage: Send + Sync {
    /// Read the stored snapshot, `None` when nothing was stored yet.
    fn load(&self) -> Result<Option<Snapshot>>;

    /// Replace the stored snapshot.
    fn save(&self, snapshot: &Snapshot) -> Result<()>;

    /// Where snapshots are stored, for log messages.
    fn location(&self) -> PathBuf;
}

/// JSON file storage with write-to-temp then rename.
///
/// The snapshot file is always either the previous complete snapshot or the
/// new one; an interrupted save only leaves a stale `.tmp` file behind.
pub struct JsonSnapshotStorage {
    path: PathBuf,
}

impl JsonSnapshotStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The snapshot path with `.tmp` appended.
    pub fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        PathBuf::from(temp)
    }

    /// Create the snapshot's parent directory if it does not exist yet.
    pub fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                info!("Persistence file directory does not exist: {:?}", parent);
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
                info!("Created directory for persistence file: {:?}", parent);
            }
        }
        Ok(())
    }

    fn sync_parent_dir(&self) {
        // Makes the rename itself durable on filesystems that need it.
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = File::open(parent).and_then(|dir| dir.sync_all()) {
                debug!("Could not sync directory {:?}: {}", parent, e);
            }
        }
    }
}

impl SnapshotStorage for JsonSnapshotStorage {
    fn load(&self) -> Result<Option<Snapshot>> {
        if !self.path.is_file() {
            info!(
                "No persistence file found at {:?}, using initial configuration",
                self.path
            );
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read persistence file {:?}", self.path))?;
        let snapshot = Snapshot::from_json(&contents)
            .with_context(|| format!("Invalid persistence file {:?}", self.path))?;
        info!("Successfully loaded register data from {:?}", self.path);
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let json = snapshot.to_json()?;
        self.ensure_parent_dir()?;

        let temp_path = self.temp_path();
        let mut file = File::create(&temp_path)
            .with_context(|| format!("Failed to create temporary file {:?}", temp_path))?;
        file.write_all(json.as_bytes())
            .with_context(|| format!("Failed to write temporary file {:?}", temp_path))?;
        file.sync_all()
            .with_context(|| format!("Failed to sync temporary file {:?}", temp_path))?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e)
                .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, self.path));
        }
        self.sync_parent_dir();

        debug!("Register data saved to {:?}", self.path);
        Ok(())
    }

    fn location(&self) -> PathBuf {
        self.path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{RegisterStore, StoreOptions};
    use tempfile::tempdir;

    fn registry(ids: &str) -> DeviceRegistry {
        let mut registry = DeviceRegistry::new();
        registry
            .register_range(ids, |id| Ok(RegisterStore::new(id, StoreOptions::default())))
            .unwrap();
        registry
    }

    #[test]
    fn test_single_device_is_flat() {
        let registry = registry("1");
        let store = registry.resolve(1).unwrap();
        store
            .write(RegisterKind::HoldingRegister, 9, RegisterValue::Word(0xAA00))
            .unwrap();
        store
            .write(RegisterKind::Coil, 5, RegisterValue::Bit(true))
            .unwrap();
        store
            .write(RegisterKind::Coil, 6, RegisterValue::Bit(false))
            .unwrap();

        let (snapshot, _) = Snapshot::capture(&registry);
        let value: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "discrete_inputs": {},
                "coils": {"5": true},
                "holding_registers": {"9": 43520},
                "input_registers": {}
            })
        );
    }

    #[test]
    fn test_multi_device_nests_by_id() {
        let registry = registry("2-3");
        registry
            .resolve(3)
            .unwrap()
            .write(RegisterKind::InputRegister, 1, RegisterValue::Word(5))
            .unwrap();

        let (snapshot, captures) = Snapshot::capture(&registry);
        assert_eq!(captures.len(), 2);
        let value: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(value["devices"]["3"]["input_registers"]["1"], 5);
        assert!(value["devices"]["2"]["coils"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_parse_flat_layout() {
        let json = r#"{
            "discrete_inputs": {"0": true, "5": false},
            "coils": {"1": true},
            "holding_registers": {"0": 100, "5": 200},
            "input_registers": {"2": 50}
        }"#;
        let snapshot = Snapshot::from_json(json).unwrap();
        let Snapshot::Single(device) = &snapshot else {
            panic!("expected a flat snapshot");
        };
        assert_eq!(device.holding_registers.get(&5), Some(&200));
        assert_eq!(device.discrete_inputs.get(&5), Some(&false));
    }

    #[test]
    fn test_parse_nested_layout() {
        let snapshot = Snapshot::from_json(r#"{"devices": {"1": {"coils": {"2": true}}, "3": {}}}"#)
            .unwrap();
        let Snapshot::Devices { devices } = &snapshot else {
            panic!("expected a nested snapshot");
        };
        assert_eq!(devices.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(devices[&1].coils.get(&2), Some(&true));
        assert!(devices[&3].is_empty());
    }

    #[test]
    fn test_json_round_trip_keeps_values() {
        let (single, _) = Snapshot::capture(&registry("5"));
        assert_eq!(Snapshot::from_json(&single.to_json().unwrap()).unwrap(), single);

        let registry = registry("1-2");
        registry
            .resolve(2)
            .unwrap()
            .write(RegisterKind::HoldingRegister, 9, RegisterValue::Word(0xAA00))
            .unwrap();
        registry
            .resolve(1)
            .unwrap()
            .write(RegisterKind::DiscreteInput, 65535, RegisterValue::Bit(true))
            .unwrap();

        let (snapshot, _) = Snapshot::capture(&registry);
        let parsed = Snapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn test_unconfigured_device_is_skipped() {
        let registry = registry("1");
        let snapshot = Snapshot::from_json(
            r#"{"devices": {"1": {"coils": {"0": true}}, "9": {"coils": {"0": true}}}}"#,
        )
        .unwrap();
        assert_eq!(snapshot.apply(&registry).unwrap(), vec![1]);
        assert!(registry.resolve(9).is_err());
    }

    #[test]
    fn test_flat_snapshot_targets_sole_device() {
        let registry = registry("4");
        let snapshot = Snapshot::from_json(r#"{"coils": {"2": true}}"#).unwrap();
        assert_eq!(snapshot.apply(&registry).unwrap(), vec![4]);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        assert!(Snapshot::from_json(r#"{"holding_registers": {"1": 70000}}"#).is_err());
        assert!(Snapshot::from_json(r#"{"holding_registers": {"70000": 1}}"#).is_err());
        assert!(Snapshot::from_json("invalid json {{{").is_err());
        assert!(Snapshot::from_json(r#"{"devices": {"1": {}}, "coils": {}}"#).is_err());
        assert!(Snapshot::from_json(r#"{"registers": {}}"#).is_err());
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let storage = JsonSnapshotStorage::new(dir.path().join("nested/dir/registers.json"));
        let snapshot = Snapshot::Single(DeviceSnapshot::default());

        storage.save(&snapshot).unwrap();

        assert!(storage.path().is_file());
        assert!(!storage.temp_path().exists());
        assert_eq!(storage.load().unwrap(), Some(snapshot));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let storage = JsonSnapshotStorage::new(dir.path().join("registers.json"));
        assert!(storage.load().unwrap().is_none());
        assert_eq!(
            storage.temp_path(),
            dir.path().join("registers.json.tmp")
        );
    }
}
